//! Spending transaction parsing.

use bitcoin::{consensus, Transaction};

use crate::Error;

/// A decoded spending transaction whose wire encoding was canonical.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    tx: Transaction,
}

impl TransactionContext {
    /// Parses a transaction from wire bytes and reserializes it to guarantee canonical encoding.
    pub fn parse(tx_bytes: &[u8]) -> Result<Self, Error> {
        let tx: Transaction = consensus::deserialize(tx_bytes).map_err(|err| {
            log::debug!("cannot decode spending transaction: {err}");
            Error::TxDeserialize
        })?;

        let canonical = consensus::serialize(&tx);
        if canonical.len() != tx_bytes.len() {
            return Err(Error::TxSizeMismatch {
                expected: canonical.len(),
                actual: tx_bytes.len(),
            });
        }

        Ok(Self { tx })
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    pub fn into_tx(self) -> Transaction {
        self.tx
    }

    /// Ensures `input_index` points to an existing transaction input.
    pub fn ensure_input_index(&self, input_index: usize) -> Result<(), Error> {
        if input_index >= self.tx.input.len() {
            Err(Error::TxIndex {
                index: input_index,
                inputs: self.tx.input.len(),
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::{
        absolute::LockTime, transaction::Version, Amount, OutPoint, ScriptBuf, Sequence, TxIn,
        TxOut, Witness,
    };

    fn encoded_tx() -> Vec<u8> {
        let tx = Transaction {
            version: Version(1),
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::from_bytes(vec![0x51]),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(5),
                script_pubkey: ScriptBuf::new(),
            }],
        };
        consensus::serialize(&tx)
    }

    #[test]
    fn parses_canonical_bytes() {
        let ctx = TransactionContext::parse(&encoded_tx()).unwrap();
        assert_eq!(ctx.tx().input.len(), 1);
        assert!(ctx.ensure_input_index(0).is_ok());
        assert_eq!(
            ctx.ensure_input_index(1),
            Err(Error::TxIndex { index: 1, inputs: 1 })
        );
    }

    #[test]
    fn rejects_garbage_and_trailing_bytes() {
        assert_eq!(
            TransactionContext::parse(&[0x01, 0x02]).unwrap_err(),
            Error::TxDeserialize
        );

        let mut bytes = encoded_tx();
        bytes.push(0x00);
        assert!(matches!(
            TransactionContext::parse(&bytes),
            Err(Error::TxDeserialize | Error::TxSizeMismatch { .. })
        ));
    }
}
