//! Legacy (pre-segwit) signature-hash preimage construction.
//!
//! The preimage is the spending transaction reserialized with every input
//! script blanked except the one being signed, which carries the previous
//! output's script code, followed by the 4-byte hash type.

use core::fmt;

use bitcoin::{
    consensus,
    hashes::{sha256d, Hash},
    Amount, ScriptBuf, Sequence, Transaction, TxOut, Witness,
};

const SIGHASH_ALL: u32 = 0x01;
const SIGHASH_NONE: u32 = 0x02;
const SIGHASH_SINGLE: u32 = 0x03;
const SIGHASH_ANYONECANPAY: u32 = 0x80;
const SIGHASH_BASE_MASK: u32 = 0x1f;

/// Which outputs a signature commits to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SighashBase {
    All,
    None,
    Single,
}

/// Raw hash type as carried by the trailing byte of a signature.
///
/// Any value is representable; bases other than NONE and SINGLE behave as
/// ALL, matching legacy consensus.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SighashType(u32);

impl SighashType {
    pub const ALL: Self = Self(SIGHASH_ALL);
    pub const NONE: Self = Self(SIGHASH_NONE);
    pub const SINGLE: Self = Self(SIGHASH_SINGLE);

    pub fn from_u32(raw: u32) -> Self {
        Self(raw)
    }

    /// Hash type of a signature: its last byte.
    pub fn from_signature(sig_with_hashtype: &[u8]) -> Option<Self> {
        sig_with_hashtype.last().map(|byte| Self(*byte as u32))
    }

    pub fn to_u32(self) -> u32 {
        self.0
    }

    pub fn base(self) -> SighashBase {
        match self.0 & SIGHASH_BASE_MASK {
            SIGHASH_NONE => SighashBase::None,
            SIGHASH_SINGLE => SighashBase::Single,
            _ => SighashBase::All,
        }
    }

    pub fn anyone_can_pay(self) -> bool {
        self.0 & SIGHASH_ANYONECANPAY != 0
    }

    pub fn with_anyone_can_pay(self) -> Self {
        Self(self.0 | SIGHASH_ANYONECANPAY)
    }

    /// True for plain `SIGHASH_ALL`, the only type signature checks accept by default.
    pub fn is_all(self) -> bool {
        self.0 == SIGHASH_ALL
    }
}

impl fmt::Display for SighashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match self.base() {
            SighashBase::All => "SIGHASH_ALL",
            SighashBase::None => "SIGHASH_NONE",
            SighashBase::Single => "SIGHASH_SINGLE",
        };
        f.write_str(base)?;
        if self.anyone_can_pay() {
            f.write_str("|SIGHASH_ANYONECANPAY")?;
        }
        Ok(())
    }
}

/// Failures that prevent building a preimage.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SighashError {
    #[error("input index {index} out of range for transaction with {inputs} inputs")]
    InputIndex { index: usize, inputs: usize },
    /// `SIGHASH_SINGLE` on an input without a matching output. Legacy
    /// consensus signs the constant `1` here instead of a preimage.
    #[error("SIGHASH_SINGLE for input {index} but transaction has {outputs} outputs")]
    SingleWithoutOutput { index: usize, outputs: usize },
}

/// Serialized signing data for one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SighashPreimage {
    bytes: Vec<u8>,
    hash_type: SighashType,
}

impl SighashPreimage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn hash_type(&self) -> SighashType {
        self.hash_type
    }

    /// The one-byte hash type a signature over this preimage carries.
    pub fn suffix(&self) -> u8 {
        self.hash_type.0 as u8
    }

    /// Double SHA-256 of the preimage: the digest that is actually signed.
    pub fn digest(&self) -> sha256d::Hash {
        sha256d::Hash::hash(&self.bytes)
    }
}

/// Builds legacy sighash preimages for the inputs of one transaction.
#[derive(Debug, Clone, Copy)]
pub struct SighashBuilder<'tx> {
    tx: &'tx Transaction,
}

impl<'tx> SighashBuilder<'tx> {
    pub fn new(tx: &'tx Transaction) -> Self {
        Self { tx }
    }

    pub fn tx(&self) -> &'tx Transaction {
        self.tx
    }

    /// Produces the preimage for `input_index` signed with `hash_type`.
    ///
    /// `script_code` is placed verbatim in the signed input; callers strip
    /// code separators and the signature beforehand.
    pub fn build_preimage(
        &self,
        input_index: usize,
        script_code: &[u8],
        hash_type: SighashType,
    ) -> Result<SighashPreimage, SighashError> {
        let inputs = self.tx.input.len();
        if input_index >= inputs {
            return Err(SighashError::InputIndex {
                index: input_index,
                inputs,
            });
        }

        let base = hash_type.base();
        if base == SighashBase::Single && input_index >= self.tx.output.len() {
            return Err(SighashError::SingleWithoutOutput {
                index: input_index,
                outputs: self.tx.output.len(),
            });
        }

        let mut tx = self.tx.clone();
        for (index, input) in tx.input.iter_mut().enumerate() {
            input.witness = Witness::new();
            if index == input_index {
                input.script_sig = ScriptBuf::from_bytes(script_code.to_vec());
            } else {
                input.script_sig = ScriptBuf::new();
                if base != SighashBase::All {
                    input.sequence = Sequence::ZERO;
                }
            }
        }

        match base {
            SighashBase::All => {}
            SighashBase::None => tx.output.clear(),
            SighashBase::Single => {
                tx.output.truncate(input_index + 1);
                for output in tx.output.iter_mut().take(input_index) {
                    *output = null_output();
                }
            }
        }

        if hash_type.anyone_can_pay() {
            let signed = tx.input.swap_remove(input_index);
            tx.input = vec![signed];
        }

        let mut bytes = consensus::serialize(&tx);
        bytes.extend_from_slice(&hash_type.to_u32().to_le_bytes());
        Ok(SighashPreimage { bytes, hash_type })
    }
}

/// Output placeholder used by `SIGHASH_SINGLE`: value -1 and an empty script.
fn null_output() -> TxOut {
    TxOut {
        value: Amount::from_sat(u64::MAX),
        script_pubkey: ScriptBuf::new(),
    }
}
