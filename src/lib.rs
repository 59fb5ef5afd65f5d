//! Pure-Rust execution engine for legacy (pre-segwit) Bitcoin scripts.
//!
//! The crate disassembles a scriptSig / scriptPubKey pair, runs both on a
//! shared stack machine and verifies ECDSA signatures against the legacy
//! signature hash. Flow control (`OP_IF` and friends) is not supported and
//! reports [`ExitCode::NotImplemented`].
//!
//! The byte-oriented [`verify`] mirrors the `libbitcoinconsensus` entry point;
//! [`verify_spend`] takes an already decoded [`bitcoin::Transaction`].

pub mod config;
pub mod disasm;
pub mod script;
pub mod sighash;
pub mod signature;
pub mod stack;
mod tx;
pub mod validator;

pub use crate::{
    config::EngineConfig,
    disasm::{Instruction, ParseError},
    script::{ExecutionContext, ExitCode, FailureClass, ParsedScript, StackMachine},
    sighash::{SighashBase, SighashBuilder, SighashError, SighashPreimage, SighashType},
    signature::SignatureVerifier,
    stack::{ScriptStack, StackValue},
    tx::TransactionContext,
    validator::{ScriptValidator, Stage, Validation, ValidationState},
};

use bitcoin::Transaction;

/// Errors returned by the verification entry points.
///
/// A script that runs and simply does not authorize the spend is not an
/// error: the entry points return `Ok(false)` for it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The input index does not name an input of the spending transaction.
    #[error("input index {index} out of range for transaction with {inputs} inputs")]
    TxIndex { index: usize, inputs: usize },
    /// The transaction decoded but its bytes were not the canonical encoding.
    #[error("transaction is {actual} bytes but its canonical encoding is {expected}")]
    TxSizeMismatch { expected: usize, actual: usize },
    #[error("cannot deserialize spending transaction")]
    TxDeserialize,
    /// One of the scripts could not be disassembled.
    #[error("malformed script: {0}")]
    Malformed(#[from] ParseError),
    /// Execution stopped on a resource limit or an opcode the engine refuses.
    #[error("script rejected: {0}")]
    Rejected(ExitCode),
}

impl Error {
    /// Failure class of script-level errors; `None` for transaction errors.
    pub fn class(&self) -> Option<FailureClass> {
        match self {
            Error::Malformed(_) => Some(FailureClass::Structural),
            Error::Rejected(code) => code.class(),
            Error::TxIndex { .. } | Error::TxSizeMismatch { .. } | Error::TxDeserialize => None,
        }
    }
}

/// Verifies input `input_index` of the consensus-encoded `spending_transaction`
/// against the script of the output it spends.
pub fn verify(
    spent_output_script: &[u8],
    spending_transaction: &[u8],
    input_index: usize,
) -> Result<bool, Error> {
    verify_with_config(
        spent_output_script,
        spending_transaction,
        input_index,
        EngineConfig::default(),
    )
}

/// Same as [`verify`] with explicit engine limits.
pub fn verify_with_config(
    spent_output_script: &[u8],
    spending_transaction: &[u8],
    input_index: usize,
    config: EngineConfig,
) -> Result<bool, Error> {
    let tx_ctx = TransactionContext::parse(spending_transaction)?;
    tx_ctx.ensure_input_index(input_index)?;
    verify_spend_with_config(spent_output_script, tx_ctx.tx(), input_index, config)
}

/// Same as [`verify`] but returns the full validation report.
pub fn verify_with_details(
    spent_output_script: &[u8],
    spending_transaction: &[u8],
    input_index: usize,
) -> Result<Validation, Error> {
    verify_with_details_with_config(
        spent_output_script,
        spending_transaction,
        input_index,
        EngineConfig::default(),
    )
}

/// Same as [`verify_with_details`] with explicit engine limits.
pub fn verify_with_details_with_config(
    spent_output_script: &[u8],
    spending_transaction: &[u8],
    input_index: usize,
    config: EngineConfig,
) -> Result<Validation, Error> {
    let tx_ctx = TransactionContext::parse(spending_transaction)?;
    tx_ctx.ensure_input_index(input_index)?;
    let tx = tx_ctx.tx();
    ScriptValidator::new(tx, input_index)?
        .with_config(config)
        .validate(tx.input[input_index].script_sig.as_bytes(), spent_output_script)
}

/// Verifies input `input_index` of a decoded transaction.
///
/// Evaluation failures (a false `VERIFY`, stack underflow, a bad signature,
/// a false final stack) yield `Ok(false)`. Resource limits and refused
/// opcodes yield [`Error::Rejected`]; undecodable scripts [`Error::Malformed`].
pub fn verify_spend(
    script_pubkey: &[u8],
    tx: &Transaction,
    input_index: usize,
) -> Result<bool, Error> {
    verify_spend_with_config(script_pubkey, tx, input_index, EngineConfig::default())
}

/// Same as [`verify_spend`] with explicit engine limits.
pub fn verify_spend_with_config(
    script_pubkey: &[u8],
    tx: &Transaction,
    input_index: usize,
    config: EngineConfig,
) -> Result<bool, Error> {
    let validator = ScriptValidator::new(tx, input_index)?.with_config(config);
    let report = validator.validate(tx.input[input_index].script_sig.as_bytes(), script_pubkey)?;

    match report.exit_code.class() {
        None | Some(FailureClass::Evaluation) => Ok(report.valid),
        Some(FailureClass::Structural | FailureClass::Policy) => {
            Err(Error::Rejected(report.exit_code))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hex::FromHex;

    const P2PKH_SPENT: &str = "76a9144bfbaf6afb76cc5771bc6404810d1cc041a6933988ac";
    const P2PKH_SPENDING: &str = "02000000013f7cebd65c27431a90bba7f796914fe8cc2ddfc3f2cbd6f7e5f2fc854534da95000000006b483045022100de1ac3bcdfb0332207c4a91f3832bd2c2915840165f876ab47c5f8996b971c3602201c6c053d750fadde599e6f5c4e1963df0f01fc0d97815e8157e3d59fe09ca30d012103699b464d1d8bc9e47d4fb1cdaa89a1c5783d68363c4dbc4b524ed3d857148617feffffff02836d3c01000000001976a914fc25d6d5c94003bf5b0c7b640a248e2c637fcfb088ac7ada8202000000001976a914fbed3d9b11183209a57999d54d59f67c019e756c88ac6acb0700";

    #[test]
    fn verify_mainnet_p2pkh() {
        let spent = Vec::from_hex(P2PKH_SPENT).unwrap();
        let spending = Vec::from_hex(P2PKH_SPENDING).unwrap();

        assert_eq!(verify(&spent, &spending, 0), Ok(true));

        let report = verify_with_details(&spent, &spending, 0).unwrap();
        assert_eq!(report.exit_code, ExitCode::NoError);
        assert_eq!(report.stage, Stage::ScriptPubKey);
        assert!(report.valid);
    }

    #[test]
    fn verify_p2pkh_against_wrong_key_hash() {
        let mut spent = Vec::from_hex(P2PKH_SPENT).unwrap();
        spent[3] ^= 0x01;
        let spending = Vec::from_hex(P2PKH_SPENDING).unwrap();

        assert_eq!(verify(&spent, &spending, 0), Ok(false));
        let report = verify_with_details(&spent, &spending, 0).unwrap();
        assert_eq!(report.exit_code, ExitCode::Invalid);
    }

    #[test]
    fn details_report_uses_the_given_limits() {
        let spent = Vec::from_hex(P2PKH_SPENT).unwrap();
        let spending = Vec::from_hex(P2PKH_SPENDING).unwrap();

        let config = EngineConfig::default().with_max_ops_per_script(1);
        let report = verify_with_details_with_config(&spent, &spending, 0, config).unwrap();
        assert_eq!(report.exit_code, ExitCode::OpCount);
        assert_eq!(report.stage, Stage::ScriptPubKey);
        assert!(!report.valid);

        let report =
            verify_with_details_with_config(&spent, &spending, 0, EngineConfig::default()).unwrap();
        assert_eq!(report, verify_with_details(&spent, &spending, 0).unwrap());

        assert_eq!(
            verify_with_details_with_config(&spent, &spending, 2, config).unwrap_err(),
            Error::TxIndex { index: 2, inputs: 1 }
        );
    }

    #[test]
    fn transaction_errors() {
        let spent = Vec::from_hex(P2PKH_SPENT).unwrap();
        let spending = Vec::from_hex(P2PKH_SPENDING).unwrap();

        assert_eq!(
            verify(&spent, &spending, 1),
            Err(Error::TxIndex { index: 1, inputs: 1 })
        );
        assert_eq!(verify(&spent, &spending[..10], 0), Err(Error::TxDeserialize));
    }

    #[test]
    fn policy_and_structural_failures_are_errors() {
        let spending = Vec::from_hex(P2PKH_SPENDING).unwrap();

        let err = verify(&[0x7e], &spending, 0).unwrap_err();
        assert_eq!(err, Error::Rejected(ExitCode::Disabled));
        assert_eq!(err.class(), Some(FailureClass::Policy));

        let err = verify(&[0x4d, 0xff], &spending, 0).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
        assert_eq!(err.class(), Some(FailureClass::Structural));
    }
}
