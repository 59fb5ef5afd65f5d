//! Runs a scriptSig / scriptPubKey pair and decides the spend.

use bitcoin::Transaction;
use log::{debug, trace};

use crate::{
    config::EngineConfig,
    script::{ExecutionContext, ExitCode, ParsedScript, StackMachine},
    Error,
};

/// Progress of one validation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ValidationState {
    Init,
    ExecutingScriptSig,
    ExecutingScriptPubKey,
    Done,
}

/// The script that produced a validation's exit code.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Stage {
    ScriptSig,
    ScriptPubKey,
}

/// Outcome of [`ScriptValidator::validate`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Validation {
    pub state: ValidationState,
    pub stage: Stage,
    pub exit_code: ExitCode,
    /// True only if both scripts ran to completion and left a true top element.
    pub valid: bool,
}

/// Validates one input of one transaction.
#[derive(Debug, Clone, Copy)]
pub struct ScriptValidator<'tx> {
    tx: &'tx Transaction,
    input_index: usize,
    config: EngineConfig,
}

impl<'tx> ScriptValidator<'tx> {
    /// Fails with [`Error::TxIndex`] if `input_index` is out of range.
    pub fn new(tx: &'tx Transaction, input_index: usize) -> Result<Self, Error> {
        if input_index >= tx.input.len() {
            return Err(Error::TxIndex {
                index: input_index,
                inputs: tx.input.len(),
            });
        }
        Ok(Self {
            tx,
            input_index,
            config: EngineConfig::default(),
        })
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Executes `script_sig`, then `script_pubkey` on the resulting stack.
    ///
    /// Both scripts are disassembled up front; a malformed script is reported
    /// as [`Error::Malformed`] without executing anything. Any non-`NoError`
    /// exit stops validation and is returned in the report.
    pub fn validate(&self, script_sig: &[u8], script_pubkey: &[u8]) -> Result<Validation, Error> {
        let script_sig = ParsedScript::parse(script_sig)?;
        let script_pubkey = ParsedScript::parse(script_pubkey)?;

        let mut ctx = ExecutionContext::new(self.tx, self.input_index, self.config);
        let mut state = ValidationState::Init;
        let mut stage = Stage::ScriptSig;
        let mut exit_code = ExitCode::NoError;

        while state != ValidationState::Done {
            state = match state {
                ValidationState::Init => ValidationState::ExecutingScriptSig,
                ValidationState::ExecutingScriptSig => {
                    exit_code = StackMachine::new(&mut ctx).execute(&script_sig);
                    if exit_code.is_ok() {
                        ValidationState::ExecutingScriptPubKey
                    } else {
                        ValidationState::Done
                    }
                }
                ValidationState::ExecutingScriptPubKey => {
                    stage = Stage::ScriptPubKey;
                    exit_code = StackMachine::new(&mut ctx).execute(&script_pubkey);
                    ValidationState::Done
                }
                ValidationState::Done => ValidationState::Done,
            };
            trace!("input {}: {state:?} ({exit_code:?})", self.input_index);
        }

        let valid = exit_code.is_ok() && ctx.stack().last().is_some_and(|top| top.is_true());
        debug!(
            "input {} validated: valid={valid} stage={stage:?} exit={exit_code:?}",
            self.input_index
        );

        Ok(Validation {
            state,
            stage,
            exit_code,
            valid,
        })
    }
}
