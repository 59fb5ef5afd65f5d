//! Script interpreter.
//!
//! A single forward pass over the instruction stream. There is no branching:
//! `OP_IF` and friends stop execution with [`ExitCode::NotImplemented`].

use bitcoin::{
    hashes::{hash160, ripemd160, sha1, sha256, sha256d, Hash},
    opcodes::{all, Opcode},
    Transaction,
};
use log::trace;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::{
    config::{EngineConfig, MAX_PUBKEYS_PER_MULTISIG},
    disasm::{self, Instruction, ParseError},
    signature::SignatureVerifier,
    stack::{ScriptStack, StackValue},
};

/// Result of running one script.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ExitCode {
    #[error("no error")]
    NoError,
    /// A false `VERIFY`, `OP_RETURN` or false final stack.
    #[error("script evaluated to false")]
    Invalid,
    /// Flow-control opcodes (`OP_IF`, `OP_NOTIF`, `OP_ELSE`, `OP_ENDIF`).
    #[error("flow-control opcode is not implemented")]
    NotImplemented,
    #[error("disabled opcode")]
    Disabled,
    /// Stack underflow.
    #[error("not enough elements on the stack")]
    StackSizeError,
    /// Unrecognized or reserved opcode.
    #[error("unrecognized opcode")]
    GenericError,
    #[error("multisig public key count out of range")]
    PubkeyCount,
    #[error("multisig signature count out of range")]
    SigCount,
    /// A numeric operand longer than `EngineConfig::max_num_len`.
    #[error("numeric operand exceeds the length limit")]
    NumberOverflow,
    #[error("opcode count limit exceeded")]
    OpCount,
    #[error("stack size limit exceeded")]
    StackOverflow,
    #[error("push exceeds the element size limit")]
    PushSize,
    #[error("script exceeds the size limit")]
    ScriptSize,
}

/// How a failed run should be treated by callers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FailureClass {
    /// The script is malformed or exceeds a resource limit.
    Structural,
    /// The script uses opcodes this engine refuses to run.
    Policy,
    /// The script ran and did not authorize the spend.
    Evaluation,
}

impl ExitCode {
    pub fn is_ok(self) -> bool {
        self == ExitCode::NoError
    }

    /// `None` for [`ExitCode::NoError`].
    pub fn class(self) -> Option<FailureClass> {
        use ExitCode::*;

        match self {
            NoError => None,
            Invalid | StackSizeError | NumberOverflow => Some(FailureClass::Evaluation),
            NotImplemented | Disabled | GenericError => Some(FailureClass::Policy),
            PubkeyCount | SigCount | OpCount | StackOverflow | PushSize | ScriptSize => {
                Some(FailureClass::Structural)
            }
        }
    }
}

/// A script together with its decoded instruction stream.
///
/// Built fresh for every validation and never mutated.
#[derive(Debug, Clone)]
pub struct ParsedScript<'a> {
    bytes: &'a [u8],
    instructions: Vec<(usize, Instruction<'a>)>,
}

impl<'a> ParsedScript<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ParseError> {
        Ok(Self {
            bytes,
            instructions: disasm::disassemble(bytes)?,
        })
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn instructions(&self) -> &[(usize, Instruction<'a>)] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Mutable state of one validation: stacks, code separator position and the
/// signing context.
///
/// The main stack survives from one script to the next; the alt stack, the
/// code separator and the opcode count are reset at the start of each script.
#[derive(Debug, Clone)]
pub struct ExecutionContext<'tx> {
    stack: ScriptStack,
    altstack: ScriptStack,
    code_separator: Option<usize>,
    op_count: usize,
    verifier: Option<SignatureVerifier<'tx>>,
    config: EngineConfig,
}

impl<'tx> ExecutionContext<'tx> {
    /// Context for validating input `input_index` of `tx`.
    pub fn new(tx: &'tx Transaction, input_index: usize, config: EngineConfig) -> Self {
        let verifier = SignatureVerifier::new(tx, input_index)
            .with_experimental_sighash(config.allow_experimental_sighash);
        Self {
            stack: ScriptStack::new(),
            altstack: ScriptStack::new(),
            code_separator: None,
            op_count: 0,
            verifier: Some(verifier),
            config,
        }
    }

    /// Context without a transaction. Signature checks always fail.
    pub fn detached(config: EngineConfig) -> Self {
        Self {
            stack: ScriptStack::new(),
            altstack: ScriptStack::new(),
            code_separator: None,
            op_count: 0,
            verifier: None,
            config,
        }
    }

    pub fn with_stack(mut self, stack: ScriptStack) -> Self {
        self.stack = stack;
        self
    }

    pub fn stack(&self) -> &ScriptStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut ScriptStack {
        &mut self.stack
    }

    pub fn altstack(&self) -> &ScriptStack {
        &self.altstack
    }

    /// Offset just past the last executed `OP_CODESEPARATOR`.
    pub fn code_separator(&self) -> Option<usize> {
        self.code_separator
    }

    pub fn op_count(&self) -> usize {
        self.op_count
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn into_stack(self) -> ScriptStack {
        self.stack
    }

    fn begin_script(&mut self) {
        self.altstack = ScriptStack::new();
        self.code_separator = None;
        self.op_count = 0;
    }
}

/// Runs `script` against `ctx`, stopping at the first non-`NoError` code.
pub fn execute(script: &ParsedScript<'_>, ctx: &mut ExecutionContext<'_>) -> ExitCode {
    StackMachine::new(ctx).execute(script)
}

/// The opcode dispatcher.
pub struct StackMachine<'c, 'tx> {
    ctx: &'c mut ExecutionContext<'tx>,
}

impl<'c, 'tx> StackMachine<'c, 'tx> {
    pub fn new(ctx: &'c mut ExecutionContext<'tx>) -> Self {
        Self { ctx }
    }

    pub fn execute(&mut self, script: &ParsedScript<'_>) -> ExitCode {
        match self.run(script) {
            Ok(()) => ExitCode::NoError,
            Err(code) => code,
        }
    }

    fn run(&mut self, script: &ParsedScript<'_>) -> Result<(), ExitCode> {
        if script.len() > self.ctx.config.max_script_size {
            return Err(ExitCode::ScriptSize);
        }
        self.ctx.begin_script();

        for &(offset, instruction) in script.instructions() {
            match instruction {
                Instruction::PushBytes(data) => {
                    if data.len() > self.ctx.config.max_element_size {
                        return Err(ExitCode::PushSize);
                    }
                    self.ctx.stack.push(data);
                }
                Instruction::Op(op) => {
                    if op.to_u8() > all::OP_PUSHNUM_16.to_u8() {
                        self.add_ops(1)?;
                    }
                    if let Err(code) = self.execute_opcode(op, offset, script.as_bytes()) {
                        trace!(
                            "{} at offset {offset} stopped execution: {code:?}",
                            disasm::opcode_name(op.to_u8())
                        );
                        return Err(code);
                    }
                }
            }

            if self.ctx.stack.len() + self.ctx.altstack.len() > self.ctx.config.max_stack_size {
                return Err(ExitCode::StackOverflow);
            }
        }

        Ok(())
    }

    fn execute_opcode(&mut self, op: Opcode, offset: usize, script: &[u8]) -> Result<(), ExitCode> {
        use all::*;

        let opcode = op.to_u8();
        if opcode >= OP_PUSHNUM_1.to_u8() && opcode <= OP_PUSHNUM_16.to_u8() {
            let value = (opcode - OP_PUSHNUM_1.to_u8() + 1) as i64;
            self.ctx.stack.push(value);
            return Ok(());
        }

        match op {
            OP_PUSHNUM_NEG1 => self.ctx.stack.push(-1i64),
            OP_NOP => {}
            OP_IF | OP_NOTIF | OP_ELSE | OP_ENDIF => return Err(ExitCode::NotImplemented),
            OP_CAT | OP_SUBSTR | OP_LEFT | OP_RIGHT | OP_INVERT | OP_AND | OP_OR | OP_XOR
            | OP_2MUL | OP_2DIV | OP_MUL | OP_DIV | OP_MOD | OP_LSHIFT | OP_RSHIFT => {
                return Err(ExitCode::Disabled)
            }
            OP_VERIFY => self.op_verify()?,
            OP_RETURN => return Err(ExitCode::Invalid),

            OP_TOALTSTACK => {
                let value = self.pop()?;
                self.ctx.altstack.push(value);
            }
            OP_FROMALTSTACK => {
                let value = self.ctx.altstack.pop().ok_or(ExitCode::StackSizeError)?;
                self.ctx.stack.push(value);
            }
            OP_2DROP => {
                self.require(2)?;
                self.ctx.stack.truncate_top(2);
            }
            OP_2DUP => {
                self.require(2)?;
                self.dup_at(1)?;
                self.dup_at(1)?;
            }
            OP_3DUP => {
                self.require(3)?;
                self.dup_at(2)?;
                self.dup_at(2)?;
                self.dup_at(2)?;
            }
            OP_2OVER => {
                self.require(4)?;
                self.dup_at(3)?;
                self.dup_at(3)?;
            }
            OP_2ROT => {
                self.require(6)?;
                let first = self.remove_at(5)?;
                let second = self.remove_at(4)?;
                self.ctx.stack.push(first);
                self.ctx.stack.push(second);
            }
            OP_2SWAP => {
                self.require(4)?;
                self.ctx.stack.swap(3, 1);
                self.ctx.stack.swap(2, 0);
            }
            OP_IFDUP => {
                let top = self.peek(0)?;
                if top.is_true() {
                    let value = top.clone();
                    self.ctx.stack.push(value);
                }
            }
            OP_DEPTH => {
                let depth = self.ctx.stack.len() as i64;
                self.ctx.stack.push(depth);
            }
            OP_DROP => {
                self.pop()?;
            }
            OP_DUP => self.dup_at(0)?,
            OP_NIP => {
                self.require(2)?;
                self.remove_at(1)?;
            }
            OP_OVER => {
                self.require(2)?;
                self.dup_at(1)?;
            }
            OP_PICK | OP_ROLL => {
                let depth = self
                    .peek_num(0)?
                    .to_usize()
                    .filter(|depth| *depth < self.ctx.stack.len() - 1)
                    .ok_or(ExitCode::StackSizeError)?;
                self.pop()?;
                if op == OP_PICK {
                    self.dup_at(depth)?;
                } else {
                    let value = self.remove_at(depth)?;
                    self.ctx.stack.push(value);
                }
            }
            OP_ROT => {
                self.require(3)?;
                self.ctx.stack.swap(2, 1);
                self.ctx.stack.swap(1, 0);
            }
            OP_SWAP => {
                self.require(2)?;
                self.ctx.stack.swap(1, 0);
            }
            OP_TUCK => {
                self.require(2)?;
                let top = self.peek(0)?.clone();
                self.ctx.stack.insert(2, top);
            }
            OP_SIZE => {
                let size = self.peek(0)?.encoded_len() as i64;
                self.ctx.stack.push(size);
            }

            OP_EQUAL | OP_EQUALVERIFY => {
                self.require(2)?;
                let b = self.pop()?;
                let a = self.pop()?;
                self.ctx.stack.push(a.to_bytes() == b.to_bytes());
                if op == OP_EQUALVERIFY {
                    self.op_verify()?;
                }
            }

            OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT | OP_0NOTEQUAL => {
                let num = self.peek_num(0)?;
                let result = match op {
                    OP_1ADD => num + 1u32,
                    OP_1SUB => num - 1u32,
                    OP_NEGATE => -num,
                    OP_ABS => num.abs(),
                    OP_NOT => bool_num(num.is_zero()),
                    _ => bool_num(!num.is_zero()),
                };
                self.pop()?;
                self.ctx.stack.push(result);
            }
            OP_ADD | OP_SUB | OP_BOOLAND | OP_BOOLOR | OP_NUMEQUAL | OP_NUMEQUALVERIFY
            | OP_NUMNOTEQUAL | OP_LESSTHAN | OP_GREATERTHAN | OP_LESSTHANOREQUAL
            | OP_GREATERTHANOREQUAL | OP_MIN | OP_MAX => {
                self.require(2)?;
                let b = self.peek_num(0)?;
                let a = self.peek_num(1)?;
                let result = match op {
                    OP_ADD => a + b,
                    OP_SUB => a - b,
                    OP_BOOLAND => bool_num(!a.is_zero() && !b.is_zero()),
                    OP_BOOLOR => bool_num(!a.is_zero() || !b.is_zero()),
                    OP_NUMEQUAL | OP_NUMEQUALVERIFY => bool_num(a == b),
                    OP_NUMNOTEQUAL => bool_num(a != b),
                    OP_LESSTHAN => bool_num(a < b),
                    OP_GREATERTHAN => bool_num(a > b),
                    OP_LESSTHANOREQUAL => bool_num(a <= b),
                    OP_GREATERTHANOREQUAL => bool_num(a >= b),
                    OP_MIN => a.min(b),
                    _ => a.max(b),
                };
                self.ctx.stack.truncate_top(2);
                self.ctx.stack.push(result);
                if op == OP_NUMEQUALVERIFY {
                    self.op_verify()?;
                }
            }
            OP_WITHIN => {
                self.require(3)?;
                let max = self.peek_num(0)?;
                let min = self.peek_num(1)?;
                let value = self.peek_num(2)?;
                self.ctx.stack.truncate_top(3);
                self.ctx.stack.push(value >= min && value < max);
            }

            OP_RIPEMD160 => {
                let data = self.pop_hash_input()?;
                self.push_digest(ripemd160::Hash::hash(&data).as_byte_array());
            }
            OP_SHA1 => {
                let data = self.pop_hash_input()?;
                self.push_digest(sha1::Hash::hash(&data).as_byte_array());
            }
            OP_SHA256 => {
                let data = self.pop_hash_input()?;
                self.push_digest(sha256::Hash::hash(&data).as_byte_array());
            }
            OP_HASH160 => {
                let data = self.pop_hash_input()?;
                self.push_digest(hash160::Hash::hash(&data).as_byte_array());
            }
            OP_HASH256 => {
                let data = self.pop_hash_input()?;
                self.push_digest(sha256d::Hash::hash(&data).as_byte_array());
            }

            OP_CODESEPARATOR => self.ctx.code_separator = Some(offset + 1),
            OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                self.require(2)?;
                let pubkey = self.pop()?;
                let sig = self.pop()?;
                let valid = self.check_sig(&sig.to_bytes(), &pubkey.to_bytes(), script);
                self.ctx.stack.push(valid);
                if op == OP_CHECKSIGVERIFY {
                    self.op_verify()?;
                }
            }
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                self.op_checkmultisig(script)?;
                if op == OP_CHECKMULTISIGVERIFY {
                    self.op_verify()?;
                }
            }

            _ => return Err(ExitCode::GenericError),
        }

        Ok(())
    }

    /// `OP_CHECKMULTISIG` stack layout, top first:
    /// `N`, N keys, `M`, M signatures, dummy.
    fn op_checkmultisig(&mut self, script: &[u8]) -> Result<(), ExitCode> {
        let n_keys = self
            .peek_num(0)?
            .to_usize()
            .filter(|n| *n <= MAX_PUBKEYS_PER_MULTISIG)
            .ok_or(ExitCode::PubkeyCount)?;
        self.add_ops(n_keys)?;

        let sigs_count_depth = n_keys + 1;
        self.require(sigs_count_depth + 1)?;
        let n_sigs = self
            .peek_num(sigs_count_depth)?
            .to_usize()
            .filter(|m| *m <= n_keys)
            .ok_or(ExitCode::SigCount)?;
        let dummy_depth = sigs_count_depth + n_sigs + 1;
        self.require(dummy_depth + 1)?;

        // Deepest first, which is the order they appear in the script.
        let mut pubkeys = Vec::with_capacity(n_keys);
        for depth in (1..=n_keys).rev() {
            pubkeys.push(self.peek(depth)?.to_bytes().into_owned());
        }
        let mut sigs = Vec::with_capacity(n_sigs);
        for depth in (sigs_count_depth + 1..=sigs_count_depth + n_sigs).rev() {
            sigs.push(self.peek(depth)?.to_bytes().into_owned());
        }

        let success = self.match_signatures(&sigs, &pubkeys, script);
        self.ctx.stack.truncate_top(dummy_depth + 1);
        self.ctx.stack.push(success);
        Ok(())
    }

    /// Each signature must match a key at or after the key that matched the
    /// previous signature. Gives up once the remaining keys cannot cover the
    /// remaining signatures.
    fn match_signatures(&self, sigs: &[Vec<u8>], pubkeys: &[Vec<u8>], script: &[u8]) -> bool {
        let mut sig_index = 0usize;
        let mut key_index = 0usize;
        while sig_index < sigs.len() {
            if sigs.len() - sig_index > pubkeys.len() - key_index {
                return false;
            }
            if self.check_sig(&sigs[sig_index], &pubkeys[key_index], script) {
                sig_index += 1;
            }
            key_index += 1;
        }
        true
    }

    fn check_sig(&self, sig: &[u8], pubkey: &[u8], script: &[u8]) -> bool {
        match self.ctx.verifier.as_ref() {
            Some(verifier) => verifier.verify(sig, pubkey, script, self.ctx.code_separator),
            None => false,
        }
    }

    /// Pops the top element; if it is false pushes `0` back and fails.
    fn op_verify(&mut self) -> Result<(), ExitCode> {
        let value = self.pop()?;
        if !value.is_true() {
            self.ctx.stack.push(0i64);
            return Err(ExitCode::Invalid);
        }
        Ok(())
    }

    fn add_ops(&mut self, count: usize) -> Result<(), ExitCode> {
        self.ctx.op_count += count;
        if self.ctx.op_count > self.ctx.config.max_ops_per_script {
            Err(ExitCode::OpCount)
        } else {
            Ok(())
        }
    }

    fn require(&self, depth: usize) -> Result<(), ExitCode> {
        if self.ctx.stack.len() < depth {
            Err(ExitCode::StackSizeError)
        } else {
            Ok(())
        }
    }

    fn peek(&self, depth: usize) -> Result<&StackValue, ExitCode> {
        self.ctx.stack.peek(depth).ok_or(ExitCode::StackSizeError)
    }

    fn peek_num(&self, depth: usize) -> Result<BigInt, ExitCode> {
        self.peek(depth)?
            .to_num(self.ctx.config.max_num_len)
            .ok_or(ExitCode::NumberOverflow)
    }

    fn pop(&mut self) -> Result<StackValue, ExitCode> {
        self.ctx.stack.pop().ok_or(ExitCode::StackSizeError)
    }

    fn dup_at(&mut self, depth: usize) -> Result<(), ExitCode> {
        let value = self.peek(depth)?.clone();
        self.ctx.stack.push(value);
        Ok(())
    }

    fn remove_at(&mut self, depth: usize) -> Result<StackValue, ExitCode> {
        self.ctx.stack.remove(depth).ok_or(ExitCode::StackSizeError)
    }

    /// Integers hash as the empty string.
    fn pop_hash_input(&mut self) -> Result<Vec<u8>, ExitCode> {
        match self.pop()? {
            StackValue::Int(_) => Ok(Vec::new()),
            StackValue::Bytes(bytes) => Ok(bytes),
        }
    }

    fn push_digest(&mut self, digest: &[u8]) {
        self.ctx.stack.push(digest);
    }
}

fn bool_num(value: bool) -> BigInt {
    BigInt::from(value as u8)
}
