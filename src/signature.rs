//! ECDSA signature checks for `OP_CHECKSIG` and `OP_CHECKMULTISIG`.

#[cfg(not(feature = "external-secp"))]
use std::sync::OnceLock;

use bitcoin::{
    hashes::Hash,
    opcodes::all,
    secp256k1::{self, ecdsa::Signature as EcdsaSignature, Message, PublicKey, Secp256k1},
    Transaction,
};
use log::{debug, trace};

use crate::{
    disasm::{self, Instruction, ParseError},
    sighash::{SighashBuilder, SighashType},
};

#[cfg(feature = "external-secp")]
type VerificationContext = Secp256k1<secp256k1::All>;
#[cfg(not(feature = "external-secp"))]
type VerificationContext = Secp256k1<secp256k1::VerifyOnly>;

#[cfg(not(feature = "external-secp"))]
static SECP256K1: OnceLock<VerificationContext> = OnceLock::new();

fn with_secp256k1_verification_ctx<R>(f: impl FnOnce(&VerificationContext) -> R) -> R {
    #[cfg(feature = "external-secp")]
    {
        f(&*bitcoin::secp256k1::global::SECP256K1)
    }
    #[cfg(not(feature = "external-secp"))]
    {
        f(SECP256K1.get_or_init(Secp256k1::verification_only))
    }
}

/// Verifies legacy ECDSA signatures for one input of one transaction.
///
/// Every failure mode (empty or undecodable signature, bad public key,
/// unsupported hash type, no matching output for `SIGHASH_SINGLE`) is a
/// failed check rather than an error: the interpreter pushes false and
/// carries on.
#[derive(Debug, Clone, Copy)]
pub struct SignatureVerifier<'tx> {
    sighash: SighashBuilder<'tx>,
    input_index: usize,
    allow_experimental_sighash: bool,
}

impl<'tx> SignatureVerifier<'tx> {
    pub fn new(tx: &'tx Transaction, input_index: usize) -> Self {
        Self {
            sighash: SighashBuilder::new(tx),
            input_index,
            allow_experimental_sighash: false,
        }
    }

    /// Also accept `SIGHASH_NONE`, `SIGHASH_SINGLE` and `ANYONECANPAY` signatures.
    pub fn with_experimental_sighash(mut self, enabled: bool) -> Self {
        self.allow_experimental_sighash = enabled;
        self
    }

    pub fn input_index(&self) -> usize {
        self.input_index
    }

    /// Checks `sig_with_hashtype` against `pubkey` for the script currently
    /// executing. `code_separator` is the offset just past the last executed
    /// `OP_CODESEPARATOR`, if any.
    pub fn verify(
        &self,
        sig_with_hashtype: &[u8],
        pubkey: &[u8],
        script: &[u8],
        code_separator: Option<usize>,
    ) -> bool {
        let Some(hash_type) = SighashType::from_signature(sig_with_hashtype) else {
            trace!("empty signature never verifies");
            return false;
        };
        if !hash_type.is_all() && !self.allow_experimental_sighash {
            debug!(
                "rejecting signature on input {} with unsupported hash type {:#04x}",
                self.input_index,
                hash_type.to_u32()
            );
            return false;
        }

        let subscript = match build_subscript(script, code_separator, sig_with_hashtype) {
            Ok(subscript) => subscript,
            Err(err) => {
                debug!("cannot build subscript: {err}");
                return false;
            }
        };

        let preimage = match self
            .sighash
            .build_preimage(self.input_index, &subscript, hash_type)
        {
            Ok(preimage) => preimage,
            Err(err) => {
                debug!("cannot build sighash preimage: {err}");
                return false;
            }
        };
        let message = Message::from_digest(preimage.digest().to_byte_array());

        let der = &sig_with_hashtype[..sig_with_hashtype.len() - 1];
        let mut signature = match EcdsaSignature::from_der_lax(der) {
            Ok(sig) => sig,
            Err(_) => {
                trace!("signature is not parsable DER");
                return false;
            }
        };
        signature.normalize_s();

        let pubkey = match PublicKey::from_slice(pubkey) {
            Ok(pk) => pk,
            Err(_) => {
                trace!("public key is not a valid curve point");
                return false;
            }
        };

        let valid = with_secp256k1_verification_ctx(|secp| {
            secp.verify_ecdsa(&message, &signature, &pubkey).is_ok()
        });
        if !valid {
            debug!("ecdsa verification failed on input {}", self.input_index);
        }
        valid
    }
}

/// Builds the script code a signature commits to: the executing script from
/// the last code separator on, without the first push of the signature itself
/// and without any remaining `OP_CODESEPARATOR`s.
///
/// Always returns a fresh buffer; the executing script is left untouched.
pub fn build_subscript(
    script: &[u8],
    code_separator: Option<usize>,
    sig_with_hashtype: &[u8],
) -> Result<Vec<u8>, ParseError> {
    let start = code_separator.unwrap_or(0).min(script.len());
    let tail = &script[start..];
    let instructions = disasm::disassemble(tail)?;

    let mut sig_push = Vec::with_capacity(sig_with_hashtype.len() + 3);
    disasm::encode_push(sig_with_hashtype, &mut sig_push);
    let mut sig_removed = sig_with_hashtype.is_empty();

    let mut subscript = Vec::with_capacity(tail.len());
    for (idx, (pos, instruction)) in instructions.iter().enumerate() {
        let next_pos = instructions
            .get(idx + 1)
            .map(|(next, _)| *next)
            .unwrap_or(tail.len());
        let raw = &tail[*pos..next_pos];
        match instruction {
            Instruction::Op(op) if *op == all::OP_CODESEPARATOR => continue,
            Instruction::PushBytes(_) if !sig_removed && raw == sig_push.as_slice() => {
                sig_removed = true;
                continue;
            }
            _ => subscript.extend_from_slice(raw),
        }
    }

    Ok(subscript)
}
