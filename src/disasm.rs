//! Script disassembler.
//!
//! Splits raw script bytes into opcodes and length-prefixed pushes without
//! ever reading past the end of the buffer. The same instruction stream feeds
//! the interpreter and the human-readable `asm` rendering.

use core::fmt;

use bitcoin::opcodes::{all, Opcode};

const MAX_DIRECT_PUSH: usize = 0x4b;

/// A single decoded script instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction<'a> {
    /// A non-push opcode. `OP_1NEGATE` and `OP_1`..`OP_16` are opcodes here;
    /// the interpreter gives them their numeric push semantics.
    Op(Opcode),
    /// Raw bytes pushed by `OP_0`, a direct push or one of the `OP_PUSHDATA` forms.
    PushBytes(&'a [u8]),
}

impl Instruction<'_> {
    /// Returns the opcode for non-push instructions.
    pub fn opcode(&self) -> Option<Opcode> {
        match self {
            Instruction::Op(op) => Some(*op),
            Instruction::PushBytes(_) => None,
        }
    }

    /// Returns the pushed bytes for push instructions.
    pub fn push_bytes(&self) -> Option<&[u8]> {
        match self {
            Instruction::Op(_) => None,
            Instruction::PushBytes(data) => Some(data),
        }
    }

    /// Appends the minimal encoding of this instruction to `out`.
    pub fn encode_to(&self, out: &mut Vec<u8>) {
        match self {
            Instruction::Op(op) => out.push(op.to_u8()),
            Instruction::PushBytes(data) => encode_push(data, out),
        }
    }
}

impl fmt::Display for Instruction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Op(op) => f.write_str(&opcode_name(op.to_u8())),
            Instruction::PushBytes(data) if data.is_empty() => f.write_str("OP_0"),
            Instruction::PushBytes(data) => {
                for byte in data.iter() {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// Structural failure while splitting a script into instructions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The 1, 2 or 4 byte length prefix of an `OP_PUSHDATA` ran off the end.
    #[error("truncated {width}-byte push length at offset {offset}")]
    TruncatedLength { offset: usize, width: usize },
    /// A push declared more bytes than remain in the script.
    #[error("push at offset {offset} declares {declared} bytes but only {available} remain")]
    PushOverrun {
        offset: usize,
        declared: usize,
        available: usize,
    },
}

/// Lazy iterator over `(offset, instruction)` pairs.
///
/// After the first error the iterator is fused and yields `None`.
#[derive(Debug, Clone)]
pub struct Instructions<'a> {
    bytes: &'a [u8],
    cursor: usize,
    failed: bool,
}

/// Iterates the instructions of `bytes` together with their byte offsets.
pub fn instructions(bytes: &[u8]) -> Instructions<'_> {
    Instructions {
        bytes,
        cursor: 0,
        failed: false,
    }
}

impl<'a> Instructions<'a> {
    /// Byte offset of the next instruction to decode.
    pub fn position(&self) -> usize {
        self.cursor
    }

    fn next_instruction(&mut self) -> Result<(usize, Instruction<'a>), ParseError> {
        let offset = self.cursor;
        let opcode = self.bytes[offset];
        let mut cursor = offset + 1;

        let push_len = match opcode {
            0x00..=0x4b => opcode as usize,
            x if x == all::OP_PUSHDATA1.to_u8() => read_push_length(self.bytes, &mut cursor, 1)?,
            x if x == all::OP_PUSHDATA2.to_u8() => read_push_length(self.bytes, &mut cursor, 2)?,
            x if x == all::OP_PUSHDATA4.to_u8() => read_push_length(self.bytes, &mut cursor, 4)?,
            _ => {
                self.cursor = cursor;
                return Ok((offset, Instruction::Op(Opcode::from(opcode))));
            }
        };

        let available = self.bytes.len() - cursor;
        if push_len > available {
            return Err(ParseError::PushOverrun {
                offset,
                declared: push_len,
                available,
            });
        }
        let data = &self.bytes[cursor..cursor + push_len];
        self.cursor = cursor + push_len;
        Ok((offset, Instruction::PushBytes(data)))
    }
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<(usize, Instruction<'a>), ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor >= self.bytes.len() {
            return None;
        }
        let item = self.next_instruction();
        if item.is_err() {
            self.failed = true;
        }
        Some(item)
    }
}

/// Splits a full script into `(offset, instruction)` pairs.
pub fn disassemble(bytes: &[u8]) -> Result<Vec<(usize, Instruction<'_>)>, ParseError> {
    instructions(bytes).collect()
}

/// Re-encodes instructions using the minimal push form for each element.
pub fn assemble(instructions: &[Instruction<'_>]) -> Vec<u8> {
    let mut out = Vec::new();
    for instruction in instructions {
        instruction.encode_to(&mut out);
    }
    out
}

/// Renders a script as space separated opcode names and hex pushes.
pub fn to_asm(bytes: &[u8]) -> Result<String, ParseError> {
    let mut out = String::new();
    for item in instructions(bytes) {
        let (_, instruction) = item?;
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&instruction.to_string());
    }
    Ok(out)
}

/// Appends a minimally encoded push of `data` to `out`.
pub fn encode_push(data: &[u8], out: &mut Vec<u8>) {
    let len = data.len();
    if len <= MAX_DIRECT_PUSH {
        out.push(len as u8);
    } else if len <= 0xff {
        out.push(all::OP_PUSHDATA1.to_u8());
        out.push(len as u8);
    } else if len <= 0xffff {
        out.push(all::OP_PUSHDATA2.to_u8());
        out.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        out.push(all::OP_PUSHDATA4.to_u8());
        out.extend_from_slice(&(len as u32).to_le_bytes());
    }
    out.extend_from_slice(data);
}

/// Looks up the display name of an opcode byte.
///
/// Uses the conventional Bitcoin Core spellings for the small-number and
/// lock-time opcodes and the `bitcoin` crate's table for everything else.
pub fn opcode_name(byte: u8) -> String {
    match byte {
        0x00 => "OP_0".into(),
        0x4f => "OP_1NEGATE".into(),
        0x51..=0x60 => format!("OP_{}", byte - 0x50),
        0xb1 => "OP_CHECKLOCKTIMEVERIFY".into(),
        0xb2 => "OP_CHECKSEQUENCEVERIFY".into(),
        _ => Opcode::from(byte).to_string(),
    }
}

fn read_push_length(bytes: &[u8], cursor: &mut usize, width: usize) -> Result<usize, ParseError> {
    if bytes.len() < *cursor + width {
        return Err(ParseError::TruncatedLength {
            offset: *cursor - 1,
            width,
        });
    }
    let mut len: usize = 0;
    for i in 0..width {
        len |= (bytes[*cursor + i] as usize) << (8 * i);
    }
    *cursor += width;
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_script(len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        encode_push(&vec![0xab; len], &mut out);
        out
    }

    #[test]
    fn splits_opcodes_and_pushes_with_offsets() {
        let script = [0x76, 0xa9, 0x02, 0xaa, 0xbb, 0x88, 0xac];
        let parsed = disassemble(&script).unwrap();
        assert_eq!(
            parsed,
            vec![
                (0, Instruction::Op(all::OP_DUP)),
                (1, Instruction::Op(all::OP_HASH160)),
                (2, Instruction::PushBytes(&[0xaa, 0xbb])),
                (5, Instruction::Op(all::OP_EQUALVERIFY)),
                (6, Instruction::Op(all::OP_CHECKSIG)),
            ]
        );
    }

    #[test]
    fn zero_byte_is_empty_push() {
        let parsed = disassemble(&[0x00]).unwrap();
        assert_eq!(parsed, vec![(0, Instruction::PushBytes(&[]))]);
    }

    #[test]
    fn direct_push_overrun_is_rejected() {
        let err = disassemble(&[0x05, 0x01, 0x02]).unwrap_err();
        assert_eq!(
            err,
            ParseError::PushOverrun {
                offset: 0,
                declared: 5,
                available: 2,
            }
        );
    }

    #[test]
    fn truncated_pushdata_length_is_rejected() {
        assert_eq!(
            disassemble(&[0x4c]).unwrap_err(),
            ParseError::TruncatedLength { offset: 0, width: 1 }
        );
        assert_eq!(
            disassemble(&[0x51, 0x4d, 0x01]).unwrap_err(),
            ParseError::TruncatedLength { offset: 1, width: 2 }
        );
        assert_eq!(
            disassemble(&[0x4e, 0x00, 0x00, 0x00]).unwrap_err(),
            ParseError::TruncatedLength { offset: 0, width: 4 }
        );
    }

    #[test]
    fn pushdata4_with_huge_length_does_not_overread() {
        let err = disassemble(&[0x4e, 0xff, 0xff, 0xff, 0xff, 0x00]).unwrap_err();
        assert!(matches!(err, ParseError::PushOverrun { available: 1, .. }));
    }

    #[test]
    fn iterator_is_fused_after_error() {
        let mut iter = instructions(&[0x51, 0x02, 0x00]);
        assert!(iter.next().unwrap().is_ok());
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }

    #[test]
    fn minimal_push_round_trips_at_boundaries() {
        for len in [0usize, 1, 75, 76, 255, 256, 65535] {
            let script = push_script(len);
            let expected_prefix = match len {
                0..=75 => 1,
                76..=255 => 2,
                _ => 3,
            };
            assert_eq!(script.len(), len + expected_prefix, "prefix for len {len}");

            let parsed = disassemble(&script).unwrap();
            assert_eq!(parsed.len(), 1);
            let instructions: Vec<_> = parsed.into_iter().map(|(_, ins)| ins).collect();
            assert_eq!(assemble(&instructions), script, "round trip for len {len}");
        }
    }

    #[test]
    fn large_push_uses_pushdata4() {
        let script = push_script(65536);
        assert_eq!(script[0], all::OP_PUSHDATA4.to_u8());
        assert_eq!(&script[1..5], &65536u32.to_le_bytes());
    }

    #[test]
    fn renders_asm_with_core_names() {
        let script = [0x00, 0x4f, 0x51, 0x60, 0x02, 0xde, 0xad, 0x87, 0xb1];
        assert_eq!(
            to_asm(&script).unwrap(),
            "OP_0 OP_1NEGATE OP_1 OP_16 dead OP_EQUAL OP_CHECKLOCKTIMEVERIFY"
        );
    }

    #[test]
    fn opcode_names_fall_back_to_bitcoin_table() {
        assert_eq!(opcode_name(0x76), "OP_DUP");
        assert_eq!(opcode_name(0xac), "OP_CHECKSIG");
        assert_eq!(opcode_name(0xab), "OP_CODESEPARATOR");
    }
}
