//! Stack values and the LIFO stacks the interpreter works on.

use std::borrow::Cow;

use num_bigint::{BigInt, Sign};
use num_traits::Zero;

/// A single stack element.
///
/// Numbers produced by the interpreter stay numbers until something needs
/// their bytes; pushed data stays raw. Conversions follow Bitcoin's
/// `CScriptNum` encoding: little-endian magnitude, sign in the top bit of the
/// last byte, zero encoded as the empty string. Integers are unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackValue {
    Int(BigInt),
    Bytes(Vec<u8>),
}

impl StackValue {
    /// Script truthiness (`CastToBool`).
    pub fn is_true(&self) -> bool {
        match self {
            StackValue::Int(value) => !value.is_zero(),
            StackValue::Bytes(bytes) => cast_to_bool(bytes),
        }
    }

    /// The encoded byte form of this value.
    pub fn to_bytes(&self) -> Cow<'_, [u8]> {
        match self {
            StackValue::Int(value) => Cow::Owned(encode_num(value)),
            StackValue::Bytes(bytes) => Cow::Borrowed(bytes),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            StackValue::Int(value) => encode_num(&value),
            StackValue::Bytes(bytes) => bytes,
        }
    }

    /// Interprets the value as a number. With a `max_len`, values whose
    /// encoding is longer are rejected, however they are stored.
    pub fn to_num(&self, max_len: Option<usize>) -> Option<BigInt> {
        if let Some(max_len) = max_len {
            if self.encoded_len() > max_len {
                return None;
            }
        }
        match self {
            StackValue::Int(value) => Some(value.clone()),
            StackValue::Bytes(bytes) => Some(decode_num(bytes)),
        }
    }

    /// Byte length of the encoded value.
    pub fn encoded_len(&self) -> usize {
        match self {
            StackValue::Int(value) => encode_num(value).len(),
            StackValue::Bytes(bytes) => bytes.len(),
        }
    }
}

impl From<Vec<u8>> for StackValue {
    fn from(bytes: Vec<u8>) -> Self {
        StackValue::Bytes(bytes)
    }
}

impl From<&[u8]> for StackValue {
    fn from(bytes: &[u8]) -> Self {
        StackValue::Bytes(bytes.to_vec())
    }
}

impl From<BigInt> for StackValue {
    fn from(value: BigInt) -> Self {
        StackValue::Int(value)
    }
}

impl From<i64> for StackValue {
    fn from(value: i64) -> Self {
        StackValue::Int(BigInt::from(value))
    }
}

impl From<bool> for StackValue {
    fn from(value: bool) -> Self {
        StackValue::from(value as i64)
    }
}

/// Minimal LIFO stack used for both the main and the alt stack.
///
/// Accessors never panic: reads past the bottom return `None`, so every
/// opcode handler can check depth before mutating anything.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScriptStack {
    items: Vec<StackValue>,
}

impl ScriptStack {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn from_items(items: Vec<StackValue>) -> Self {
        Self { items }
    }

    pub fn push(&mut self, value: impl Into<StackValue>) {
        self.items.push(value.into());
    }

    pub fn pop(&mut self) -> Option<StackValue> {
        self.items.pop()
    }

    /// Element `depth` positions below the top (0 is the top).
    pub fn peek(&self, depth: usize) -> Option<&StackValue> {
        let len = self.items.len();
        if depth >= len {
            return None;
        }
        self.items.get(len - 1 - depth)
    }

    pub fn last(&self) -> Option<&StackValue> {
        self.items.last()
    }

    /// Removes and returns the element `depth` positions below the top.
    pub fn remove(&mut self, depth: usize) -> Option<StackValue> {
        let len = self.items.len();
        if depth >= len {
            return None;
        }
        Some(self.items.remove(len - 1 - depth))
    }

    /// Inserts `value` so that it ends up `depth` positions below the top.
    pub fn insert(&mut self, depth: usize, value: StackValue) -> bool {
        let len = self.items.len();
        if depth > len {
            return false;
        }
        self.items.insert(len - depth, value);
        true
    }

    /// Swaps the elements at the two depths.
    pub fn swap(&mut self, a: usize, b: usize) -> bool {
        let len = self.items.len();
        if a >= len || b >= len {
            return false;
        }
        self.items.swap(len - 1 - a, len - 1 - b);
        true
    }

    /// Drops the top `count` elements.
    pub fn truncate_top(&mut self, count: usize) -> bool {
        let len = self.items.len();
        if count > len {
            return false;
        }
        self.items.truncate(len - count);
        true
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Elements from bottom to top.
    pub fn items(&self) -> &[StackValue] {
        &self.items
    }
}

/// `CastToBool` over raw bytes: false for the empty string, all-zero strings
/// and negative zero.
pub fn cast_to_bool(data: &[u8]) -> bool {
    for (i, &byte) in data.iter().enumerate() {
        if byte != 0 {
            if i == data.len() - 1 && byte == 0x80 {
                return false;
            }
            return true;
        }
    }
    false
}

/// Encodes a number in the minimal script form.
pub fn encode_num(value: &BigInt) -> Vec<u8> {
    if value.is_zero() {
        return Vec::new();
    }

    let (sign, mut result) = value.to_bytes_le();
    let negative = sign == Sign::Minus;
    if let Some(last) = result.last_mut() {
        if *last & 0x80 != 0 {
            result.push(if negative { 0x80 } else { 0x00 });
        } else if negative {
            *last |= 0x80;
        }
    }

    result
}

/// Decodes a script number of any length. Non-minimal encodings and negative
/// zero are accepted, as in legacy consensus.
pub fn decode_num(bytes: &[u8]) -> BigInt {
    let Some((&last, _)) = bytes.split_last() else {
        return BigInt::zero();
    };

    let mut magnitude = bytes.to_vec();
    let last_index = magnitude.len() - 1;
    magnitude[last_index] = last & 0x7f;
    let value = BigInt::from_bytes_le(Sign::Plus, &magnitude);
    if last & 0x80 != 0 {
        -value
    } else {
        value
    }
}
