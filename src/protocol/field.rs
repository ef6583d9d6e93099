//! Resumable field decoders.
//!
//! Each decoder owns the partial state of one wire field. `poll` consumes as
//! many bytes as the field still needs from the front of `input` and returns
//! `Ok(Some(value))` once the field is complete, or `Ok(None)` when `input`
//! ran dry. Bytes already consumed stay in the decoder, so the next call
//! resumes exactly where the previous one stopped. A completed decoder resets
//! itself and can be reused for the next field of the same kind.

use std::mem;

use bytes::Buf;

use super::message::{EntryType, EntryValue};
use crate::error::{Nt3Error, Result};

/// Largest length a varint may announce (Rust allocations cap at isize::MAX).
pub const MAX_LENGTH: u64 = isize::MAX as u64;

/// Upper bound on speculative preallocation for length-prefixed fields.
const PREALLOC_LIMIT: usize = 64 * 1024;

/// A resumable wire field.
pub trait Field: Default {
    /// Decoded value.
    type Output: Clone + std::fmt::Debug;

    /// Consume bytes from `input` until the field completes or input runs out.
    fn poll(&mut self, input: &mut &[u8]) -> Result<Option<Self::Output>>;
}

/// LEB128 varint: accumulated value and bit shift persist across calls.
#[derive(Debug, Clone, Default)]
pub struct VarintField {
    value: u64,
    shift: u32,
}

impl Field for VarintField {
    type Output = u64;

    fn poll(&mut self, input: &mut &[u8]) -> Result<Option<u64>> {
        while input.has_remaining() {
            let byte = input.get_u8();
            let chunk = u64::from(byte & 0x7f);

            if self.shift >= 64 || (self.shift > 0 && chunk >> (64 - self.shift) != 0) {
                return Err(Nt3Error::LengthOverflow);
            }
            self.value |= chunk << self.shift;
            if self.value > MAX_LENGTH {
                return Err(Nt3Error::LengthOverflow);
            }
            self.shift += 7;

            if byte & 0x80 == 0 {
                let value = self.value;
                *self = Self::default();
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

/// Exactly `N` bytes.
#[derive(Debug, Clone)]
pub struct FixedField<const N: usize> {
    buf: [u8; N],
    filled: usize,
}

impl<const N: usize> Default for FixedField<N> {
    fn default() -> Self {
        Self {
            buf: [0u8; N],
            filled: 0,
        }
    }
}

impl<const N: usize> Field for FixedField<N> {
    type Output = [u8; N];

    fn poll(&mut self, input: &mut &[u8]) -> Result<Option<[u8; N]>> {
        let take = (N - self.filled).min(input.remaining());
        input.copy_to_slice(&mut self.buf[self.filled..self.filled + take]);
        self.filled += take;

        if self.filled < N {
            return Ok(None);
        }
        self.filled = 0;
        Ok(Some(self.buf))
    }
}

/// One byte, non-zero means true.
#[derive(Debug, Clone, Default)]
pub struct BoolField(FixedField<1>);

impl Field for BoolField {
    type Output = bool;

    fn poll(&mut self, input: &mut &[u8]) -> Result<Option<bool>> {
        Ok(self.0.poll(input)?.map(|[byte]| byte != 0))
    }
}

/// Eight bytes, IEEE-754 Big Endian.
#[derive(Debug, Clone, Default)]
pub struct DoubleField(FixedField<8>);

impl Field for DoubleField {
    type Output = f64;

    fn poll(&mut self, input: &mut &[u8]) -> Result<Option<f64>> {
        Ok(self.0.poll(input)?.map(f64::from_be_bytes))
    }
}

/// Varint length followed by that many opaque bytes.
///
/// Sub-state: the length is either still being read (delegated to a
/// [`VarintField`]) or known with some of the bytes accumulated.
#[derive(Debug, Clone, Default)]
pub struct BytesField {
    length: VarintField,
    expected: Option<usize>,
    data: Vec<u8>,
}

impl Field for BytesField {
    type Output = Vec<u8>;

    fn poll(&mut self, input: &mut &[u8]) -> Result<Option<Vec<u8>>> {
        let expected = match self.expected {
            Some(expected) => expected,
            None => match self.length.poll(input)? {
                Some(length) => {
                    let length = usize::try_from(length).map_err(|_| Nt3Error::LengthOverflow)?;
                    self.data = Vec::with_capacity(length.min(PREALLOC_LIMIT));
                    self.expected = Some(length);
                    length
                }
                None => return Ok(None),
            },
        };

        let take = (expected - self.data.len()).min(input.remaining());
        self.data.extend_from_slice(&input.chunk()[..take]);
        input.advance(take);

        if self.data.len() < expected {
            return Ok(None);
        }
        self.expected = None;
        Ok(Some(mem::take(&mut self.data)))
    }
}

/// Length-prefixed UTF-8 string.
#[derive(Debug, Clone, Default)]
pub struct StringField(BytesField);

impl Field for StringField {
    type Output = String;

    fn poll(&mut self, input: &mut &[u8]) -> Result<Option<String>> {
        match self.0.poll(input)? {
            Some(bytes) => Ok(Some(String::from_utf8(bytes)?)),
            None => Ok(None),
        }
    }
}

/// One-byte element count followed by `count` elements of `F`.
///
/// Element decoding reuses the scalar decoder, so a torn element resumes
/// inside the element.
#[derive(Debug, Clone)]
pub struct ArrayField<F: Field> {
    count: FixedField<1>,
    expected: Option<usize>,
    element: F,
    items: Vec<F::Output>,
}

impl<F: Field> Default for ArrayField<F> {
    fn default() -> Self {
        Self {
            count: FixedField::default(),
            expected: None,
            element: F::default(),
            items: Vec::new(),
        }
    }
}

#[cfg(test)]
impl<F: Field> ArrayField<F> {
    /// Elements decoded so far.
    fn decoded(&self) -> usize {
        self.items.len()
    }
}

impl<F: Field> Field for ArrayField<F> {
    type Output = Vec<F::Output>;

    fn poll(&mut self, input: &mut &[u8]) -> Result<Option<Vec<F::Output>>> {
        let expected = match self.expected {
            Some(expected) => expected,
            None => match self.count.poll(input)? {
                Some([count]) => {
                    let count = usize::from(count);
                    self.items = Vec::with_capacity(count);
                    self.expected = Some(count);
                    count
                }
                None => return Ok(None),
            },
        };

        while self.items.len() < expected {
            match self.element.poll(input)? {
                Some(item) => self.items.push(item),
                None => return Ok(None),
            }
        }
        self.expected = None;
        Ok(Some(mem::take(&mut self.items)))
    }
}

/// A typed entry value, selected by the entry type tag.
#[derive(Debug, Clone)]
pub enum ValueField {
    Bool(BoolField),
    Double(DoubleField),
    String(StringField),
    Raw(BytesField),
    BoolArray(ArrayField<BoolField>),
    DoubleArray(ArrayField<DoubleField>),
    StringArray(ArrayField<StringField>),
    RpcDefinition(BytesField),
}

impl ValueField {
    /// Start decoding a value of the given type.
    ///
    /// [`EntryType::Unknown`] has no wire representation and is rejected.
    pub fn new(entry_type: EntryType) -> Result<Self> {
        Ok(match entry_type {
            EntryType::Bool => ValueField::Bool(BoolField::default()),
            EntryType::Double => ValueField::Double(DoubleField::default()),
            EntryType::String => ValueField::String(StringField::default()),
            EntryType::Raw => ValueField::Raw(BytesField::default()),
            EntryType::BoolArray => ValueField::BoolArray(ArrayField::default()),
            EntryType::DoubleArray => ValueField::DoubleArray(ArrayField::default()),
            EntryType::StringArray => ValueField::StringArray(ArrayField::default()),
            EntryType::RpcDefinition => ValueField::RpcDefinition(BytesField::default()),
            EntryType::Unknown => return Err(Nt3Error::UnknownEntryType(EntryType::Unknown.tag())),
        })
    }

    /// Continue decoding the value.
    pub fn poll(&mut self, input: &mut &[u8]) -> Result<Option<EntryValue>> {
        Ok(match self {
            ValueField::Bool(f) => f.poll(input)?.map(EntryValue::Bool),
            ValueField::Double(f) => f.poll(input)?.map(EntryValue::Double),
            ValueField::String(f) => f.poll(input)?.map(EntryValue::String),
            ValueField::Raw(f) => f.poll(input)?.map(EntryValue::Raw),
            ValueField::BoolArray(f) => f.poll(input)?.map(EntryValue::BoolArray),
            ValueField::DoubleArray(f) => f.poll(input)?.map(EntryValue::DoubleArray),
            ValueField::StringArray(f) => f.poll(input)?.map(EntryValue::StringArray),
            ValueField::RpcDefinition(f) => f.poll(input)?.map(EntryValue::RpcDefinition),
        })
    }
}
