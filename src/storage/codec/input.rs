use crate::common::config::MAX_VARINT_LEN;
use crate::common::exception::CodecError;
use crate::storage::codec::output::VariableByteOutput;
use bytes::Bytes;
use integer_encoding::VarInt;
use log::debug;
use std::fmt;

/// Sequential reader over variable-byte encoded data.
///
/// Every read either returns a value, `CodecError::EndOfData` when the input is
/// exhausted exactly at a value boundary, or `CodecError::Truncated` when a value
/// starts but its bytes run out. A failed read never moves the cursor.
#[derive(Clone)]
pub struct VariableByteInput {
    data: Bytes,
    pos: usize,
}

impl VariableByteInput {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }

    pub fn from_bytes(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    fn unread(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    /// Length in bytes of the varint starting at `offset` bytes past the cursor.
    fn varint_len_at(&self, offset: usize) -> Result<usize, CodecError> {
        let rest = &self.data[self.pos + offset..];
        if rest.is_empty() {
            return Err(CodecError::EndOfData);
        }
        for (i, byte) in rest.iter().take(MAX_VARINT_LEN).enumerate() {
            if byte & 0x80 == 0 {
                return Ok(i + 1);
            }
        }
        if rest.len() >= MAX_VARINT_LEN {
            Err(CodecError::VarIntOverflow { width: 64 })
        } else {
            Err(CodecError::Truncated {
                needed: rest.len() + 1,
                available: rest.len(),
            })
        }
    }

    /// Byte span of `count` consecutive varints, without consuming them.
    fn varints_span(&self, count: usize) -> Result<usize, CodecError> {
        let mut span = 0;
        for i in 0..count {
            span += self.varint_len_at(span).map_err(|e| match e {
                CodecError::EndOfData if i > 0 => e.into_truncated(),
                other => other,
            })?;
        }
        Ok(span)
    }

    /// Byte span of `count` consecutive length-prefixed strings.
    fn strings_span(&self, count: usize) -> Result<usize, CodecError> {
        let mut span = 0;
        for i in 0..count {
            let prefix = self.varint_len_at(span).map_err(|e| match e {
                CodecError::EndOfData if i > 0 => e.into_truncated(),
                other => other,
            })?;
            let (len, _) = u64::decode_var(&self.data[self.pos + span..self.pos + span + prefix])
                .ok_or(CodecError::VarIntOverflow { width: 64 })?;
            let len = usize::try_from(len).map_err(|_| CodecError::VarIntOverflow { width: 64 })?;
            let available = self.remaining() - span - prefix;
            if len > available {
                return Err(CodecError::Truncated {
                    needed: len,
                    available,
                });
            }
            span += prefix + len;
        }
        Ok(span)
    }

    fn read_unsigned(&mut self) -> Result<u64, CodecError> {
        let len = self.varint_len_at(0)?;
        let (value, used) = u64::decode_var(&self.unread()[..len])
            .ok_or(CodecError::VarIntOverflow { width: 64 })?;
        debug_assert_eq!(used, len);
        self.pos += len;
        Ok(value)
    }

    fn read_signed(&mut self) -> Result<i64, CodecError> {
        let len = self.varint_len_at(0)?;
        let (value, _) = i64::decode_var(&self.unread()[..len])
            .ok_or(CodecError::VarIntOverflow { width: 64 })?;
        self.pos += len;
        Ok(value)
    }

    /// Reads a varint and narrows it, leaving the cursor untouched if it does not fit.
    fn read_narrowed<T: TryFrom<u64>>(&mut self, width: u32) -> Result<T, CodecError> {
        let start = self.pos;
        let value = self.read_unsigned()?;
        T::try_from(value).map_err(|_| {
            self.pos = start;
            CodecError::VarIntOverflow { width }
        })
    }

    fn read_narrowed_signed<T: TryFrom<i64>>(&mut self, width: u32) -> Result<T, CodecError> {
        let start = self.pos;
        let value = self.read_signed()?;
        T::try_from(value).map_err(|_| {
            self.pos = start;
            CodecError::VarIntOverflow { width }
        })
    }

    fn take(&mut self, len: usize) -> Result<Bytes, CodecError> {
        if len > self.remaining() {
            return Err(CodecError::Truncated {
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = self.data.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(slice)
    }

    pub fn read_byte(&mut self) -> Result<u8, CodecError> {
        let byte = *self.unread().first().ok_or(CodecError::EndOfData)?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        self.read_narrowed(16)
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        self.read_narrowed(32)
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        self.read_unsigned()
    }

    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        self.read_narrowed_signed(16)
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.read_narrowed_signed(32)
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        self.read_signed()
    }

    pub fn read_fixed_u32(&mut self) -> Result<u32, CodecError> {
        if !self.has_remaining() {
            return Err(CodecError::EndOfData);
        }
        let bytes = self.take(4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes);
        Ok(u32::from_be_bytes(raw))
    }

    pub fn read_fixed_u64(&mut self) -> Result<u64, CodecError> {
        if !self.has_remaining() {
            return Err(CodecError::EndOfData);
        }
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes);
        Ok(u64::from_be_bytes(raw))
    }

    /// Reads a length-prefixed byte block without copying it.
    pub fn read_bytes(&mut self) -> Result<Bytes, CodecError> {
        let start = self.pos;
        let len = self.read_unsigned()?;
        let len = usize::try_from(len).map_err(|_| CodecError::VarIntOverflow { width: 64 })?;
        self.take(len).map_err(|e| {
            self.pos = start;
            e
        })
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let start = self.pos;
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|e| {
            self.pos = start;
            CodecError::from(e)
        })
    }

    /// Advances past `count` varints without decoding them.
    pub fn skip(&mut self, count: usize) -> Result<(), CodecError> {
        let span = self.varints_span(count)?;
        self.pos += span;
        Ok(())
    }

    /// Advances past `count` length-prefixed strings.
    pub fn skip_strings(&mut self, count: usize) -> Result<(), CodecError> {
        let span = self.strings_span(count)?;
        self.pos += span;
        Ok(())
    }

    pub fn skip_bytes(&mut self, len: usize) -> Result<(), CodecError> {
        self.take(len).map(|_| ())
    }

    /// Copies one varint verbatim and returns its value, e.g. a list count the
    /// caller needs in order to copy the items that follow.
    pub fn copy_u64_to(&mut self, dest: &mut VariableByteOutput) -> Result<u64, CodecError> {
        let len = self.varint_len_at(0)?;
        let encoded = &self.unread()[..len];
        let (value, _) =
            u64::decode_var(encoded).ok_or(CodecError::VarIntOverflow { width: 64 })?;
        dest.put_raw(encoded);
        self.pos += len;
        Ok(value)
    }

    /// Moves the cursor back to an earlier `position()`.
    pub(crate) fn rewind(&mut self, pos: usize) {
        debug_assert!(pos <= self.pos);
        self.pos = pos;
    }

    /// Copies the raw encoding of `count` varints into `dest` without decoding.
    ///
    /// Either all `count` values are copied or, on error, nothing is.
    pub fn copy_to(
        &mut self,
        dest: &mut VariableByteOutput,
        count: usize,
    ) -> Result<(), CodecError> {
        let span = self.varints_span(count)?;
        dest.put_raw(&self.unread()[..span]);
        self.pos += span;
        Ok(())
    }

    /// Copies `count` length-prefixed strings byte for byte.
    pub fn copy_strings_to(
        &mut self,
        dest: &mut VariableByteOutput,
        count: usize,
    ) -> Result<(), CodecError> {
        let span = self.strings_span(count)?;
        dest.put_raw(&self.unread()[..span]);
        self.pos += span;
        Ok(())
    }

    /// Copies exactly `len` raw bytes.
    pub fn copy_raw_to(
        &mut self,
        dest: &mut VariableByteOutput,
        len: usize,
    ) -> Result<(), CodecError> {
        let bytes = self.take(len)?;
        dest.put_raw(&bytes);
        Ok(())
    }

    /// Reads a varint count prefix and returns a cursor over that many items.
    pub fn counted(&mut self) -> Result<CountedList<'_>, CodecError> {
        let declared = self.read_unsigned()?;
        let declared =
            usize::try_from(declared).map_err(|_| CodecError::VarIntOverflow { width: 64 })?;
        Ok(CountedList {
            input: self,
            declared,
            consumed: 0,
        })
    }

    /// Reads exactly `count` items with `read_item`.
    ///
    /// Running out of bytes before `count` items is a `Truncated` error, never a
    /// clean end.
    pub fn read_n<T, F>(&mut self, count: usize, mut read_item: F) -> Result<Vec<T>, CodecError>
    where
        F: FnMut(&mut Self) -> Result<T, CodecError>,
    {
        // A corrupt count must not drive a huge allocation.
        let mut items = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            items.push(read_item(self).map_err(CodecError::into_truncated)?);
        }
        Ok(items)
    }

    /// Reads a varint count prefix followed by that many items.
    pub fn read_counted<T, F>(&mut self, read_item: F) -> Result<Vec<T>, CodecError>
    where
        F: FnMut(&mut Self) -> Result<T, CodecError>,
    {
        let count = self.read_unsigned()?;
        let count = usize::try_from(count).map_err(|_| CodecError::VarIntOverflow { width: 64 })?;
        self.read_n(count, read_item)
    }

    /// Legacy list decoding: items run until the buffer is exhausted.
    ///
    /// Only for data written before lists carried a count prefix. An item that
    /// starts but cannot be completed is still reported as `Truncated`.
    pub fn read_until_exhausted<T, F>(&mut self, mut read_item: F) -> Result<Vec<T>, CodecError>
    where
        F: FnMut(&mut Self) -> Result<T, CodecError>,
    {
        let mut items = Vec::new();
        while self.has_remaining() {
            items.push(read_item(self).map_err(CodecError::into_truncated)?);
        }
        debug!(
            "decoded {} items from an EOF-terminated legacy list",
            items.len()
        );
        Ok(items)
    }
}

impl From<Bytes> for VariableByteInput {
    fn from(data: Bytes) -> Self {
        Self::from_bytes(data)
    }
}

impl From<VariableByteOutput> for VariableByteInput {
    fn from(output: VariableByteOutput) -> Self {
        Self::from_bytes(output.into_bytes())
    }
}

impl fmt::Debug for VariableByteInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VariableByteInput(pos={},len={})",
            self.pos,
            self.data.len()
        )
    }
}

/// Cursor over a count-prefixed list.
///
/// `next_item` yields `Ok(Some(_))` for each declared item, `Ok(None)` once the
/// declared count has been consumed, and `Err(Truncated)` if the bytes run out first.
pub struct CountedList<'a> {
    input: &'a mut VariableByteInput,
    declared: usize,
    consumed: usize,
}

impl<'a> CountedList<'a> {
    pub fn declared(&self) -> usize {
        self.declared
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn next_item<T, F>(&mut self, read_item: F) -> Result<Option<T>, CodecError>
    where
        F: FnOnce(&mut VariableByteInput) -> Result<T, CodecError>,
    {
        if self.consumed == self.declared {
            return Ok(None);
        }
        let item = read_item(&mut *self.input).map_err(CodecError::into_truncated)?;
        self.consumed += 1;
        Ok(Some(item))
    }

    /// Skips the items not yet read, each made of `varints_per_item` varints.
    ///
    /// A declared count the remaining bytes cannot hold is `Truncated`, checked
    /// before anything is consumed.
    pub fn skip_rest(&mut self, varints_per_item: usize) -> Result<(), CodecError> {
        let left = self.declared - self.consumed;
        let available = self.input.remaining();
        let varints = left.saturating_mul(varints_per_item);
        if varints > available {
            return Err(CodecError::Truncated {
                needed: varints,
                available,
            });
        }
        self.input
            .skip(varints)
            .map_err(CodecError::into_truncated)?;
        self.consumed = self.declared;
        Ok(())
    }

    /// Fails unless every declared item was consumed.
    pub fn finish(self) -> Result<(), CodecError> {
        if self.consumed == self.declared {
            Ok(())
        } else {
            Err(CodecError::CountMismatch {
                declared: self.declared,
                found: self.consumed,
            })
        }
    }
}
