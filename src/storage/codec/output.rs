use crate::common::config::MAX_VARINT_LEN;
use bytes::{BufMut, Bytes, BytesMut};
use integer_encoding::VarInt;
use std::fmt;

/// Append-only writer for the variable-byte format.
///
/// Unsigned integers are LEB128-style varints (7 payload bits per byte, high bit
/// set on every byte but the last). Signed integers are zig-zag mapped first so
/// small negative values stay short. Strings and byte blocks carry a varint
/// length prefix.
#[derive(Default, Clone)]
pub struct VariableByteOutput {
    buf: BytesMut,
}

impl VariableByteOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    fn put_unsigned(&mut self, value: u64) {
        let mut scratch = [0u8; MAX_VARINT_LEN];
        let written = value.encode_var(&mut scratch);
        debug_assert_eq!(written, value.required_space());
        self.buf.put_slice(&scratch[..written]);
    }

    fn put_signed(&mut self, value: i64) {
        let mut scratch = [0u8; MAX_VARINT_LEN];
        let written = value.encode_var(&mut scratch);
        self.buf.put_slice(&scratch[..written]);
    }

    pub fn write_byte(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.put_unsigned(u64::from(value));
    }

    pub fn write_u32(&mut self, value: u32) {
        self.put_unsigned(u64::from(value));
    }

    pub fn write_u64(&mut self, value: u64) {
        self.put_unsigned(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.put_signed(i64::from(value));
    }

    pub fn write_i32(&mut self, value: i32) {
        self.put_signed(i64::from(value));
    }

    pub fn write_i64(&mut self, value: i64) {
        self.put_signed(value);
    }

    /// Big-endian, always four bytes.
    pub fn write_fixed_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    /// Big-endian, always eight bytes.
    pub fn write_fixed_u64(&mut self, value: u64) {
        self.buf.put_u64(value);
    }

    /// Writes the UTF-8 byte length as a varint followed by the bytes.
    pub fn write_string(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    pub fn write_bytes(&mut self, value: &[u8]) {
        self.put_unsigned(value.len() as u64);
        self.buf.put_slice(value);
    }

    /// Appends already-encoded bytes verbatim.
    pub(crate) fn put_raw(&mut self, encoded: &[u8]) {
        self.buf.put_slice(encoded);
    }

    /// Drops everything written after the first `len` bytes.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Copies the encoded bytes out, leaving the writer intact.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buf)
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl fmt::Debug for VariableByteOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VariableByteOutput(len={},cap={})",
            self.buf.len(),
            self.buf.capacity()
        )
    }
}
