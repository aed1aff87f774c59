//! # Collection Record Layout
//!
//! On-disk form of a collection node, written with the variable-byte codec.
//!
//! ```text
//!   ┌──────────┬───────────┬─────────────┬──────────────────┬─────────────┬─────────────┬─────────────────┐
//!   │ id       │ name      │ child count │ child names      │ permissions │ entry count │ entries         │
//!   │ varint   │ len+utf8  │ varint      │ len+utf8 × count │ varint      │ varint      │ EntryRecord × n │
//!   └──────────┴───────────┴─────────────┴──────────────────┴─────────────┴─────────────┴─────────────────┘
//!
//!   EntryRecord:
//!   ┌──────────┬───────────┬───────────────┬───────────────┐
//!   │ id       │ name      │ resource type │ last modified │
//!   │ varint   │ len+utf8  │ 1 byte        │ varint        │
//!   └──────────┴───────────┴───────────────┴───────────────┘
//! ```
//!
//! Legacy records omit the entry count; their entries run to the end of the
//! buffer. They are still readable through [`CollectionRecord::decode_legacy`] and
//! are rewritten in the counted form by [`CollectionRecord::upgrade_legacy`].

use crate::common::config::ObjectId;
use crate::common::exception::CodecError;
use crate::storage::codec::{VariableByteInput, VariableByteOutput};
use bytes::Bytes;

pub const RESOURCE_XML: u8 = 0;
pub const RESOURCE_BINARY: u8 = 1;

pub const DEFAULT_PERMISSIONS: u32 = 0o755;

/// One document inside a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    pub id: ObjectId,
    pub name: String,
    pub resource_type: u8,
    pub last_modified: u64,
}

impl EntryRecord {
    pub fn new(
        id: ObjectId,
        name: impl Into<String>,
        resource_type: u8,
        last_modified: u64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            resource_type,
            last_modified,
        }
    }

    pub fn encode(&self, out: &mut VariableByteOutput) {
        out.write_u64(self.id);
        out.write_string(&self.name);
        out.write_byte(self.resource_type);
        out.write_u64(self.last_modified);
    }

    pub fn decode(input: &mut VariableByteInput) -> Result<Self, CodecError> {
        Ok(Self {
            id: input.read_u64()?,
            name: input.read_string()?,
            resource_type: input.read_byte()?,
            last_modified: input.read_u64()?,
        })
    }

    /// Advances past one encoded entry.
    pub fn skip(input: &mut VariableByteInput) -> Result<(), CodecError> {
        input.skip(1)?;
        input.skip_strings(1)?;
        input.skip_bytes(1)?;
        input.skip(1)
    }

    /// Copies one encoded entry byte for byte.
    pub fn copy(
        input: &mut VariableByteInput,
        out: &mut VariableByteOutput,
    ) -> Result<(), CodecError> {
        input.copy_to(out, 1)?;
        input.copy_strings_to(out, 1)?;
        input.copy_raw_to(out, 1)?;
        input.copy_to(out, 1)
    }

    pub fn approx_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.name.len()
    }
}

/// Everything in a record before the entry list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub id: ObjectId,
    pub name: String,
    pub children: Vec<String>,
    pub permissions: u32,
}

/// Persisted state of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRecord {
    pub id: ObjectId,
    pub name: String,
    pub children: Vec<String>,
    pub permissions: u32,
    pub entries: Vec<EntryRecord>,
}

impl CollectionRecord {
    pub fn new(id: ObjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            children: Vec::new(),
            permissions: DEFAULT_PERMISSIONS,
            entries: Vec::new(),
        }
    }

    pub fn encode(&self, out: &mut VariableByteOutput) {
        self.encode_header(out);
        out.write_u64(self.entries.len() as u64);
        for entry in &self.entries {
            entry.encode(out);
        }
    }

    /// Encodes without the entry count, the way old records were written.
    pub fn encode_legacy(&self, out: &mut VariableByteOutput) {
        self.encode_header(out);
        for entry in &self.entries {
            entry.encode(out);
        }
    }

    fn encode_header(&self, out: &mut VariableByteOutput) {
        out.write_u64(self.id);
        out.write_string(&self.name);
        out.write_u64(self.children.len() as u64);
        for child in &self.children {
            out.write_string(child);
        }
        out.write_u32(self.permissions);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut out = VariableByteOutput::with_capacity(self.approx_encoded_len());
        self.encode(&mut out);
        out.into_bytes()
    }

    pub fn decode(input: &mut VariableByteInput) -> Result<Self, CodecError> {
        let header = Self::read_header(input)?;
        let entries = input
            .read_counted(EntryRecord::decode)
            .map_err(CodecError::into_truncated)?;
        Ok(Self::from_parts(header, entries))
    }

    /// Decodes a record whose entries are terminated by the end of the buffer.
    pub fn decode_legacy(input: &mut VariableByteInput) -> Result<Self, CodecError> {
        let header = Self::read_header(input)?;
        let entries = input.read_until_exhausted(EntryRecord::decode)?;
        Ok(Self::from_parts(header, entries))
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self, CodecError> {
        let mut input = VariableByteInput::new(data);
        Self::decode(&mut input)
    }

    /// Rewrites a legacy record in the count-prefixed form.
    pub fn upgrade_legacy(data: impl Into<Bytes>) -> Result<Bytes, CodecError> {
        let mut input = VariableByteInput::new(data);
        Ok(Self::decode_legacy(&mut input)?.to_bytes())
    }

    /// Reads identity, name, children and permissions, leaving the input at the
    /// entry count.
    ///
    /// An empty input is `EndOfData`; a header cut short is `Truncated`.
    pub fn read_header(input: &mut VariableByteInput) -> Result<RecordHeader, CodecError> {
        let id = input.read_u64()?;
        let rest = (|| -> Result<RecordHeader, CodecError> {
            let name = input.read_string()?;
            let children = input.read_counted(|input| input.read_string())?;
            let permissions = input.read_u32()?;
            Ok(RecordHeader {
                id,
                name,
                children,
                permissions,
            })
        })();
        rest.map_err(CodecError::into_truncated)
    }

    /// Skips the count-prefixed entry list, returning how many entries it held.
    pub fn skip_entries(input: &mut VariableByteInput) -> Result<usize, CodecError> {
        let mut entries = input.counted().map_err(CodecError::into_truncated)?;
        while entries.next_item(EntryRecord::skip)?.is_some() {}
        let skipped = entries.consumed();
        entries.finish()?;
        Ok(skipped)
    }

    /// Copies the count-prefixed entry list to `out` without decoding the entries.
    ///
    /// On error neither `input` nor `out` has moved.
    pub fn copy_entries(
        input: &mut VariableByteInput,
        out: &mut VariableByteOutput,
    ) -> Result<usize, CodecError> {
        Self::copy_atomically(input, out, Self::copy_entry_list)
    }

    /// Copies a whole record byte for byte, counts included.
    ///
    /// A clean end of input is `EndOfData`. On any error neither `input` nor
    /// `out` has moved, so a migration can skip a damaged record.
    pub fn copy_record(
        input: &mut VariableByteInput,
        out: &mut VariableByteOutput,
    ) -> Result<(), CodecError> {
        Self::copy_atomically(input, out, |input, out| {
            input.copy_to(out, 1)?;
            let rest = (|| -> Result<(), CodecError> {
                input.copy_strings_to(out, 1)?;
                let children = input.copy_u64_to(out)?;
                let children = usize::try_from(children)
                    .map_err(|_| CodecError::VarIntOverflow { width: 64 })?;
                input.copy_strings_to(out, children)?;
                input.copy_to(out, 1)?;
                Self::copy_entry_list(input, out).map(|_| ())
            })();
            rest.map_err(CodecError::into_truncated)
        })
    }

    fn copy_entry_list(
        input: &mut VariableByteInput,
        out: &mut VariableByteOutput,
    ) -> Result<usize, CodecError> {
        let count = input.copy_u64_to(out).map_err(CodecError::into_truncated)?;
        let mut entries = 0;
        while entries < count {
            EntryRecord::copy(input, out).map_err(CodecError::into_truncated)?;
            entries += 1;
        }
        Ok(entries as usize)
    }

    fn copy_atomically<R>(
        input: &mut VariableByteInput,
        out: &mut VariableByteOutput,
        copy: impl FnOnce(&mut VariableByteInput, &mut VariableByteOutput) -> Result<R, CodecError>,
    ) -> Result<R, CodecError> {
        let position = input.position();
        let written = out.len();
        copy(&mut *input, &mut *out).map_err(|e| {
            input.rewind(position);
            out.truncate(written);
            e
        })
    }

    pub fn header(&self) -> RecordHeader {
        RecordHeader {
            id: self.id,
            name: self.name.clone(),
            children: self.children.clone(),
            permissions: self.permissions,
        }
    }

    fn from_parts(header: RecordHeader, entries: Vec<EntryRecord>) -> Self {
        Self {
            id: header.id,
            name: header.name,
            children: header.children,
            permissions: header.permissions,
            entries,
        }
    }

    fn approx_encoded_len(&self) -> usize {
        let children: usize = self.children.iter().map(|c| c.len() + 2).sum();
        let entries: usize = self.entries.iter().map(|e| e.name.len() + 16).sum();
        32 + self.name.len() + children + entries
    }
}
