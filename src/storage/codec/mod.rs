//! # Variable-Byte Codec
//!
//! Compact, self-delimiting encoding used for every persisted structure.
//!
//! ```text
//!   value            encoded bytes (hex)
//!   ─────────────    ───────────────────
//!   0                00
//!   127              7F
//!   128              80 01
//!   16384            80 80 01
//!   "abc"            03 61 62 63        (varint length + UTF-8)
//!   -1 (signed)      01                 (zig-zag, then varint)
//! ```
//!
//! Readers never need to know a value's width in advance, only its declared type.
//! Because each varint ends at the first byte without the high bit, the input side
//! can [`skip`](VariableByteInput::skip) values or
//! [`copy`](VariableByteInput::copy_to) their raw encoding to another stream
//! without decoding them, which is what bulk record migration relies on.
//!
//! Lists are count-prefixed. Decoding distinguishes a clean end of data from
//! truncation, see [`CountedList`]. EOF-terminated lists are only read through
//! [`VariableByteInput::read_until_exhausted`] for old data.

pub mod input;
pub mod output;

pub use input::{CountedList, VariableByteInput};
pub use output::VariableByteOutput;
