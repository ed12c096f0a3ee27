//! Binary codec: little-endian reader and writer over byte buffers.
//!
//! Every persisted structure in the engine (chain page headers, free lists,
//! internal pager mappings, tree node tables, metadata records) is encoded
//! with these two types.
//!
//! - [`ByteWriter`] either grows as it is written (serialization) or wraps a
//!   fixed-size buffer whose overflowing writes are reported and dropped
//!   (fixed-size metadata records).
//! - [`ByteReader`] bounds-checks every read and returns
//!   [`StorageError::Truncated`](crate::StorageError::Truncated) instead of
//!   reading past the end.

mod reader;
mod writer;

pub use reader::ByteReader;
pub use writer::ByteWriter;

/// Largest byte sequence a 24-bit length prefix can describe
pub const MAX_CHUNK_LEN: usize = 0xFF_FFFF;

/// Largest string a 16-bit length prefix can describe
pub const MAX_STR_LEN: usize = u16::MAX as usize;
