//! Byte writer.

use super::{MAX_CHUNK_LEN, MAX_STR_LEN};
use crate::error::{Result, StorageError};
use byteorder::{ByteOrder, LittleEndian};

/// Initial capacity of a growable writer
const INITIAL_CAPACITY: usize = 1024;

/// Minimum growth step of a growable writer
const GROW_STEP: usize = 4096;

/// Little-endian writer over a growable or fixed buffer
#[derive(Debug, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
    /// Current write position
    offset: usize,
    /// Furthest position reached by a write or a seek
    end: usize,
    fixed: bool,
    overflowed: bool,
}

impl ByteWriter {
    /// Create a growable writer
    pub fn new() -> Self {
        Self {
            buf: vec![0u8; INITIAL_CAPACITY],
            offset: 0,
            end: 0,
            fixed: false,
            overflowed: false,
        }
    }

    /// Create a writer over a zeroed buffer of exactly `len` bytes.
    ///
    /// Writes that do not fit are logged and skipped.
    pub fn fixed(len: usize) -> Self {
        Self {
            buf: vec![0u8; len],
            offset: 0,
            end: len,
            fixed: true,
            overflowed: false,
        }
    }

    /// Move the write position
    pub fn seek(&mut self, offset: usize) {
        self.offset = offset;
        if !self.fixed {
            self.end = self.end.max(offset);
        }
    }

    /// Current write position
    pub fn position(&self) -> usize {
        self.offset
    }

    /// Whether a write was dropped because it did not fit a fixed buffer
    pub fn is_overflowed(&self) -> bool {
        self.overflowed
    }

    /// Make room for `size` bytes at the current position
    fn reserve(&mut self, size: usize) -> bool {
        let needed = self.offset + size;
        if needed <= self.buf.len() {
            return true;
        }

        if self.fixed {
            tracing::warn!(
                offset = self.offset,
                size,
                capacity = self.buf.len(),
                "write past the end of a fixed buffer ignored"
            );
            self.overflowed = true;
            return false;
        }

        let grow = GROW_STEP.max(needed - self.buf.len());
        self.buf.resize(self.buf.len() + grow, 0);
        true
    }

    fn put(&mut self, bytes: &[u8]) {
        if !self.reserve(bytes.len()) {
            return;
        }
        self.buf[self.offset..self.offset + bytes.len()].copy_from_slice(bytes);
        self.offset += bytes.len();
        self.end = self.end.max(self.offset);
    }

    /// Write raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.put(bytes);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.put(&[value]);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        let mut tmp = [0u8; 2];
        LittleEndian::write_u16(&mut tmp, value);
        self.put(&tmp);
    }

    /// Write the low 24 bits of `value`
    pub fn write_u24(&mut self, value: u32) {
        let mut tmp = [0u8; 3];
        LittleEndian::write_u24(&mut tmp, value & 0x00FF_FFFF);
        self.put(&tmp);
    }

    pub fn write_u32(&mut self, value: u32) {
        let mut tmp = [0u8; 4];
        LittleEndian::write_u32(&mut tmp, value);
        self.put(&tmp);
    }

    pub fn write_u64(&mut self, value: u64) {
        let mut tmp = [0u8; 8];
        LittleEndian::write_u64(&mut tmp, value);
        self.put(&tmp);
    }

    pub fn write_i64(&mut self, value: i64) {
        let mut tmp = [0u8; 8];
        LittleEndian::write_i64(&mut tmp, value);
        self.put(&tmp);
    }

    /// Write a byte sequence with a 24-bit length prefix
    pub fn write_chunk(&mut self, value: &[u8]) -> Result<()> {
        if value.len() > MAX_CHUNK_LEN {
            return Err(StorageError::ValueTooLarge {
                size: value.len(),
                max: MAX_CHUNK_LEN,
            });
        }
        self.write_u24(value.len() as u32);
        self.put(value);
        Ok(())
    }

    /// Write a string with a 16-bit length prefix
    pub fn write_str(&mut self, value: &str) -> Result<()> {
        if value.len() > MAX_STR_LEN {
            return Err(StorageError::ValueTooLarge {
                size: value.len(),
                max: MAX_STR_LEN,
            });
        }
        self.write_u16(value.len() as u16);
        self.put(value.as_bytes());
        Ok(())
    }

    /// Finish writing.
    ///
    /// A growable writer yields everything up to the furthest position
    /// reached; a fixed writer yields its whole buffer.
    pub fn into_bytes(mut self) -> Vec<u8> {
        if self.buf.len() < self.end {
            self.buf.resize(self.end, 0);
        }
        self.buf.truncate(self.end);
        self.buf
    }
}

impl Default for ByteWriter {
    fn default() -> Self {
        Self::new()
    }
}
