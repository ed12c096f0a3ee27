//! Byte reader.

use crate::error::{Result, StorageError};
use byteorder::{ByteOrder, LittleEndian};

/// Bounds-checked little-endian reader over a byte slice
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    /// Move the read position
    pub fn seek(&mut self, offset: usize) {
        self.offset = offset;
    }

    pub fn position(&self) -> usize {
        self.offset
    }

    /// Bytes left after the read position
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.offset)
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(count)
            .filter(|end| *end <= self.buf.len())
            .ok_or(StorageError::Truncated {
                offset: self.offset,
                needed: count,
                available: self.remaining(),
            })?;

        let slice = &self.buf[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    /// Read `count` raw bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        self.take(count)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_u24(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u24(self.take(3)?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(LittleEndian::read_i64(self.take(8)?))
    }

    /// Read a byte sequence with a 24-bit length prefix
    pub fn read_chunk(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u24()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Read a string with a 16-bit length prefix
    pub fn read_str(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| StorageError::corruption(format!("invalid UTF-8 string: {}", e)))
    }
}
