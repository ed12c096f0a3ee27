//! Store file header.
//!
//! The page-0 region of the data file holds the metadata records of the
//! three stacked layers (stream pager, internal pager, blob index), so a
//! store can be reopened where its last `save` left it.

use crate::btree::BTreeMeta;
use crate::codec::{ByteReader, ByteWriter};
use crate::error::{Result, StorageError};
use crate::pager::{InternalPagerMeta, StreamPagerMeta};

/// Magic bytes to identify a valid store file
pub const MAGIC: &[u8; 16] = b"PageChainStore1\0";

/// Bytes of the page-0 region reserved for the header
pub const STORE_HEADER_SIZE: usize = 128;

/// Bytes covered by the checksum
const CHECKSUMMED_LEN: usize =
    16 + 4 + StreamPagerMeta::SIZE + InternalPagerMeta::SIZE + BTreeMeta::SIZE;

/// Store file header
///
/// Layout:
/// ```text
/// Offset  Size  Description
/// 0       16    Magic string "PageChainStore1\0"
/// 16      4     Outer page size
/// 20      12    Stream pager metadata
/// 32      14    Internal pager metadata
/// 46      16    Blob index metadata
/// 62      4     Checksum of the bytes above (CRC32)
/// ```
///
/// All-zero metadata records mean the layer has never been saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreHeader {
    /// Outer page size in bytes
    pub page_size: u32,
    pub stream_meta: Vec<u8>,
    pub internal_meta: Vec<u8>,
    pub index_meta: Vec<u8>,
}

impl StoreHeader {
    /// Create a header for an empty store
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            stream_meta: vec![0u8; StreamPagerMeta::SIZE],
            internal_meta: vec![0u8; InternalPagerMeta::SIZE],
            index_meta: vec![0u8; BTreeMeta::SIZE],
        }
    }

    /// Read a header from the start of the page-0 region
    pub fn read(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CHECKSUMMED_LEN + 4 {
            return Err(StorageError::invalid_db("header too short"));
        }

        if &bytes[0..16] != MAGIC {
            return Err(StorageError::invalid_db("invalid magic bytes"));
        }

        let mut r = ByteReader::new(bytes);
        r.seek(CHECKSUMMED_LEN);
        let stored_checksum = r.read_u32()?;
        let computed_checksum = crc32fast::hash(&bytes[..CHECKSUMMED_LEN]);
        if stored_checksum != computed_checksum {
            return Err(StorageError::corruption("header checksum mismatch"));
        }

        r.seek(16);
        let page_size = r.read_u32()?;
        let stream_meta = r.read_bytes(StreamPagerMeta::SIZE)?.to_vec();
        let internal_meta = r.read_bytes(InternalPagerMeta::SIZE)?.to_vec();
        let index_meta = r.read_bytes(BTreeMeta::SIZE)?.to_vec();

        Ok(Self {
            page_size,
            stream_meta,
            internal_meta,
            index_meta,
        })
    }

    /// Encode this header into the reserved region
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::fixed(STORE_HEADER_SIZE);
        w.write_bytes(MAGIC);
        w.write_u32(self.page_size);
        write_record(&mut w, &self.stream_meta, StreamPagerMeta::SIZE);
        write_record(&mut w, &self.internal_meta, InternalPagerMeta::SIZE);
        write_record(&mut w, &self.index_meta, BTreeMeta::SIZE);

        let mut bytes = w.into_bytes();
        let checksum = crc32fast::hash(&bytes[..CHECKSUMMED_LEN]);
        bytes[CHECKSUMMED_LEN..CHECKSUMMED_LEN + 4].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }
}

/// Write a metadata record into its fixed-width slot
fn write_record(w: &mut ByteWriter, record: &[u8], width: usize) {
    let start = w.position();
    w.write_bytes(&record[..record.len().min(width)]);
    w.seek(start + width);
}
