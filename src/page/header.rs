//! Chain page header structure.
//!
//! The header occupies the first bytes of every page that belongs to a
//! payload or free list chain.

use crate::codec::{ByteReader, ByteWriter};
use crate::types::{PageId, PageType, CHAIN_PAGE_HEADER_SIZE};

/// Chain page header
///
/// Layout (16 bytes reserved, little-endian):
/// ```text
/// Offset  Size  Description
/// 0       1     Page type tag
/// 1       2     Index of this page within its chain
/// 3       4     Number of content bytes on this page
/// 7       1     Has-next flag
/// 8       4     Next page id (0 if none)
/// 12      4     Reserved (zero)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainPageHeader {
    /// Type of the chain this page belongs to
    pub page_type: PageType,
    /// Position within the chain (wraps past 65535)
    pub page_index: u16,
    /// Content bytes stored after the header
    pub content_len: u32,
    /// Next page in the chain, `PageId::NONE` on the last page
    pub next_page: PageId,
}

impl ChainPageHeader {
    pub fn new(page_type: PageType, page_index: u16, content_len: u32, next_page: PageId) -> Self {
        Self {
            page_type,
            page_index,
            content_len,
            next_page,
        }
    }

    /// Whether another page follows this one
    pub fn has_next(&self) -> bool {
        self.next_page.is_some()
    }

    /// Read a header from the start of a page.
    ///
    /// Returns `None` for short buffers and for tags that are not chain
    /// page types.
    pub fn read(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < CHAIN_PAGE_HEADER_SIZE {
            return None;
        }

        let mut r = ByteReader::new(bytes);
        let page_type = PageType::from_byte(r.read_u8().ok()?)?;
        if !page_type.is_chain() {
            return None;
        }
        let page_index = r.read_u16().ok()?;
        let content_len = r.read_u32().ok()?;
        let has_next = r.read_bool().ok()?;
        let next_page = PageId::new(r.read_u32().ok()?);

        // a set flag without a target, or a target without the flag, is not
        // something this codec ever writes
        if has_next != next_page.is_some() {
            return None;
        }

        Some(Self {
            page_type,
            page_index,
            content_len,
            next_page,
        })
    }

    /// Encode this header into its reserved 16 bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::fixed(CHAIN_PAGE_HEADER_SIZE);
        w.write_u8(self.page_type as u8);
        w.write_u16(self.page_index);
        w.write_u32(self.content_len);
        w.write_bool(self.has_next());
        w.write_u32(self.next_page.value());
        w.into_bytes()
    }
}
