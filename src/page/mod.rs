//! Page layer: the on-page format of chain pages.
//!
//! A chain page is a fixed-size page holding:
//! - a 16-byte header (type tag, index in chain, content length, next link)
//! - up to `page_size - 16` content bytes
//! - zero padding up to the page size

mod header;

pub use header::ChainPageHeader;

use crate::types::{CHAIN_PAGE_HEADER_SIZE, PAYLOAD_HEADER_SIZE};

/// Content bytes one chain page can carry
pub fn content_capacity(page_size: usize) -> usize {
    page_size.saturating_sub(CHAIN_PAGE_HEADER_SIZE)
}

/// Number of chain pages a payload of `len` bytes occupies.
///
/// The payload header region is chunked along with the content, so even an
/// empty payload takes one page.
pub fn pages_needed(page_size: usize, len: usize) -> usize {
    let capacity = content_capacity(page_size).max(1);
    (PAYLOAD_HEADER_SIZE + len).div_ceil(capacity).max(1)
}

/// Assemble a chain page: header followed by its content
pub fn build_chain_page(header: &ChainPageHeader, content: &[u8]) -> Vec<u8> {
    let mut page = Vec::with_capacity(CHAIN_PAGE_HEADER_SIZE + content.len());
    page.extend_from_slice(&header.to_bytes());
    page.extend_from_slice(content);
    page
}
