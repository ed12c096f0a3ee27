//! Payload chain codec.
//!
//! A payload is an arbitrary-length byte buffer stored across a linked
//! chain of pages. The reassembled stream starts with an 8-byte region
//! whose first 4 bytes hold the content length:
//!
//! ```text
//! stream = u32 total_len | 4 reserved | content...
//! page   = chain header (16) | up to page_size - 16 stream bytes
//! ```
//!
//! Rewriting a payload reuses the pages of the chain already at the
//! root, allocates more when it grows and frees the surplus when it
//! shrinks.

use super::Pager;
use crate::codec::{ByteReader, ByteWriter};
use crate::error::{Result, StorageError};
use crate::page::{build_chain_page, content_capacity, pages_needed, ChainPageHeader};
use crate::types::{PageId, PageType, CHAIN_PAGE_HEADER_SIZE, PAYLOAD_HEADER_SIZE};
use std::collections::HashSet;

/// What a payload write did to its chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainWrite {
    /// Pages the new chain occupies
    pub pages_written: usize,
    /// Pages taken from the pager beyond the old chain
    pub pages_allocated: usize,
    /// Surplus pages of the old chain handed back to the pager
    pub pages_freed: usize,
}

/// Reads and writes payload chains tagged with one page type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadCodec {
    kind: PageType,
}

impl PayloadCodec {
    pub fn new(kind: PageType) -> Self {
        Self { kind }
    }

    /// Page type this codec tags its chain pages with
    pub fn kind(&self) -> PageType {
        self.kind
    }

    /// Ids of the chain currently stored at `root`, in chain order.
    ///
    /// The walk stops at the first page that is missing, is not a chain
    /// page of this codec's type, or was already visited.
    pub fn chain<P: Pager + ?Sized>(&self, pager: &mut P, root: PageId) -> Result<Vec<PageId>> {
        let mut ids = Vec::new();
        let mut seen = HashSet::new();
        let mut current = root;

        while current.is_some() && seen.insert(current) {
            let bytes = match pager.read_page(current, CHAIN_PAGE_HEADER_SIZE) {
                Ok(bytes) => bytes,
                Err(e) if e.is_missing_page() => break,
                Err(e) => return Err(e),
            };

            let header = match ChainPageHeader::read(&bytes) {
                Some(header) if header.page_type == self.kind => header,
                _ => break,
            };

            ids.push(current);
            current = header.next_page;
        }

        Ok(ids)
    }

    /// Store `data` in the chain starting at `root`
    pub fn write<P: Pager + ?Sized>(
        &self,
        pager: &mut P,
        root: PageId,
        data: &[u8],
    ) -> Result<ChainWrite> {
        if root.is_none() {
            return Err(StorageError::invalid_operation(
                "cannot write a payload at page 0",
            ));
        }

        let total_len = u32::try_from(data.len()).map_err(|_| StorageError::ValueTooLarge {
            size: data.len(),
            max: u32::MAX as usize,
        })?;

        let page_size = pager.page_size();
        let capacity = content_capacity(page_size);
        if capacity == 0 {
            return Err(StorageError::invalid_operation(format!(
                "page size {} leaves no room for chain content",
                page_size
            )));
        }

        let mut w = ByteWriter::new();
        w.write_u32(total_len);
        w.seek(PAYLOAD_HEADER_SIZE);
        w.write_bytes(data);
        let stream = w.into_bytes();

        let needed = pages_needed(page_size, data.len());
        let existing = self.chain(pager, root)?;

        let mut ids = Vec::with_capacity(needed);
        ids.push(root);
        ids.extend(existing.iter().skip(1).take(needed - 1).copied());

        let mut summary = ChainWrite {
            pages_written: needed,
            ..ChainWrite::default()
        };

        while ids.len() < needed {
            ids.push(pager.allocate_page_id()?);
            summary.pages_allocated += 1;
        }

        for (index, chunk) in stream.chunks(capacity).enumerate() {
            let next_page = ids.get(index + 1).copied().unwrap_or(PageId::NONE);
            // indexes wrap for chains longer than 65535 pages
            let header = ChainPageHeader::new(self.kind, index as u16, chunk.len() as u32, next_page);
            pager.write_page(ids[index], &build_chain_page(&header, chunk))?;
        }

        for page_id in existing.iter().skip(needed) {
            pager.free_page_id(*page_id)?;
            summary.pages_freed += 1;
        }

        tracing::trace!(
            root = %root,
            kind = ?self.kind,
            len = data.len(),
            pages = summary.pages_written,
            allocated = summary.pages_allocated,
            freed = summary.pages_freed,
            "payload chain written"
        );

        Ok(summary)
    }

    /// Reassemble the payload stored in the chain starting at `root`
    pub fn read<P: Pager + ?Sized>(&self, pager: &mut P, root: PageId) -> Result<Vec<u8>> {
        if root.is_none() {
            return Err(StorageError::invalid_operation(
                "cannot read a payload at page 0",
            ));
        }

        let capacity = content_capacity(pager.page_size());
        let mut stream = Vec::new();
        let mut seen = HashSet::new();
        let mut current = root;
        let mut index: u16 = 0;

        while current.is_some() {
            if !seen.insert(current) {
                return Err(StorageError::ChainCycle { page_id: current });
            }

            let page = pager.read_page(current, 0)?;
            let header = match ChainPageHeader::read(&page) {
                Some(header) if header.page_type == self.kind => header,
                _ => break,
            };

            if header.page_index != index {
                return Err(StorageError::BrokenChain {
                    page_id: current,
                    expected_index: index,
                    found_index: header.page_index,
                });
            }

            let len = header.content_len as usize;
            if len > capacity || CHAIN_PAGE_HEADER_SIZE + len > page.len() {
                return Err(StorageError::corruption(format!(
                    "chain page {} declares {} content bytes, capacity is {}",
                    current, len, capacity
                )));
            }

            stream.extend_from_slice(&page[CHAIN_PAGE_HEADER_SIZE..CHAIN_PAGE_HEADER_SIZE + len]);
            current = header.next_page;
            index = index.wrapping_add(1);
        }

        if stream.len() < PAYLOAD_HEADER_SIZE {
            return Err(StorageError::PayloadTruncated {
                page_id: root,
                len: stream.len(),
            });
        }

        let expected = ByteReader::new(&stream).read_u32()? as usize;
        let actual = stream.len() - PAYLOAD_HEADER_SIZE;
        if expected != actual {
            return Err(StorageError::PayloadLengthMismatch {
                page_id: root,
                expected,
                actual,
            });
        }

        stream.drain(..PAYLOAD_HEADER_SIZE);
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::StreamPager;
    use crate::types::DEFAULT_PAGE_SIZE;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut data = vec![0u8; len];
        rng.fill(&mut data[..]);
        data
    }

    #[test]
    fn test_roundtrip_across_chain_lengths() -> Result<()> {
        let mut pager = StreamPager::in_memory(256)?;
        let codec = PayloadCodec::new(PageType::Payload);
        let capacity = content_capacity(256);

        // 1 page, 10 pages, 1000+ pages
        for (seed, len) in [(1u64, 100usize), (2, capacity * 10 - PAYLOAD_HEADER_SIZE), (3, capacity * 1000 + 17)] {
            let data = random_bytes(len, seed);
            let root = pager.allocate_page_id()?;

            let summary = codec.write(&mut pager, root, &data)?;
            assert_eq!(summary.pages_written, pages_needed(256, len));
            assert_eq!(codec.chain(&mut pager, root)?.len(), summary.pages_written);
            assert_eq!(codec.read(&mut pager, root)?, data);
        }

        Ok(())
    }

    #[test]
    fn test_megabyte_payload_on_default_pages() -> Result<()> {
        let mut pager = StreamPager::in_memory(DEFAULT_PAGE_SIZE)?;
        let codec = PayloadCodec::new(PageType::Payload);
        let data = random_bytes(1_000_000, 4);
        let root = pager.allocate_page_id()?;

        let summary = codec.write(&mut pager, root, &data)?;
        assert_eq!(summary.pages_written, pages_needed(DEFAULT_PAGE_SIZE, data.len()));
        assert_eq!(summary.pages_written, 246);
        assert_eq!(summary.pages_allocated, 245);
        assert_eq!(codec.read(&mut pager, root)?, data);

        let shorter = &data[..500_000];
        let summary = codec.write(&mut pager, root, shorter)?;
        assert_eq!(summary.pages_freed, 246 - pages_needed(DEFAULT_PAGE_SIZE, shorter.len()));
        assert_eq!(codec.read(&mut pager, root)?, shorter.to_vec());

        Ok(())
    }

    #[test]
    fn test_empty_payload() -> Result<()> {
        let mut pager = StreamPager::in_memory(128)?;
        let root = pager.allocate_page_id()?;

        pager.write_payload(root, &[])?;
        assert!(pager.read_payload(root)?.is_empty());

        Ok(())
    }

    #[test]
    fn test_rewrite_same_bytes_is_idempotent() -> Result<()> {
        let mut pager = StreamPager::in_memory(256)?;
        let codec = PayloadCodec::new(PageType::Payload);
        let root = pager.allocate_page_id()?;
        let data = random_bytes(2000, 11);

        codec.write(&mut pager, root, &data)?;
        let chain = codec.chain(&mut pager, root)?;

        let summary = codec.write(&mut pager, root, &data)?;
        assert_eq!(summary.pages_allocated, 0);
        assert_eq!(summary.pages_freed, 0);
        assert_eq!(codec.chain(&mut pager, root)?, chain);
        assert_eq!(codec.read(&mut pager, root)?, data);

        Ok(())
    }

    #[test]
    fn test_shrink_frees_surplus_pages() -> Result<()> {
        let mut pager = StreamPager::in_memory(128)?;
        let codec = PayloadCodec::new(PageType::Payload);
        let root = pager.allocate_page_id()?;

        codec.write(&mut pager, root, &random_bytes(1000, 5))?;
        let old = codec.chain(&mut pager, root)?;

        let small = random_bytes(300, 6);
        let summary = codec.write(&mut pager, root, &small)?;
        let new = codec.chain(&mut pager, root)?;

        assert_eq!(summary.pages_freed, old.len() - new.len());
        assert_eq!(pager.free_page_count(), old.len() - new.len());
        // the surviving chain is a prefix of the old one
        assert_eq!(&old[..new.len()], &new[..]);
        assert_eq!(codec.read(&mut pager, root)?, small);

        Ok(())
    }

    #[test]
    fn test_grow_then_shrink_scenario() -> Result<()> {
        let mut pager = StreamPager::in_memory(4096)?;
        let root = pager.allocate_page_id()?;
        assert_eq!(root, PageId::new(1));

        let codec = PayloadCodec::new(PageType::Payload);
        let big = vec![0xABu8; 9000];
        let summary = codec.write(&mut pager, root, &big)?;
        assert_eq!(summary.pages_written, 3);
        assert_eq!(codec.chain(&mut pager, root)?.len(), 3);
        assert_eq!(pager.read_payload(root)?, big);

        let small = vec![0xCDu8; 4000];
        let summary = codec.write(&mut pager, root, &small)?;
        assert_eq!(summary.pages_written, 1);
        assert_eq!(summary.pages_freed, 2);
        assert_eq!(codec.chain(&mut pager, root)?, vec![root]);
        assert_eq!(pager.read_payload(root)?, small);

        Ok(())
    }

    #[test]
    fn test_freed_pages_are_reused_lowest_first() -> Result<()> {
        let mut pager = StreamPager::in_memory(128)?;
        let codec = PayloadCodec::new(PageType::Payload);
        let root = pager.allocate_page_id()?;

        codec.write(&mut pager, root, &random_bytes(500, 9))?;
        let old = codec.chain(&mut pager, root)?;
        codec.write(&mut pager, root, &[1, 2, 3])?;

        let lowest_freed = old[1..].iter().min().copied();
        assert_eq!(Some(pager.allocate_page_id()?), lowest_freed);

        Ok(())
    }

    #[test]
    fn test_broken_chain_index() -> Result<()> {
        let mut pager = StreamPager::in_memory(128)?;
        let codec = PayloadCodec::new(PageType::Payload);
        let root = pager.allocate_page_id()?;
        codec.write(&mut pager, root, &random_bytes(400, 4))?;

        let chain = codec.chain(&mut pager, root)?;
        let mut page = pager.read_page(chain[1], 0)?;
        page[1] = 7;
        pager.write_page(chain[1], &page)?;

        match codec.read(&mut pager, root) {
            Err(StorageError::BrokenChain {
                page_id,
                expected_index,
                found_index,
            }) => {
                assert_eq!(page_id, chain[1]);
                assert_eq!(expected_index, 1);
                assert_eq!(found_index, 7);
            }
            other => panic!("expected a broken chain, got {:?}", other),
        }

        Ok(())
    }

    #[test]
    fn test_length_mismatch_is_an_error() -> Result<()> {
        let mut pager = StreamPager::in_memory(128)?;
        let root = pager.allocate_page_id()?;
        pager.write_payload(root, &random_bytes(300, 8))?;

        // bump the declared length stored in the payload header region
        let mut page = pager.read_page(root, 0)?;
        page[CHAIN_PAGE_HEADER_SIZE] = page[CHAIN_PAGE_HEADER_SIZE].wrapping_add(1);
        pager.write_page(root, &page)?;

        assert!(matches!(
            pager.read_payload(root),
            Err(StorageError::PayloadLengthMismatch { expected: 301, actual: 300, .. })
        ));

        Ok(())
    }

    #[test]
    fn test_cycle_is_detected() -> Result<()> {
        let mut pager = StreamPager::in_memory(128)?;
        let a = pager.allocate_page_id()?;
        let b = pager.allocate_page_id()?;

        let first = ChainPageHeader::new(PageType::Payload, 0, 8, b);
        let second = ChainPageHeader::new(PageType::Payload, 1, 8, a);
        pager.write_page(a, &build_chain_page(&first, &[0u8; 8]))?;
        pager.write_page(b, &build_chain_page(&second, &[0u8; 8]))?;

        assert!(matches!(
            pager.read_payload(a),
            Err(StorageError::ChainCycle { page_id }) if page_id == a
        ));
        // the tolerant walk just stops
        assert_eq!(PayloadCodec::new(PageType::Payload).chain(&mut pager, a)?, vec![a, b]);

        Ok(())
    }

    #[test]
    fn test_foreign_page_type_ends_the_chain() -> Result<()> {
        let mut pager = StreamPager::in_memory(128)?;
        let root = pager.allocate_page_id()?;
        pager.write_payload(root, b"payload bytes")?;

        let free_list_codec = PayloadCodec::new(PageType::FreeList);
        assert!(free_list_codec.chain(&mut pager, root)?.is_empty());
        assert!(matches!(
            free_list_codec.read(&mut pager, root),
            Err(StorageError::PayloadTruncated { len: 0, .. })
        ));

        Ok(())
    }

    #[test]
    fn test_oversized_content_len_is_corruption() -> Result<()> {
        let mut pager = StreamPager::in_memory(64)?;
        let root = pager.allocate_page_id()?;

        let header = ChainPageHeader::new(PageType::Payload, 0, 1000, PageId::NONE);
        pager.write_page(root, &header.to_bytes())?;

        assert!(matches!(
            pager.read_payload(root),
            Err(StorageError::Corruption(_))
        ));

        Ok(())
    }

    #[test]
    fn test_root_zero_is_rejected() -> Result<()> {
        let mut pager = StreamPager::in_memory(128)?;
        let codec = PayloadCodec::new(PageType::Payload);

        assert!(matches!(
            codec.write(&mut pager, PageId::NONE, b"x"),
            Err(StorageError::InvalidOperation(_))
        ));
        assert!(matches!(
            codec.read(&mut pager, PageId::NONE),
            Err(StorageError::InvalidOperation(_))
        ));

        Ok(())
    }
}
