//! Outer pager over a raw page store.

use super::Pager;
use crate::codec::{ByteReader, ByteWriter};
use crate::error::{Result, StorageError};
use crate::storage::{BackingStream, FreePageList, RawPageStore};
use crate::types::PageId;
use std::io::Cursor;
use std::path::Path;

/// Persisted state of a [`StreamPager`]
///
/// Layout (12 bytes): `u32 page_size | u32 last_page_id | u32 free_list_root`.
/// A zero record describes a pager that was never saved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamPagerMeta {
    pub page_size: u32,
    pub last_page_id: PageId,
    pub free_list_root: PageId,
}

impl StreamPagerMeta {
    pub const SIZE: usize = 12;

    pub fn read(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        Ok(Self {
            page_size: r.read_u32()?,
            last_page_id: PageId::new(r.read_u32()?),
            free_list_root: PageId::new(r.read_u32()?),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::fixed(Self::SIZE);
        w.write_u32(self.page_size);
        w.write_u32(self.last_page_id.value());
        w.write_u32(self.free_list_root.value());
        w.into_bytes()
    }
}

/// Pager whose page ids map straight onto the backing stream
///
/// Freed pages are zeroed and kept in a [`FreePageList`] that is persisted
/// in this same pager on `save`.
pub struct StreamPager {
    store: RawPageStore,
    free_list: FreePageList,
}

impl StreamPager {
    /// Create a pager over a backing stream, restoring the state saved in
    /// `meta` when given.
    pub fn new(stream: Box<dyn BackingStream>, page_size: usize, meta: Option<&[u8]>) -> Result<Self> {
        let meta = resolve_meta(page_size, meta)?;
        let store = RawPageStore::new(stream, meta.page_size as usize, meta.last_page_id.value())?;
        Self::with_store(store, meta.free_list_root)
    }

    /// Open or create a file-backed pager
    pub fn open(path: &Path, page_size: usize, meta: Option<&[u8]>) -> Result<Self> {
        let meta = resolve_meta(page_size, meta)?;
        let store = RawPageStore::open(path, meta.page_size as usize, meta.last_page_id.value())?;
        Self::with_store(store, meta.free_list_root)
    }

    fn with_store(store: RawPageStore, free_list_root: PageId) -> Result<Self> {
        let mut pager = Self {
            store,
            free_list: FreePageList::new(),
        };

        if free_list_root.is_some() {
            pager.free_list = FreePageList::open(&mut pager, free_list_root);
        }

        tracing::debug!(
            page_size = pager.store.page_size(),
            last_page_id = %pager.store.last_page_id(),
            free_pages = pager.free_list.len(),
            "stream pager opened"
        );

        Ok(pager)
    }

    /// Create an empty pager held in memory
    pub fn in_memory(page_size: usize) -> Result<Self> {
        Self::new(Box::new(Cursor::new(Vec::new())), page_size, None)
    }

    /// The underlying raw page store
    pub fn store(&self) -> &RawPageStore {
        &self.store
    }

    /// Highest page id handed out so far
    pub fn last_page_id(&self) -> PageId {
        self.store.last_page_id()
    }

    /// Number of pages waiting for reuse
    pub fn free_page_count(&self) -> usize {
        self.free_list.len()
    }

    /// Current metadata record
    pub fn meta(&self) -> StreamPagerMeta {
        StreamPagerMeta {
            page_size: self.store.page_size() as u32,
            last_page_id: self.store.last_page_id(),
            free_list_root: self.free_list.root(),
        }
    }

    /// Flush the backing stream to stable storage
    pub fn sync(&self) -> Result<()> {
        self.store.sync()
    }

    fn check_allocated(&self, page_id: PageId, op: &str) -> Result<()> {
        if page_id.is_none() || page_id > self.store.last_page_id() {
            return Err(StorageError::invalid_operation(format!(
                "cannot {} page {}: not allocated",
                op, page_id
            )));
        }
        Ok(())
    }

    /// Persist the free list into this pager.
    ///
    /// The list is taken out while it is written so the write cannot pop
    /// ids from it. Pages the write itself frees land in the (now empty)
    /// pager list and are folded back in before writing again.
    fn save_free_list(&mut self) -> Result<PageId> {
        let mut list = std::mem::take(&mut self.free_list);
        let result = self.write_free_list(&mut list);

        list.absorb(&mut self.free_list);
        self.free_list = list;
        result
    }

    fn write_free_list(&mut self, list: &mut FreePageList) -> Result<PageId> {
        loop {
            let root = list.save(self)?;
            if self.free_list.is_empty() {
                return Ok(root);
            }
            list.absorb(&mut self.free_list);
        }
    }
}

/// Decode a saved record; the stored page size wins over the requested one
fn resolve_meta(page_size: usize, meta: Option<&[u8]>) -> Result<StreamPagerMeta> {
    let mut meta = match meta {
        Some(bytes) => StreamPagerMeta::read(bytes)?,
        None => StreamPagerMeta::default(),
    };

    if meta.page_size == 0 {
        meta.page_size = u32::try_from(page_size).map_err(|_| {
            StorageError::invalid_operation(format!("page size {} is too large", page_size))
        })?;
    } else if meta.page_size as usize != page_size {
        tracing::warn!(
            requested = page_size,
            stored = meta.page_size,
            "page size differs from the stored one, using the stored size"
        );
    }

    Ok(meta)
}

impl Pager for StreamPager {
    fn page_size(&self) -> usize {
        self.store.page_size()
    }

    fn allocate_page_id(&mut self) -> Result<PageId> {
        if let Some(page_id) = self.free_list.pop() {
            return Ok(page_id);
        }
        self.store.allocate_page_id()
    }

    fn free_page_id(&mut self, page_id: PageId) -> Result<()> {
        self.check_allocated(page_id, "free")?;
        if self.free_list.contains(page_id) {
            return Err(StorageError::invalid_operation(format!(
                "page {} is already free",
                page_id
            )));
        }

        self.store.write_page(page_id, &[])?;
        self.free_list.put(page_id);
        Ok(())
    }

    fn read_page(&mut self, page_id: PageId, count: usize) -> Result<Vec<u8>> {
        if page_id.is_none() || page_id > self.store.last_page_id() {
            return Err(StorageError::PageNotFound(page_id));
        }
        self.store.read_page(page_id, count)
    }

    fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        self.check_allocated(page_id, "write")?;
        self.store.write_page(page_id, data)
    }

    fn save(&mut self) -> Result<Vec<u8>> {
        self.save_free_list()?;
        Ok(self.meta().to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::PayloadCodec;
    use crate::types::PageType;
    use tempfile::tempdir;

    #[test]
    fn test_allocate_prefers_freed_ids() -> Result<()> {
        let mut pager = StreamPager::in_memory(64)?;
        let ids: Vec<PageId> = (0..5).map(|_| pager.allocate_page_id()).collect::<Result<_>>()?;
        assert_eq!(ids, (1..=5).map(PageId::new).collect::<Vec<_>>());

        pager.free_page_id(PageId::new(4))?;
        pager.free_page_id(PageId::new(2))?;

        assert_eq!(pager.allocate_page_id()?, PageId::new(2));
        assert_eq!(pager.allocate_page_id()?, PageId::new(4));
        assert_eq!(pager.allocate_page_id()?, PageId::new(6));

        Ok(())
    }

    #[test]
    fn test_free_zeroes_the_page() -> Result<()> {
        let mut pager = StreamPager::in_memory(64)?;
        let page_id = pager.allocate_page_id()?;
        pager.write_page(page_id, &[0xEE; 64])?;

        pager.free_page_id(page_id)?;
        assert!(pager.read_page(page_id, 0)?.iter().all(|b| *b == 0));

        Ok(())
    }

    #[test]
    fn test_unallocated_ids_are_rejected() -> Result<()> {
        let mut pager = StreamPager::in_memory(64)?;
        let page_id = pager.allocate_page_id()?;

        assert!(matches!(
            pager.write_page(PageId::new(2), b"x"),
            Err(StorageError::InvalidOperation(_))
        ));
        assert!(matches!(
            pager.free_page_id(PageId::NONE),
            Err(StorageError::InvalidOperation(_))
        ));
        assert!(matches!(
            pager.read_page(PageId::new(9), 0),
            Err(StorageError::PageNotFound(_))
        ));

        pager.free_page_id(page_id)?;
        assert!(matches!(
            pager.free_page_id(page_id),
            Err(StorageError::InvalidOperation(_))
        ));

        Ok(())
    }

    #[test]
    fn test_meta_roundtrip() -> Result<()> {
        let meta = StreamPagerMeta {
            page_size: 4096,
            last_page_id: PageId::new(77),
            free_list_root: PageId::new(12),
        };
        let bytes = meta.to_bytes();
        assert_eq!(bytes.len(), StreamPagerMeta::SIZE);
        assert_eq!(StreamPagerMeta::read(&bytes)?, meta);
        assert!(StreamPagerMeta::read(&bytes[..6]).is_err());
        Ok(())
    }

    #[test]
    fn test_saved_free_list_never_names_its_own_pages() -> Result<()> {
        let mut pager = StreamPager::in_memory(64)?;
        let ids: Vec<PageId> = (0..60).map(|_| pager.allocate_page_id()).collect::<Result<_>>()?;
        for page_id in &ids {
            pager.free_page_id(*page_id)?;
        }

        let meta = StreamPagerMeta::read(&pager.save()?)?;
        assert!(meta.free_list_root.is_some());

        let chain = PayloadCodec::new(PageType::FreeList).chain(&mut pager, meta.free_list_root)?;
        assert!(!chain.is_empty());
        for page_id in &chain {
            assert!(!pager.free_list.contains(*page_id));
        }

        // every page is accounted for: either free or part of the list chain
        let total = pager.free_page_count() + chain.len();
        assert_eq!(total, pager.last_page_id().value() as usize);

        Ok(())
    }

    #[test]
    fn test_shrinking_free_list_folds_freed_pages_back() -> Result<()> {
        let mut pager = StreamPager::in_memory(64)?;
        let ids: Vec<PageId> = (0..60).map(|_| pager.allocate_page_id()).collect::<Result<_>>()?;
        for page_id in &ids {
            pager.free_page_id(*page_id)?;
        }
        pager.save()?;

        // drain most of the list so its chain shrinks on the next save
        for _ in 0..55 {
            pager.allocate_page_id()?;
        }
        let meta = StreamPagerMeta::read(&pager.save()?)?;

        let chain = PayloadCodec::new(PageType::FreeList).chain(&mut pager, meta.free_list_root)?;
        let reopened = FreePageList::open(&mut pager, meta.free_list_root);
        assert_eq!(
            reopened.page_ids().collect::<Vec<_>>(),
            pager.free_list.page_ids().collect::<Vec<_>>()
        );
        for page_id in &chain {
            assert!(!reopened.contains(*page_id));
        }

        Ok(())
    }

    #[test]
    fn test_reopen_restores_free_list() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stream.db");

        let meta = {
            let mut pager = StreamPager::open(&path, 128, None)?;
            let root = pager.allocate_page_id()?;
            pager.write_payload(root, &vec![7u8; 1000])?;
            pager.write_payload(root, b"short")?;
            let meta = pager.save()?;
            pager.sync()?;
            meta
        };

        let mut pager = StreamPager::open(&path, 128, Some(&meta))?;
        assert!(pager.free_page_count() > 0);
        assert_eq!(pager.read_payload(PageId::new(1))?, b"short".to_vec());

        // the lowest freed page comes back first
        assert_eq!(pager.allocate_page_id()?, PageId::new(2));

        Ok(())
    }
}
