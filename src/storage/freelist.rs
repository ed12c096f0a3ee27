//! Free list management.
//!
//! Tracks reclaimed pages that can be reused for new allocations. The set
//! is persisted as a `FreeList`-tagged payload chain:
//!
//! ```text
//! u32 count | u32 page_id * count   (ascending)
//! ```

use crate::codec::{ByteReader, ByteWriter};
use crate::error::{Result, StorageError};
use crate::pager::{Pager, PayloadCodec};
use crate::types::{PageId, PageType};
use std::collections::BTreeSet;

/// Set of free page ids, persisted in a pager
#[derive(Debug, Default)]
pub struct FreePageList {
    /// Free ids; iteration order doubles as reuse order
    pages: BTreeSet<PageId>,
    /// First page of the persisted chain (NONE until first save)
    root: PageId,
    /// Changed since the last save
    dirty: bool,
}

impl FreePageList {
    /// Create a new empty free list
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the list persisted at `root`.
    ///
    /// A list that cannot be decoded is dropped and replaced by an empty
    /// one at the same root; the pages it named are leaked.
    pub fn open<P: Pager + ?Sized>(pager: &mut P, root: PageId) -> Self {
        if root.is_none() {
            return Self::new();
        }

        let decoded = PayloadCodec::new(PageType::FreeList)
            .read(pager, root)
            .and_then(|bytes| decode(&bytes));

        match decoded {
            Ok(pages) => Self {
                pages,
                root,
                dirty: false,
            },
            Err(e) => {
                tracing::debug!(root = %root, error = %e, "discarding unreadable free list");
                Self {
                    pages: BTreeSet::new(),
                    root,
                    dirty: true,
                }
            }
        }
    }

    /// Add a page to the free list
    pub fn put(&mut self, page_id: PageId) {
        if self.pages.insert(page_id) {
            self.dirty = true;
        }
    }

    /// Take the lowest free page, if any
    pub fn pop(&mut self) -> Option<PageId> {
        let page_id = self.pages.pop_first()?;
        self.dirty = true;
        Some(page_id)
    }

    /// Move every id of `other` into this list
    pub fn absorb(&mut self, other: &mut FreePageList) {
        if other.pages.is_empty() {
            return;
        }
        self.pages.append(&mut other.pages);
        other.dirty = true;
        self.dirty = true;
    }

    /// Get the number of free pages
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Check if the free list is empty
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn contains(&self, page_id: PageId) -> bool {
        self.pages.contains(&page_id)
    }

    /// Get all free page IDs in ascending order
    pub fn page_ids(&self) -> impl Iterator<Item = PageId> + '_ {
        self.pages.iter().copied()
    }

    /// First page of the persisted chain
    pub fn root(&self) -> PageId {
        self.root
    }

    /// Whether the list changed since it was loaded or saved
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Persist the list and return its root.
    ///
    /// Nothing is written when the list is unchanged, or when it is empty
    /// and was never saved. The root page is allocated from `pager` on the
    /// first save.
    pub fn save<P: Pager + ?Sized>(&mut self, pager: &mut P) -> Result<PageId> {
        if self.root.is_none() && self.pages.is_empty() {
            self.dirty = false;
            return Ok(PageId::NONE);
        }
        if !self.dirty && self.root.is_some() {
            return Ok(self.root);
        }

        if self.root.is_none() {
            self.root = pager.allocate_page_id()?;
        }

        let mut w = ByteWriter::new();
        w.write_u32(self.pages.len() as u32);
        for page_id in &self.pages {
            w.write_u32(page_id.value());
        }

        PayloadCodec::new(PageType::FreeList).write(pager, self.root, &w.into_bytes())?;
        self.dirty = false;

        Ok(self.root)
    }
}

fn decode(bytes: &[u8]) -> Result<BTreeSet<PageId>> {
    let mut r = ByteReader::new(bytes);
    let count = r.read_u32()? as usize;

    let mut pages = BTreeSet::new();
    for _ in 0..count {
        let page_id = PageId::new(r.read_u32()?);
        if page_id.is_none() {
            return Err(StorageError::corruption("free list names page 0"));
        }
        pages.insert(page_id);
    }

    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::StreamPager;

    #[test]
    fn test_freelist_operations() {
        let mut fl = FreePageList::new();
        assert!(fl.is_empty());
        assert_eq!(fl.pop(), None);

        fl.put(PageId::new(10));
        fl.put(PageId::new(5));
        fl.put(PageId::new(5));
        assert_eq!(fl.len(), 2);
        assert!(fl.contains(PageId::new(10)));

        // lowest id first, whatever the insertion order
        assert_eq!(fl.pop(), Some(PageId::new(5)));
        assert_eq!(fl.pop(), Some(PageId::new(10)));
        assert_eq!(fl.pop(), None);
    }

    #[test]
    fn test_absorb() {
        let mut a = FreePageList::new();
        let mut b = FreePageList::new();
        a.put(PageId::new(3));
        b.put(PageId::new(1));
        b.put(PageId::new(7));

        a.absorb(&mut b);
        assert!(b.is_empty());
        assert_eq!(
            a.page_ids().collect::<Vec<_>>(),
            vec![PageId::new(1), PageId::new(3), PageId::new(7)]
        );
    }

    #[test]
    fn test_save_and_open() -> Result<()> {
        let mut pager = StreamPager::in_memory(64)?;
        let ids: Vec<PageId> = (0..40).map(|_| pager.allocate_page_id()).collect::<Result<_>>()?;

        let mut fl = FreePageList::new();
        for page_id in ids.iter().step_by(3) {
            fl.put(*page_id);
        }

        let root = fl.save(&mut pager)?;
        assert!(root.is_some());
        assert!(!fl.is_dirty());

        // clean list: nothing to write, same root
        assert_eq!(fl.save(&mut pager)?, root);

        let reopened = FreePageList::open(&mut pager, root);
        assert_eq!(
            reopened.page_ids().collect::<Vec<_>>(),
            fl.page_ids().collect::<Vec<_>>()
        );
        assert_eq!(reopened.root(), root);

        Ok(())
    }

    #[test]
    fn test_empty_unsaved_list_writes_nothing() -> Result<()> {
        let mut pager = StreamPager::in_memory(64)?;
        let mut fl = FreePageList::new();

        assert_eq!(fl.save(&mut pager)?, PageId::NONE);
        assert_eq!(pager.last_page_id(), PageId::NONE);

        Ok(())
    }

    #[test]
    fn test_unreadable_list_opens_empty() -> Result<()> {
        let mut pager = StreamPager::in_memory(64)?;
        let root = pager.allocate_page_id()?;
        pager.write_payload(root, b"not a free list")?;

        let fl = FreePageList::open(&mut pager, root);
        assert!(fl.is_empty());
        assert_eq!(fl.root(), root);
        assert!(fl.is_dirty());

        Ok(())
    }
}
