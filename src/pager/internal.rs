//! Internal (nested) pager.
//!
//! An internal pager hands out its own virtual page ids and keeps the
//! bytes of those pages inside payload blobs of an outer pager. Small
//! virtual pages are grouped so that one outer payload carries many of
//! them:
//!
//! ```text
//! root mapping   branch_root_key -> branch page     (one blob)
//! branch page    branch_key      -> data context    (one blob per 1024 contexts)
//! data context   vid             -> page bytes      (one blob per 24 vids)
//!
//! branch_key      = vid / 24
//! branch_root_key = branch_key / 1024
//! ```
//!
//! Every level is decoded lazily, cached, marked dirty on change and
//! written back on `save`.

use super::Pager;
use crate::codec::{ByteReader, ByteWriter};
use crate::error::{Result, StorageError};
use crate::storage::FreePageList;
use crate::types::{PageId, CHAIN_PAGE_HEADER_SIZE, MIN_PAGE_SIZE};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Virtual pages per data context
const PAGES_PER_CONTEXT: u32 = 24;

/// Data contexts per branch page
const CONTEXTS_PER_BRANCH: u32 = 1024;

/// Persisted state of an [`InternalPager`]
///
/// Layout (14 bytes):
/// `u16 page_size | u32 last_page_id | u32 root_page | u32 free_list_root`.
/// Root and free list ids live in the outer pager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InternalPagerMeta {
    pub page_size: u16,
    pub last_page_id: PageId,
    pub root_page: PageId,
    pub free_list_root: PageId,
}

impl InternalPagerMeta {
    pub const SIZE: usize = 14;

    pub fn read(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        Ok(Self {
            page_size: r.read_u16()?,
            last_page_id: PageId::new(r.read_u32()?),
            root_page: PageId::new(r.read_u32()?),
            free_list_root: PageId::new(r.read_u32()?),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::fixed(Self::SIZE);
        w.write_u16(self.page_size);
        w.write_u32(self.last_page_id.value());
        w.write_u32(self.root_page.value());
        w.write_u32(self.free_list_root.value());
        w.into_bytes()
    }
}

#[derive(Debug, Default)]
struct BranchPage {
    /// branch_key -> outer id of its data context
    contexts: HashMap<u32, PageId>,
    dirty: bool,
}

#[derive(Debug, Default)]
struct DataContext {
    /// vid -> page bytes
    pages: HashMap<u32, Vec<u8>>,
    dirty: bool,
}

/// Where a virtual page lives in the mapping
#[derive(Debug, Clone, Copy)]
struct Location {
    branch_root_key: u32,
    branch_key: u32,
}

impl Location {
    fn of(page_id: PageId) -> Self {
        let branch_key = page_id.value() / PAGES_PER_CONTEXT;
        Self {
            branch_root_key: branch_key / CONTEXTS_PER_BRANCH,
            branch_key,
        }
    }
}

/// Pager that virtualizes a page space inside another pager
///
/// Branch pages and data contexts are cached once loaded and are never
/// evicted, so memory grows with the number of contexts touched since the
/// pager was created.
pub struct InternalPager<P> {
    outer: P,
    page_size: u16,
    last_page_id: u32,
    /// Outer id of the root mapping blob
    root_page: PageId,
    /// branch_root_key -> outer id of the branch page
    root: HashMap<u32, PageId>,
    root_dirty: bool,
    branches: HashMap<PageId, BranchPage>,
    contexts: HashMap<PageId, DataContext>,
    /// Free virtual ids, persisted in the outer pager
    free_list: FreePageList,
}

impl<P: Pager> InternalPager<P> {
    /// Create an internal pager over `outer`.
    ///
    /// Without metadata (or with a zero root) a fresh root mapping page is
    /// allocated in the outer pager; otherwise the saved mapping is read.
    pub fn new(mut outer: P, page_size: u16, meta: Option<&[u8]>) -> Result<Self> {
        let meta = match meta {
            Some(bytes) => InternalPagerMeta::read(bytes)?,
            None => InternalPagerMeta::default(),
        };

        let page_size = if meta.page_size == 0 {
            page_size
        } else {
            if meta.page_size != page_size {
                tracing::warn!(
                    requested = page_size,
                    stored = meta.page_size,
                    "inner page size differs from the stored one, using the stored size"
                );
            }
            meta.page_size
        };

        if (page_size as usize) < MIN_PAGE_SIZE || page_size as usize > outer.page_size() {
            return Err(StorageError::invalid_operation(format!(
                "inner page size {} must be between {} and the outer page size {}",
                page_size,
                MIN_PAGE_SIZE,
                outer.page_size()
            )));
        }

        let (root_page, root, root_dirty) = if meta.root_page.is_none() {
            (outer.allocate_page_id()?, HashMap::new(), true)
        } else {
            let bytes = outer.read_payload(meta.root_page)?;
            (meta.root_page, decode_mapping(&bytes)?, false)
        };

        let free_list = FreePageList::open(&mut outer, meta.free_list_root);

        tracing::debug!(
            page_size,
            root_page = %root_page,
            last_page_id = %meta.last_page_id,
            "internal pager opened"
        );

        Ok(Self {
            outer,
            page_size,
            last_page_id: meta.last_page_id.value(),
            root_page,
            root,
            root_dirty,
            branches: HashMap::new(),
            contexts: HashMap::new(),
            free_list,
        })
    }

    pub fn outer(&self) -> &P {
        &self.outer
    }

    pub fn outer_mut(&mut self) -> &mut P {
        &mut self.outer
    }

    /// Give back the outer pager. Unsaved changes are dropped.
    pub fn into_inner(self) -> P {
        self.outer
    }

    /// Outer id of the root mapping page
    pub fn root_page(&self) -> PageId {
        self.root_page
    }

    /// Highest virtual id handed out so far
    pub fn last_page_id(&self) -> PageId {
        PageId::new(self.last_page_id)
    }

    /// Number of virtual ids waiting for reuse
    pub fn free_page_count(&self) -> usize {
        self.free_list.len()
    }

    /// Current metadata record
    pub fn meta(&self) -> InternalPagerMeta {
        InternalPagerMeta {
            page_size: self.page_size,
            last_page_id: PageId::new(self.last_page_id),
            root_page: self.root_page,
            free_list_root: self.free_list.root(),
        }
    }

    fn branch(&mut self, page_id: PageId) -> Result<&mut BranchPage> {
        match self.branches.entry(page_id) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let bytes = self.outer.read_payload(page_id)?;
                Ok(e.insert(BranchPage {
                    contexts: decode_mapping(&bytes)?,
                    dirty: false,
                }))
            }
        }
    }

    fn context(&mut self, page_id: PageId) -> Result<&mut DataContext> {
        match self.contexts.entry(page_id) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let bytes = self.outer.read_payload(page_id)?;
                Ok(e.insert(DataContext {
                    pages: decode_context(&bytes)?,
                    dirty: false,
                }))
            }
        }
    }

    /// Outer id of the data context holding `page_id`, if there is one
    fn find_context(&mut self, location: Location) -> Result<Option<PageId>> {
        let branch_page = match self.root.get(&location.branch_root_key) {
            Some(branch_page) => *branch_page,
            None => return Ok(None),
        };
        Ok(self.branch(branch_page)?.contexts.get(&location.branch_key).copied())
    }

    /// Outer id of the data context holding `page_id`, creating the
    /// branch and context entries on the way
    fn ensure_context(&mut self, location: Location) -> Result<PageId> {
        let branch_page = match self.root.get(&location.branch_root_key) {
            Some(branch_page) => *branch_page,
            None => {
                let branch_page = self.outer.allocate_page_id()?;
                self.root.insert(location.branch_root_key, branch_page);
                self.root_dirty = true;
                self.branches.insert(
                    branch_page,
                    BranchPage {
                        contexts: HashMap::new(),
                        dirty: true,
                    },
                );
                branch_page
            }
        };

        if let Some(context_page) = self.branch(branch_page)?.contexts.get(&location.branch_key) {
            return Ok(*context_page);
        }

        let context_page = self.outer.allocate_page_id()?;
        let branch = self.branch(branch_page)?;
        branch.contexts.insert(location.branch_key, context_page);
        branch.dirty = true;
        self.contexts.insert(
            context_page,
            DataContext {
                pages: HashMap::new(),
                dirty: true,
            },
        );

        Ok(context_page)
    }

    fn check_allocated(&self, page_id: PageId, op: &str) -> Result<()> {
        if page_id.is_none() || page_id.value() > self.last_page_id {
            return Err(StorageError::invalid_operation(format!(
                "cannot {} virtual page {}: not allocated",
                op, page_id
            )));
        }
        Ok(())
    }
}

impl<P: Pager> Pager for InternalPager<P> {
    fn page_size(&self) -> usize {
        self.page_size as usize
    }

    fn allocate_page_id(&mut self) -> Result<PageId> {
        if let Some(page_id) = self.free_list.pop() {
            return Ok(page_id);
        }

        self.last_page_id = self
            .last_page_id
            .checked_add(1)
            .ok_or_else(|| StorageError::invalid_operation("virtual page id space exhausted"))?;
        Ok(PageId::new(self.last_page_id))
    }

    fn free_page_id(&mut self, page_id: PageId) -> Result<()> {
        self.check_allocated(page_id, "free")?;
        if self.free_list.contains(page_id) {
            return Err(StorageError::invalid_operation(format!(
                "virtual page {} is already free",
                page_id
            )));
        }

        self.write_page(page_id, &[0u8; CHAIN_PAGE_HEADER_SIZE])?;
        self.free_list.put(page_id);
        Ok(())
    }

    fn read_page(&mut self, page_id: PageId, count: usize) -> Result<Vec<u8>> {
        if page_id.is_none() || page_id.value() > self.last_page_id {
            return Err(StorageError::PageNotFound(page_id));
        }

        let count = if count == 0 || count > self.page_size as usize {
            self.page_size as usize
        } else {
            count
        };

        let context_page = self
            .find_context(Location::of(page_id))?
            .ok_or(StorageError::PageNotFound(page_id))?;
        let bytes = self
            .context(context_page)?
            .pages
            .get(&page_id.value())
            .ok_or(StorageError::PageNotFound(page_id))?;

        let mut page = vec![0u8; count];
        let len = bytes.len().min(count);
        page[..len].copy_from_slice(&bytes[..len]);
        Ok(page)
    }

    fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        self.check_allocated(page_id, "write")?;
        if data.len() > self.page_size as usize {
            return Err(StorageError::PageOverflow {
                page_id,
                size: data.len(),
                max: self.page_size as usize,
            });
        }

        let context_page = self.ensure_context(Location::of(page_id))?;
        let context = self.context(context_page)?;
        context.pages.insert(page_id.value(), data.to_vec());
        context.dirty = true;

        Ok(())
    }

    fn save(&mut self) -> Result<Vec<u8>> {
        self.free_list.save(&mut self.outer)?;

        let mut dirty_branches: Vec<PageId> = self
            .branches
            .iter()
            .filter(|(_, branch)| branch.dirty)
            .map(|(page_id, _)| *page_id)
            .collect();
        dirty_branches.sort_unstable();
        for page_id in &dirty_branches {
            if let Some(branch) = self.branches.get_mut(page_id) {
                self.outer.write_payload(*page_id, &encode_mapping(&branch.contexts))?;
                branch.dirty = false;
            }
        }

        let mut dirty_contexts: Vec<PageId> = self
            .contexts
            .iter()
            .filter(|(_, context)| context.dirty)
            .map(|(page_id, _)| *page_id)
            .collect();
        dirty_contexts.sort_unstable();
        for page_id in &dirty_contexts {
            if let Some(context) = self.contexts.get_mut(page_id) {
                self.outer.write_payload(*page_id, &encode_context(&context.pages)?)?;
                context.dirty = false;
            }
        }

        if self.root_dirty {
            self.outer.write_payload(self.root_page, &encode_mapping(&self.root))?;
            self.root_dirty = false;
        }

        tracing::debug!(
            branches = dirty_branches.len(),
            contexts = dirty_contexts.len(),
            last_page_id = self.last_page_id,
            "internal pager saved"
        );

        Ok(self.meta().to_bytes())
    }
}

/// `u32 count | (u32 key, u32 page_id)*`, ascending by key
fn encode_mapping(map: &HashMap<u32, PageId>) -> Vec<u8> {
    let mut entries: Vec<(u32, PageId)> = map.iter().map(|(k, v)| (*k, *v)).collect();
    entries.sort_unstable();

    let mut w = ByteWriter::new();
    w.write_u32(entries.len() as u32);
    for (key, page_id) in entries {
        w.write_u32(key);
        w.write_u32(page_id.value());
    }
    w.into_bytes()
}

fn decode_mapping(bytes: &[u8]) -> Result<HashMap<u32, PageId>> {
    let mut r = ByteReader::new(bytes);
    let count = r.read_u32()? as usize;

    let mut map = HashMap::with_capacity(count.min(r.remaining() / 8));
    for _ in 0..count {
        let key = r.read_u32()?;
        let page_id = PageId::new(r.read_u32()?);
        map.insert(key, page_id);
    }
    Ok(map)
}

/// `u32 count | (u32 vid, chunk)*`, ascending by vid
fn encode_context(pages: &HashMap<u32, Vec<u8>>) -> Result<Vec<u8>> {
    let mut vids: Vec<u32> = pages.keys().copied().collect();
    vids.sort_unstable();

    let mut w = ByteWriter::new();
    w.write_u32(vids.len() as u32);
    for vid in vids {
        w.write_u32(vid);
        w.write_chunk(&pages[&vid])?;
    }
    Ok(w.into_bytes())
}

fn decode_context(bytes: &[u8]) -> Result<HashMap<u32, Vec<u8>>> {
    let mut r = ByteReader::new(bytes);
    let count = r.read_u32()? as usize;

    let mut pages = HashMap::with_capacity(count.min(PAGES_PER_CONTEXT as usize));
    for _ in 0..count {
        let vid = r.read_u32()?;
        pages.insert(vid, r.read_chunk()?);
    }
    Ok(pages)
}
