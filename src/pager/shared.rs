//! Shared handle to one pager.

use super::Pager;
use crate::error::Result;
use crate::types::PageId;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Cloneable handle that serializes every call into one pager
///
/// Lets several structures (for example two internal pagers) sit on the
/// same outer pager. Each call takes the lock for its own duration only.
pub struct SharedPager<P> {
    inner: Arc<Mutex<P>>,
}

impl<P> SharedPager<P> {
    pub fn new(pager: P) -> Self {
        Self {
            inner: Arc::new(Mutex::new(pager)),
        }
    }

    /// Lock the pager for a sequence of calls
    pub fn lock(&self) -> MutexGuard<'_, P> {
        self.inner.lock()
    }

    /// Take the pager back if this is the last handle
    pub fn try_into_inner(self) -> std::result::Result<P, Self> {
        Arc::try_unwrap(self.inner)
            .map(Mutex::into_inner)
            .map_err(|inner| Self { inner })
    }
}

impl<P> Clone for SharedPager<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Pager> Pager for SharedPager<P> {
    fn page_size(&self) -> usize {
        self.inner.lock().page_size()
    }

    fn allocate_page_id(&mut self) -> Result<PageId> {
        self.inner.lock().allocate_page_id()
    }

    fn free_page_id(&mut self, page_id: PageId) -> Result<()> {
        self.inner.lock().free_page_id(page_id)
    }

    fn read_page(&mut self, page_id: PageId, count: usize) -> Result<Vec<u8>> {
        self.inner.lock().read_page(page_id, count)
    }

    fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        self.inner.lock().write_page(page_id, data)
    }

    fn read_payload(&mut self, root: PageId) -> Result<Vec<u8>> {
        self.inner.lock().read_payload(root)
    }

    fn write_payload(&mut self, root: PageId, data: &[u8]) -> Result<()> {
        self.inner.lock().write_payload(root, data)
    }

    fn save(&mut self) -> Result<Vec<u8>> {
        self.inner.lock().save()
    }
}
