//! Pager layer: the page-allocation capability and its implementations.
//!
//! Everything above the raw store talks to pages through the [`Pager`]
//! trait. The outer [`StreamPager`] maps ids straight onto the backing
//! stream; the [`InternalPager`] virtualizes a second id space inside
//! payload blobs of another pager. Both store multi-page blobs with the
//! [`PayloadCodec`].

mod internal;
mod payload;
mod shared;
mod stream;

pub use internal::{InternalPager, InternalPagerMeta};
pub use payload::{ChainWrite, PayloadCodec};
pub use shared::SharedPager;
pub use stream::{StreamPager, StreamPagerMeta};

use crate::error::Result;
use crate::types::{PageId, PageType};

/// Page-allocation capability
///
/// Ids handed out by `allocate_page_id` are never 0. Writing or freeing
/// an id that was never allocated is an `InvalidOperation`.
pub trait Pager {
    /// Page size in bytes
    fn page_size(&self) -> usize;

    /// Hand out a page id, reusing freed ids first
    fn allocate_page_id(&mut self) -> Result<PageId>;

    /// Zero a page and make its id available for reuse
    fn free_page_id(&mut self, page_id: PageId) -> Result<()>;

    /// Read `count` bytes from the start of a page (0 means the whole page)
    fn read_page(&mut self, page_id: PageId, count: usize) -> Result<Vec<u8>>;

    /// Write at most one page of bytes
    fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()>;

    /// Read the payload blob whose chain starts at `root`
    fn read_payload(&mut self, root: PageId) -> Result<Vec<u8>> {
        PayloadCodec::new(PageType::Payload).read(self, root)
    }

    /// Store a payload blob in the chain starting at `root`
    fn write_payload(&mut self, root: PageId, data: &[u8]) -> Result<()> {
        PayloadCodec::new(PageType::Payload)
            .write(self, root, data)
            .map(|_| ())
    }

    /// Persist pending state and return this pager's metadata record
    fn save(&mut self) -> Result<Vec<u8>>;
}

impl<P: Pager + ?Sized> Pager for &mut P {
    fn page_size(&self) -> usize {
        (**self).page_size()
    }

    fn allocate_page_id(&mut self) -> Result<PageId> {
        (**self).allocate_page_id()
    }

    fn free_page_id(&mut self, page_id: PageId) -> Result<()> {
        (**self).free_page_id(page_id)
    }

    fn read_page(&mut self, page_id: PageId, count: usize) -> Result<Vec<u8>> {
        (**self).read_page(page_id, count)
    }

    fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        (**self).write_page(page_id, data)
    }

    fn read_payload(&mut self, root: PageId) -> Result<Vec<u8>> {
        (**self).read_payload(root)
    }

    fn write_payload(&mut self, root: PageId, data: &[u8]) -> Result<()> {
        (**self).write_payload(root, data)
    }

    fn save(&mut self) -> Result<Vec<u8>> {
        (**self).save()
    }
}
