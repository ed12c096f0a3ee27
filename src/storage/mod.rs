//! Storage layer: page I/O and page management.
//!
//! This module provides the raw page store over a backing stream, the
//! store file header, and the persisted free page list.

mod file_header;
mod freelist;
mod raw_store;

pub use file_header::{StoreHeader, MAGIC, STORE_HEADER_SIZE};
pub use freelist::FreePageList;
pub use raw_store::{BackingStream, RawPageStore};
