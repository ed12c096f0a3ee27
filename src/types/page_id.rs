//! Page identifier type.

use std::fmt;

/// Identifier of a page inside a pager's address space.
///
/// Ids start at 1. Id 0 is the "absent" sentinel: a chain with no next
/// page, a node without a data context, a structure not created yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PageId(pub u32);

impl PageId {
    /// Sentinel meaning "no page"
    pub const NONE: PageId = PageId(0);

    /// Create a new page ID
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw page ID value
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Check if this is the "no page" sentinel
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Check if this refers to an actual page
    pub const fn is_some(self) -> bool {
        self.0 != 0
    }

    /// Calculate the byte offset of this page in the file
    pub const fn file_offset(self, page_size: usize) -> u64 {
        self.0 as u64 * page_size as u64
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<u32> for PageId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<PageId> for u32 {
    fn from(id: PageId) -> Self {
        id.0
    }
}
