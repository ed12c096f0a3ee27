//! Common types used throughout the storage engine.

mod page_id;

pub use page_id::PageId;

use serde::{Deserialize, Serialize};

/// Default outer page size in bytes (4KB)
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default page size of an internal (nested) pager
pub const DEFAULT_INNER_PAGE_SIZE: u16 = 128;

/// Smallest page size any pager accepts
pub const MIN_PAGE_SIZE: usize = 64;

/// Bytes reserved at the start of every chain page for its header
pub const CHAIN_PAGE_HEADER_SIZE: usize = 16;

/// Bytes reserved at the start of a reassembled payload stream.
/// The first 4 hold the declared content length.
pub const PAYLOAD_HEADER_SIZE: usize = 8;

/// Default width of a blob map bucket (keys per branch key)
pub const DEFAULT_BUCKET_SIZE: i64 = 4096;

/// Blob map configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BTreeConfig {
    /// Width of the key range grouped under one tree node
    pub bucket_size: i64,
}

impl Default for BTreeConfig {
    fn default() -> Self {
        Self {
            bucket_size: DEFAULT_BUCKET_SIZE,
        }
    }
}

impl BTreeConfig {
    /// Create a config with a custom bucket size (at least 1)
    pub fn new(bucket_size: i64) -> Self {
        Self {
            bucket_size: bucket_size.max(1),
        }
    }

    /// One node per distinct key; useful to exercise the tree shape
    pub fn per_key() -> Self {
        Self { bucket_size: 1 }
    }
}

/// Page types written into the first byte of a chain page
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageType {
    /// Zeroed or reclaimed page
    Free = 0x00,
    /// Page of a payload blob chain
    Payload = 0x01,
    /// Page of a persisted free list chain
    FreeList = 0x02,
}

impl PageType {
    /// Check if this page belongs to a chain
    pub fn is_chain(self) -> bool {
        matches!(self, Self::Payload | Self::FreeList)
    }

    /// Convert from byte value
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Free),
            0x01 => Some(Self::Payload),
            0x02 => Some(Self::FreeList),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_type_conversions() {
        assert!(PageType::Payload.is_chain());
        assert!(PageType::FreeList.is_chain());
        assert!(!PageType::Free.is_chain());

        assert_eq!(PageType::from_byte(0x01), Some(PageType::Payload));
        assert_eq!(PageType::from_byte(PageType::FreeList as u8), Some(PageType::FreeList));
        assert_eq!(PageType::from_byte(0xFF), None);
    }

    #[test]
    fn test_btree_config_clamps_bucket_size() {
        assert_eq!(BTreeConfig::new(0).bucket_size, 1);
        assert_eq!(BTreeConfig::new(-5).bucket_size, 1);
        assert_eq!(BTreeConfig::default().bucket_size, DEFAULT_BUCKET_SIZE);
    }
}
