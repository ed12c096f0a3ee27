//! Error types for the storage engine.

use crate::types::PageId;
use thiserror::Error;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in the storage engine
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error from the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page was not found
    #[error("Page {0} not found")]
    PageNotFound(PageId),

    /// Page write larger than the page size
    #[error("Page {page_id} overflow: {size} bytes written, page holds {max}")]
    PageOverflow {
        page_id: PageId,
        size: usize,
        max: usize,
    },

    /// Value exceeds the maximum encodable size
    #[error("Value too large: {size} bytes (max: {max})")]
    ValueTooLarge { size: usize, max: usize },

    /// A decoder ran past the end of its buffer
    #[error("Truncated data: need {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A payload chain ended before its length header
    #[error("Payload at page {page_id} is truncated: only {len} bytes reassembled")]
    PayloadTruncated { page_id: PageId, len: usize },

    /// Declared payload length disagrees with the reassembled content
    #[error("Payload at page {page_id} declares {expected} bytes but holds {actual}")]
    PayloadLengthMismatch {
        page_id: PageId,
        expected: usize,
        actual: usize,
    },

    /// A chain page carries an unexpected sequence index
    #[error("Broken chain at page {page_id}: expected index {expected_index}, found {found_index}")]
    BrokenChain {
        page_id: PageId,
        expected_index: u16,
        found_index: u16,
    },

    /// A chain links back to a page it already visited
    #[error("Chain cycle detected at page {page_id}")]
    ChainCycle { page_id: PageId },

    /// The tree index references nodes it cannot resolve
    #[error("Corrupt index at node {node_id}: {reason}")]
    CorruptIndex { node_id: u32, reason: String },

    /// Data corruption detected (e.g., checksum mismatch)
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Invalid page format or type
    #[error("Invalid page: {0}")]
    InvalidPage(String),

    /// Invalid operation for the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Database file is corrupted or has invalid format
    #[error("Invalid database file: {0}")]
    InvalidDatabaseFile(String),
}

impl StorageError {
    /// Create a corruption error with a message
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// Create an invalid page error
    pub fn invalid_page(msg: impl Into<String>) -> Self {
        Self::InvalidPage(msg.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create an invalid database file error
    pub fn invalid_db(msg: impl Into<String>) -> Self {
        Self::InvalidDatabaseFile(msg.into())
    }

    /// Create a corrupt index error for a node
    pub fn corrupt_index(node_id: u32, reason: impl Into<String>) -> Self {
        Self::CorruptIndex {
            node_id,
            reason: reason.into(),
        }
    }

    /// Whether the error only means "there is no page here".
    ///
    /// Chain rewrites treat such pages as the end of the existing chain.
    pub fn is_missing_page(&self) -> bool {
        match self {
            Self::PageNotFound(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}
