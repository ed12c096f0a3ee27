//! Balanced blob index.
//!
//! This module provides an AVL tree over bucketed `i64` keys that supports:
//! - Point lookups (get, contains)
//! - Upserts (set)
//! - Removals (remove)
//! - Ordered pull-based iteration (items, keys, entries)

mod iter;
mod tree;

pub use iter::{Entries, Items, Keys};
pub use tree::{BTreeBlobMap, BTreeMeta, NodeId};
