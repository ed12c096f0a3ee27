//! Iteration over a blob index.
//!
//! The iterators walk the tree in reverse order with an explicit stack of
//! node ids: buckets come out by descending branch key, and the keys of
//! one bucket descend too. Work only happens inside `next`, so dropping an
//! iterator early just abandons the walk.

use super::tree::{BTreeBlobMap, NodeId};
use crate::error::Result;
use crate::pager::Pager;
use crate::types::PageId;
use std::vec;

/// Iterator over `(key, value page id)` pairs
pub struct Entries<'a, P> {
    map: &'a mut BTreeBlobMap<P>,
    /// Subtree whose right spine has not been pushed yet
    start: Option<NodeId>,
    /// Nodes whose bucket is still to be visited
    stack: Vec<NodeId>,
    /// Remaining entries of the current bucket
    bucket: vec::IntoIter<(i64, PageId)>,
    done: bool,
}

impl<'a, P: Pager> Entries<'a, P> {
    pub(super) fn new(map: &'a mut BTreeBlobMap<P>) -> Self {
        let root = map.root();
        Self {
            map,
            start: Some(root).filter(|id| id.is_some()),
            stack: Vec::new(),
            bucket: Vec::new().into_iter(),
            done: false,
        }
    }

    /// Push a node and all its right descendants
    fn push_right_spine(&mut self, mut node_id: NodeId) -> Result<()> {
        while node_id.is_some() {
            self.stack.push(node_id);
            node_id = self.map.node(node_id)?.right;
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<(i64, PageId)>> {
        loop {
            if let Some(entry) = self.bucket.next() {
                return Ok(Some(entry));
            }

            if let Some(start) = self.start.take() {
                self.push_right_spine(start)?;
            }

            let node_id = match self.stack.pop() {
                Some(node_id) => node_id,
                None => return Ok(None),
            };

            let left = self.map.node(node_id)?.left;
            self.push_right_spine(left)?;
            self.bucket = self.map.bucket_entries(node_id)?.into_iter();
        }
    }
}

impl<P: Pager> Iterator for Entries<'_, P> {
    type Item = Result<(i64, PageId)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.advance() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Iterator over `(key, value)` pairs; each value is read when reached
pub struct Items<'a, P> {
    entries: Entries<'a, P>,
}

impl<'a, P: Pager> Items<'a, P> {
    pub(super) fn new(map: &'a mut BTreeBlobMap<P>) -> Self {
        Self {
            entries: Entries::new(map),
        }
    }
}

impl<P: Pager> Iterator for Items<'_, P> {
    type Item = Result<(i64, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, value_page) = match self.entries.next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e)),
        };

        match self.entries.map.read_value(value_page) {
            Ok(value) => Some(Ok((key, value))),
            Err(e) => {
                self.entries.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Iterator over keys only
pub struct Keys<'a, P> {
    entries: Entries<'a, P>,
}

impl<'a, P: Pager> Keys<'a, P> {
    pub(super) fn new(map: &'a mut BTreeBlobMap<P>) -> Self {
        Self {
            entries: Entries::new(map),
        }
    }
}

impl<P: Pager> Iterator for Keys<'_, P> {
    type Item = Result<i64>;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next().map(|entry| entry.map(|(key, _)| key))
    }
}

#[cfg(test)]
mod tests {
    use crate::btree::BTreeBlobMap;
    use crate::error::Result;
    use crate::pager::StreamPager;
    use crate::types::BTreeConfig;

    fn create_test_map(bucket_size: i64) -> Result<BTreeBlobMap<StreamPager>> {
        BTreeBlobMap::open(
            StreamPager::in_memory(128)?,
            None,
            BTreeConfig::new(bucket_size),
        )
    }

    #[test]
    fn test_empty_iteration() -> Result<()> {
        let mut map = create_test_map(10)?;
        assert_eq!(map.items().count(), 0);
        assert_eq!(map.keys().count(), 0);
        Ok(())
    }

    #[test]
    fn test_items_descend_across_and_within_buckets() -> Result<()> {
        let mut map = create_test_map(10)?;
        for key in [5, 15, 3, 27, 12, -4, 26] {
            map.set(key, format!("v{}", key).as_bytes())?;
        }

        let keys: Vec<i64> = map.keys().collect::<Result<_>>()?;
        assert_eq!(keys, vec![27, 26, 15, 12, 5, 3, -4]);

        let items: Vec<(i64, Vec<u8>)> = map.items().collect::<Result<_>>()?;
        assert_eq!(items.len(), 7);
        assert_eq!(items[0], (27, b"v27".to_vec()));
        assert_eq!(items[6], (-4, b"v-4".to_vec()));

        Ok(())
    }

    #[test]
    fn test_large_tree_walk_is_sorted() -> Result<()> {
        let mut map = create_test_map(1)?;
        for key in (0..500).rev().step_by(3).chain((0..500).step_by(3)) {
            map.set(key, &[])?;
        }

        let keys: Vec<i64> = map.keys().collect::<Result<_>>()?;
        let mut expected: Vec<i64> = keys.clone();
        expected.sort_unstable_by(|a, b| b.cmp(a));
        expected.dedup();
        assert_eq!(keys, expected);
        assert_eq!(keys.len(), map.node_count());

        Ok(())
    }

    #[test]
    fn test_early_drop_leaves_map_usable() -> Result<()> {
        let mut map = create_test_map(100)?;
        for key in 0..50 {
            map.set(key, b"x")?;
        }

        let first_two: Vec<i64> = map.keys().take(2).collect::<Result<_>>()?;
        assert_eq!(first_two, vec![49, 48]);

        map.set(50, b"y")?;
        assert_eq!(map.get(50)?, Some(b"y".to_vec()));
        assert_eq!(map.entries().count(), 51);

        Ok(())
    }
}
