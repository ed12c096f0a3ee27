//! Balanced blob index core implementation.
//!
//! This module provides the BTreeBlobMap struct with operations for:
//! - get: Point lookups
//! - set: Insertions and updates
//! - remove: Removals
//! - save: Explicit persistence of the node table and data contexts
//!
//! Keys are grouped into buckets of `bucket_size` consecutive values. Each
//! bucket is one node of an AVL tree ordered by the bucket's lowest key
//! (the branch key). A node owns a data context blob mapping the exact
//! keys of its bucket to the first page of their value payloads.

use super::iter::{Entries, Items, Keys};
use crate::codec::{ByteReader, ByteWriter};
use crate::error::{Result, StorageError};
use crate::pager::{Pager, PayloadCodec};
use crate::types::{BTreeConfig, PageId, PageType};
use crate::TreeNode;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Identifier of a tree node. Ids are never reused; 0 means "no node".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const NONE: NodeId = NodeId(0);

    pub const fn value(self) -> u32 {
        self.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    pub const fn is_some(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted state of a [`BTreeBlobMap`]
///
/// Layout (16 bytes):
/// `u32 last_page_id | u32 last_node_id | u32 root_node | u32 node_table_page`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BTreeMeta {
    /// Highest page id the index has taken from its pager
    pub last_page_id: PageId,
    pub last_node_id: NodeId,
    pub root: NodeId,
    pub node_table_page: PageId,
}

impl BTreeMeta {
    pub const SIZE: usize = 16;

    pub fn read(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        Ok(Self {
            last_page_id: PageId::new(r.read_u32()?),
            last_node_id: NodeId(r.read_u32()?),
            root: NodeId(r.read_u32()?),
            node_table_page: PageId::new(r.read_u32()?),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::fixed(Self::SIZE);
        w.write_u32(self.last_page_id.value());
        w.write_u32(self.last_node_id.value());
        w.write_u32(self.root.value());
        w.write_u32(self.node_table_page.value());
        w.into_bytes()
    }
}

/// Tree node, one per bucket
#[derive(Debug, Clone)]
pub(super) struct Node {
    pub(super) id: NodeId,
    /// Branch key of the bucket
    pub(super) key: i64,
    /// Data context blob (NONE until the first value lands)
    pub(super) data_page: PageId,
    pub(super) left: NodeId,
    pub(super) right: NodeId,
    /// Subtree height; kept in memory only
    height: u32,
}

/// Exact keys of one bucket and their value pages
#[derive(Debug, Default)]
struct DataContext {
    values: HashMap<i64, PageId>,
    dirty: bool,
}

/// AVL-balanced index from `i64` keys to byte blobs
///
/// The whole node table lives in memory. Bucket contexts are cached as
/// they are read and stay cached, so the working set grows with the number
/// of buckets touched.
pub struct BTreeBlobMap<P> {
    pager: P,
    config: BTreeConfig,
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
    last_node_id: u32,
    last_page_id: PageId,
    node_table_page: PageId,
    nodes_dirty: bool,
    /// Decoded data contexts by page id
    contexts: HashMap<PageId, DataContext>,
}

impl<P: Pager> BTreeBlobMap<P> {
    /// Open an index stored in `pager`.
    ///
    /// Without metadata (or with a zero node table id) a node table page
    /// is allocated and the index starts empty.
    pub fn open(mut pager: P, meta: Option<&[u8]>, config: BTreeConfig) -> Result<Self> {
        let meta = match meta {
            Some(bytes) => BTreeMeta::read(bytes)?,
            None => BTreeMeta::default(),
        };

        let mut last_page_id = meta.last_page_id;
        let (node_table_page, nodes, nodes_dirty) = if meta.node_table_page.is_none() {
            let page_id = pager.allocate_page_id()?;
            last_page_id = last_page_id.max(page_id);
            (page_id, HashMap::new(), true)
        } else {
            let bytes = pager.read_payload(meta.node_table_page)?;
            (meta.node_table_page, decode_nodes(&bytes)?, false)
        };

        let mut map = Self {
            pager,
            config,
            nodes,
            root: meta.root,
            last_node_id: meta.last_node_id.value(),
            last_page_id,
            node_table_page,
            nodes_dirty,
            contexts: HashMap::new(),
        };
        map.rebuild_heights()?;

        tracing::debug!(
            nodes = map.nodes.len(),
            root = %map.root,
            height = map.height(),
            "blob index opened"
        );

        Ok(map)
    }

    pub fn pager(&self) -> &P {
        &self.pager
    }

    pub fn pager_mut(&mut self) -> &mut P {
        &mut self.pager
    }

    /// Give back the pager. Unsaved changes are dropped.
    pub fn into_inner(self) -> P {
        self.pager
    }

    pub fn config(&self) -> &BTreeConfig {
        &self.config
    }

    /// Bucket a key belongs to (floor to a multiple of the bucket size).
    ///
    /// A floor below `i64::MIN` clamps to `i64::MIN`, so the lowest bucket
    /// may be narrower than the others but still sorts first.
    pub fn branch_key(&self, key: i64) -> i64 {
        let bucket = self.config.bucket_size.max(1);
        key.div_euclid(bucket)
            .checked_mul(bucket)
            .unwrap_or(i64::MIN)
    }

    /// Height of the tree (0 when empty)
    pub fn height(&self) -> usize {
        self.nodes.get(&self.root).map_or(0, |node| node.height as usize)
    }

    /// Number of tree nodes (buckets)
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Current metadata record
    pub fn meta(&self) -> BTreeMeta {
        BTreeMeta {
            last_page_id: self.last_page_id,
            last_node_id: NodeId(self.last_node_id),
            root: self.root,
            node_table_page: self.node_table_page,
        }
    }

    /// Look up a key and return its value
    ///
    /// Returns `None` if the key does not exist.
    pub fn get(&mut self, key: i64) -> Result<Option<Vec<u8>>> {
        match self.value_page(key)? {
            Some(value_page) => Ok(Some(self.pager.read_payload(value_page)?)),
            None => Ok(None),
        }
    }

    /// Check if a key exists
    pub fn contains(&mut self, key: i64) -> Result<bool> {
        Ok(self.value_page(key)?.is_some())
    }

    /// Insert or update a key-value pair
    pub fn set(&mut self, key: i64, value: &[u8]) -> Result<()> {
        let node_id = self.insert_node(self.branch_key(key))?;

        let mut data_page = self.node(node_id)?.data_page;
        if data_page.is_none() {
            data_page = self.allocate_page()?;
            self.node_mut(node_id)?.data_page = data_page;
            self.nodes_dirty = true;
            self.contexts.insert(
                data_page,
                DataContext {
                    values: HashMap::new(),
                    dirty: true,
                },
            );
        }

        let existing = self.context(data_page)?.values.get(&key).copied();
        let value_page = match existing {
            Some(page_id) => page_id,
            None => {
                let page_id = self.allocate_page()?;
                let context = self.context(data_page)?;
                context.values.insert(key, page_id);
                context.dirty = true;
                page_id
            }
        };

        self.pager.write_payload(value_page, value)
    }

    /// Delete a key and free the pages of its value
    ///
    /// Returns `true` if the key was found and deleted. The bucket's node
    /// stays in the tree.
    pub fn remove(&mut self, key: i64) -> Result<bool> {
        let data_page = match self.find_node(self.branch_key(key))? {
            Some(node_id) => self.node(node_id)?.data_page,
            None => return Ok(false),
        };
        if data_page.is_none() {
            return Ok(false);
        }

        let context = self.context(data_page)?;
        let value_page = match context.values.remove(&key) {
            Some(page_id) => page_id,
            None => return Ok(false),
        };
        context.dirty = true;

        let mut chain = PayloadCodec::new(PageType::Payload).chain(&mut self.pager, value_page)?;
        if chain.is_empty() {
            chain.push(value_page);
        }
        for page_id in chain {
            self.pager.free_page_id(page_id)?;
        }

        Ok(true)
    }

    /// Iterate over `(key, value)` pairs, reading values lazily
    pub fn items(&mut self) -> Items<'_, P> {
        Items::new(self)
    }

    /// Iterate over keys without reading values
    pub fn keys(&mut self) -> Keys<'_, P> {
        Keys::new(self)
    }

    /// Iterate over `(key, value page id)` pairs
    pub fn entries(&mut self) -> Entries<'_, P> {
        Entries::new(self)
    }

    /// Write the node table (if changed) and every dirty data context,
    /// then return the metadata record
    pub fn save(&mut self) -> Result<Vec<u8>> {
        if self.nodes_dirty {
            let bytes = encode_nodes(&self.nodes);
            self.pager.write_payload(self.node_table_page, &bytes)?;
            self.nodes_dirty = false;
        }

        let mut dirty: Vec<PageId> = self
            .contexts
            .iter()
            .filter(|(_, context)| context.dirty)
            .map(|(page_id, _)| *page_id)
            .collect();
        dirty.sort_unstable();

        for page_id in &dirty {
            if let Some(context) = self.contexts.get_mut(page_id) {
                self.pager.write_payload(*page_id, &encode_context(&context.values))?;
                context.dirty = false;
            }
        }

        tracing::debug!(
            nodes = self.nodes.len(),
            contexts = dirty.len(),
            height = self.height(),
            "blob index saved"
        );

        Ok(self.meta().to_bytes())
    }

    /// Export the tree structure for visualization
    pub fn export_tree(&mut self) -> Result<Option<TreeNode>> {
        if self.root.is_none() {
            return Ok(None);
        }
        self.export_node(self.root).map(Some)
    }

    fn export_node(&mut self, node_id: NodeId) -> Result<TreeNode> {
        let node = self.node(node_id)?.clone();
        let keys = self.bucket_keys(node_id)?;

        let left = match node.left {
            id if id.is_some() => Some(Box::new(self.export_node(id)?)),
            _ => None,
        };
        let right = match node.right {
            id if id.is_some() => Some(Box::new(self.export_node(id)?)),
            _ => None,
        };

        Ok(TreeNode {
            node_id: node.id.value(),
            branch_key: node.key,
            height: node.height,
            data_page: node.data_page.value(),
            keys,
            left,
            right,
        })
    }

    pub(super) fn root(&self) -> NodeId {
        self.root
    }

    pub(super) fn node(&self, node_id: NodeId) -> Result<&Node> {
        self.nodes
            .get(&node_id)
            .ok_or_else(|| StorageError::corrupt_index(node_id.value(), "node missing from node table"))
    }

    fn node_mut(&mut self, node_id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(&node_id)
            .ok_or_else(|| StorageError::corrupt_index(node_id.value(), "node missing from node table"))
    }

    pub(super) fn read_value(&mut self, value_page: PageId) -> Result<Vec<u8>> {
        self.pager.read_payload(value_page)
    }

    /// Exact keys of a node's bucket with their value pages, descending
    pub(super) fn bucket_entries(&mut self, node_id: NodeId) -> Result<Vec<(i64, PageId)>> {
        let data_page = self.node(node_id)?.data_page;
        if data_page.is_none() {
            return Ok(Vec::new());
        }

        let mut entries: Vec<(i64, PageId)> = self
            .context(data_page)?
            .values
            .iter()
            .map(|(key, page_id)| (*key, *page_id))
            .collect();
        entries.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        Ok(entries)
    }

    fn bucket_keys(&mut self, node_id: NodeId) -> Result<Vec<i64>> {
        let mut keys: Vec<i64> = self
            .bucket_entries(node_id)?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        keys.reverse();
        Ok(keys)
    }

    fn context(&mut self, page_id: PageId) -> Result<&mut DataContext> {
        match self.contexts.entry(page_id) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let bytes = self.pager.read_payload(page_id)?;
                Ok(e.insert(DataContext {
                    values: decode_context(&bytes)?,
                    dirty: false,
                }))
            }
        }
    }

    fn value_page(&mut self, key: i64) -> Result<Option<PageId>> {
        let node_id = match self.find_node(self.branch_key(key))? {
            Some(node_id) => node_id,
            None => return Ok(None),
        };

        let data_page = self.node(node_id)?.data_page;
        if data_page.is_none() {
            return Ok(None);
        }

        Ok(self.context(data_page)?.values.get(&key).copied())
    }

    fn allocate_page(&mut self) -> Result<PageId> {
        let page_id = self.pager.allocate_page_id()?;
        self.last_page_id = self.last_page_id.max(page_id);
        Ok(page_id)
    }

    /// Descend from the root: strictly less goes left, anything else right
    fn find_node(&self, branch_key: i64) -> Result<Option<NodeId>> {
        let mut current = self.root;
        while current.is_some() {
            let node = self.node(current)?;
            if node.key == branch_key {
                return Ok(Some(current));
            }
            current = if branch_key < node.key { node.left } else { node.right };
        }
        Ok(None)
    }

    /// Find the node of a bucket, creating and balancing it in if absent
    fn insert_node(&mut self, branch_key: i64) -> Result<NodeId> {
        let mut path = Vec::new();
        let mut current = self.root;

        while current.is_some() {
            let node = self.node(current)?;
            if node.key == branch_key {
                return Ok(current);
            }
            path.push(current);
            current = if branch_key < node.key { node.left } else { node.right };
        }

        let node_id = self.create_node(branch_key)?;
        match path.last() {
            None => self.root = node_id,
            Some(parent_id) => {
                let parent = self.node_mut(*parent_id)?;
                if branch_key < parent.key {
                    parent.left = node_id;
                } else {
                    parent.right = node_id;
                }
            }
        }
        self.nodes_dirty = true;

        self.rebalance(&path)?;
        Ok(node_id)
    }

    fn create_node(&mut self, branch_key: i64) -> Result<NodeId> {
        self.last_node_id = self
            .last_node_id
            .checked_add(1)
            .ok_or_else(|| StorageError::invalid_operation("node id space exhausted"))?;

        let node_id = NodeId(self.last_node_id);
        self.nodes.insert(
            node_id,
            Node {
                id: node_id,
                key: branch_key,
                data_page: PageId::NONE,
                left: NodeId::NONE,
                right: NodeId::NONE,
                height: 1,
            },
        );
        Ok(node_id)
    }

    /// Height of a subtree; `NONE` is empty, any other id must resolve
    fn height_of(&self, node_id: NodeId) -> Result<u32> {
        if node_id.is_none() {
            return Ok(0);
        }
        Ok(self.node(node_id)?.height)
    }

    fn update_height(&mut self, node_id: NodeId) -> Result<()> {
        let node = self.node(node_id)?;
        let height = 1 + self.height_of(node.left)?.max(self.height_of(node.right)?);
        self.node_mut(node_id)?.height = height;
        Ok(())
    }

    /// `height(right) - height(left)`
    fn balance_factor(&self, node_id: NodeId) -> Result<i64> {
        let node = self.node(node_id)?;
        Ok(self.height_of(node.right)? as i64 - self.height_of(node.left)? as i64)
    }

    /// Walk back up an insertion path fixing heights and rotating where a
    /// node got out of balance
    fn rebalance(&mut self, path: &[NodeId]) -> Result<()> {
        for depth in (0..path.len()).rev() {
            let node_id = path[depth];
            let balance = self.balance_factor(node_id)?;

            let subtree = if balance > 1 {
                let right = self.node(node_id)?.right;
                if self.balance_factor(right)? < 0 {
                    let rotated = self.rotate_right(right)?;
                    self.node_mut(node_id)?.right = rotated;
                }
                self.rotate_left(node_id)?
            } else if balance < -1 {
                let left = self.node(node_id)?.left;
                if self.balance_factor(left)? > 0 {
                    let rotated = self.rotate_left(left)?;
                    self.node_mut(node_id)?.left = rotated;
                }
                self.rotate_right(node_id)?
            } else {
                self.update_height(node_id)?;
                continue;
            };

            tracing::trace!(node = %node_id, new_root = %subtree, balance, "subtree rotated");

            if depth == 0 {
                self.root = subtree;
            } else {
                let parent = self.node_mut(path[depth - 1])?;
                if parent.left == node_id {
                    parent.left = subtree;
                } else {
                    parent.right = subtree;
                }
            }
        }
        Ok(())
    }

    fn rotate_left(&mut self, node_id: NodeId) -> Result<NodeId> {
        let pivot = self.node(node_id)?.right;
        let inner = self.node(pivot)?.left;

        self.node_mut(node_id)?.right = inner;
        self.node_mut(pivot)?.left = node_id;
        self.update_height(node_id)?;
        self.update_height(pivot)?;
        self.nodes_dirty = true;

        Ok(pivot)
    }

    fn rotate_right(&mut self, node_id: NodeId) -> Result<NodeId> {
        let pivot = self.node(node_id)?.left;
        let inner = self.node(pivot)?.right;

        self.node_mut(node_id)?.left = inner;
        self.node_mut(pivot)?.right = node_id;
        self.update_height(node_id)?;
        self.update_height(pivot)?;
        self.nodes_dirty = true;

        Ok(pivot)
    }

    /// Recompute subtree heights after loading the node table.
    ///
    /// Post-order walk with an explicit stack; a child missing from the
    /// table or a node reached twice is a corrupt index.
    fn rebuild_heights(&mut self) -> Result<()> {
        if self.root.is_none() {
            return Ok(());
        }
        if !self.nodes.contains_key(&self.root) {
            return Err(StorageError::corrupt_index(
                self.root.value(),
                "root node missing from node table",
            ));
        }

        let mut visited = HashSet::new();
        let mut stack = vec![(self.root, false)];

        while let Some((node_id, children_done)) = stack.pop() {
            if children_done {
                self.update_height(node_id)?;
                continue;
            }

            if !visited.insert(node_id) {
                return Err(StorageError::corrupt_index(
                    node_id.value(),
                    "node reached twice while walking the tree",
                ));
            }

            let node = self.node(node_id)?;
            let children = [node.left, node.right];
            stack.push((node_id, true));

            for child in children {
                if child.is_none() {
                    continue;
                }
                if !self.nodes.contains_key(&child) {
                    return Err(StorageError::corrupt_index(
                        node_id.value(),
                        format!("child {} missing from node table", child),
                    ));
                }
                stack.push((child, false));
            }
        }

        Ok(())
    }
}

/// `u32 count | (u32 id, i64 key, u32 data_page, u32 left, u32 right)*`, by id
fn encode_nodes(nodes: &HashMap<NodeId, Node>) -> Vec<u8> {
    let mut ids: Vec<NodeId> = nodes.keys().copied().collect();
    ids.sort_unstable();

    let mut w = ByteWriter::new();
    w.write_u32(ids.len() as u32);
    for id in ids {
        let node = &nodes[&id];
        w.write_u32(node.id.value());
        w.write_i64(node.key);
        w.write_u32(node.data_page.value());
        w.write_u32(node.left.value());
        w.write_u32(node.right.value());
    }
    w.into_bytes()
}

fn decode_nodes(bytes: &[u8]) -> Result<HashMap<NodeId, Node>> {
    let mut r = ByteReader::new(bytes);
    let count = r.read_u32()? as usize;

    let mut nodes = HashMap::with_capacity(count.min(r.remaining() / 24));
    for _ in 0..count {
        let id = NodeId(r.read_u32()?);
        let node = Node {
            id,
            key: r.read_i64()?,
            data_page: PageId::new(r.read_u32()?),
            left: NodeId(r.read_u32()?),
            right: NodeId(r.read_u32()?),
            height: 0,
        };
        if id.is_none() {
            return Err(StorageError::corrupt_index(0, "node table holds node id 0"));
        }
        if nodes.insert(id, node).is_some() {
            return Err(StorageError::corrupt_index(id.value(), "duplicate node id"));
        }
    }
    Ok(nodes)
}

/// `u32 count | (i64 key, u32 value_page)*`, ascending by key
fn encode_context(values: &HashMap<i64, PageId>) -> Vec<u8> {
    let mut entries: Vec<(i64, PageId)> = values.iter().map(|(k, v)| (*k, *v)).collect();
    entries.sort_unstable();

    let mut w = ByteWriter::new();
    w.write_u32(entries.len() as u32);
    for (key, page_id) in entries {
        w.write_i64(key);
        w.write_u32(page_id.value());
    }
    w.into_bytes()
}

fn decode_context(bytes: &[u8]) -> Result<HashMap<i64, PageId>> {
    let mut r = ByteReader::new(bytes);
    let count = r.read_u32()? as usize;

    let mut values = HashMap::with_capacity(count.min(r.remaining() / 12));
    for _ in 0..count {
        let key = r.read_i64()?;
        values.insert(key, PageId::new(r.read_u32()?));
    }
    Ok(values)
}
