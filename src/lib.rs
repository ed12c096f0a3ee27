//! # pagechain
//!
//! An embeddable paged key/value storage engine: one data file of
//! fixed-size pages, multi-page blobs stored as linked page chains, a
//! nested pager that packs many small page spaces into one file, and an
//! AVL-balanced index from `i64` keys to byte blobs.
//!
//! ## Architecture
//!
//! The engine is composed of layers, each usable on its own:
//!
//! - **Codec** (`codec`): Little-endian reader and writer for every persisted record
//! - **Page Layer** (`page`): Chain page header format
//! - **Storage Layer** (`storage`): Raw page store, free page list, file header
//! - **Pager Layer** (`pager`): The `Pager` capability, payload chains, stream and internal pagers
//! - **Index Layer** (`btree`): Bucketed AVL tree mapping keys to blobs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pagechain::{Config, Store};
//!
//! let store = Store::open(Config::new("my_store.db"))?;
//!
//! // Set a value
//! store.set(42, b"answer")?;
//!
//! // Get a value
//! let value = store.get(42)?;
//!
//! // Remove a key
//! store.remove(42)?;
//!
//! // Nothing is durable until saved
//! store.save()?;
//! ```

pub mod btree;
pub mod codec;
pub mod error;
pub mod page;
pub mod pager;
pub mod storage;
pub mod types;

pub use error::{Result, StorageError};
pub use types::{BTreeConfig, PageId, PageType, DEFAULT_INNER_PAGE_SIZE, DEFAULT_PAGE_SIZE};

// Re-export main public API
pub use btree::BTreeBlobMap;
pub use pager::{InternalPager, Pager, PayloadCodec, SharedPager, StreamPager};
pub use storage::{FreePageList, RawPageStore, StoreHeader};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use storage::STORE_HEADER_SIZE;

/// Store configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the data file
    pub path: PathBuf,
    /// Outer page size in bytes (default: 4096)
    pub page_size: usize,
    /// Page size of the internal pager holding the index (default: 128)
    pub inner_page_size: u16,
    /// Whether `save` syncs the file to stable storage (default: true)
    pub sync_on_save: bool,
    /// Index configuration (bucket size)
    pub btree_config: BTreeConfig,
}

impl Config {
    /// Create a new configuration with default settings
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            page_size: DEFAULT_PAGE_SIZE,
            inner_page_size: DEFAULT_INNER_PAGE_SIZE,
            sync_on_save: true,
            btree_config: BTreeConfig::default(),
        }
    }

    /// Set the outer page size
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Set the internal pager's page size
    pub fn inner_page_size(mut self, size: u16) -> Self {
        self.inner_page_size = size;
        self
    }

    /// Enable or disable syncing on save
    pub fn sync_on_save(mut self, enabled: bool) -> Self {
        self.sync_on_save = enabled;
        self
    }

    /// Set index configuration
    pub fn btree_config(mut self, config: BTreeConfig) -> Self {
        self.btree_config = config;
        self
    }
}

/// Node type for visualization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    /// Node id
    pub node_id: u32,
    /// Lowest key of the node's bucket
    pub branch_key: i64,
    /// Height of the subtree rooted here
    pub height: u32,
    /// Page of the bucket's data context (0 if none)
    pub data_page: u32,
    /// Exact keys stored in the bucket, ascending
    pub keys: Vec<i64>,
    pub left: Option<Box<TreeNode>>,
    pub right: Option<Box<TreeNode>>,
}

type Index = BTreeBlobMap<InternalPager<StreamPager>>;

/// Main store handle providing key-value storage backed by the blob index
///
/// Stacks a stream pager over the data file, an internal pager over the
/// stream pager, and the index over the internal pager. All calls on one
/// handle are serialized.
pub struct Store {
    index: Mutex<Index>,
    config: Config,
}

impl Store {
    /// Open or create a store at the configured path
    pub fn open(config: Config) -> Result<Self> {
        if config.page_size < STORE_HEADER_SIZE {
            return Err(StorageError::invalid_operation(format!(
                "page size {} cannot hold the {}-byte store header",
                config.page_size, STORE_HEADER_SIZE
            )));
        }

        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let existing = read_header(&config)?;
        let fresh = existing.is_none();
        let header = existing.unwrap_or_else(|| StoreHeader::new(config.page_size as u32));

        let page_size = match header.page_size as usize {
            0 => config.page_size,
            stored => {
                if stored != config.page_size {
                    tracing::warn!(
                        requested = config.page_size,
                        stored,
                        "page size differs from the stored one, using the stored size"
                    );
                }
                stored
            }
        };

        let outer = StreamPager::open(&config.path, page_size, Some(&header.stream_meta))?;
        if fresh {
            outer.store().write_reserved(&header.to_bytes())?;
        }

        let inner = InternalPager::new(outer, config.inner_page_size, Some(&header.internal_meta))?;
        let index = BTreeBlobMap::open(inner, Some(&header.index_meta), config.btree_config.clone())?;

        tracing::debug!(path = %config.path.display(), page_size, fresh, "store opened");

        Ok(Self {
            index: Mutex::new(index),
            config,
        })
    }

    /// Get the index configuration
    pub fn btree_config(&self) -> BTreeConfig {
        self.config.btree_config.clone()
    }

    /// Get a value by key
    ///
    /// Returns `None` if the key does not exist.
    pub fn get(&self, key: i64) -> Result<Option<Vec<u8>>> {
        self.index.lock().get(key)
    }

    /// Insert or update a key-value pair
    pub fn set(&self, key: i64, value: &[u8]) -> Result<()> {
        self.index.lock().set(key, value)
    }

    /// Delete a key-value pair
    ///
    /// Returns `true` if the key existed and was deleted.
    pub fn remove(&self, key: i64) -> Result<bool> {
        self.index.lock().remove(key)
    }

    /// Check if a key exists
    pub fn contains(&self, key: i64) -> Result<bool> {
        self.index.lock().contains(key)
    }

    /// Collect every key-value pair, in descending key-bucket order
    pub fn entries(&self) -> Result<Vec<(i64, Vec<u8>)>> {
        self.index.lock().items().collect()
    }

    /// Visit key-value pairs in iteration order until `f` returns `false`.
    ///
    /// The key order is fixed when the visit starts. Each value is read
    /// under its own short lock and `f` runs with the store unlocked, so the
    /// callback may call back into this store. A key removed before it is
    /// reached is skipped; a changed value is seen as it is at that point.
    pub fn visit<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(i64, &[u8]) -> bool,
    {
        let keys: Vec<i64> = self.index.lock().keys().collect::<Result<_>>()?;

        for key in keys {
            let value = match self.index.lock().get(key)? {
                Some(value) => value,
                None => continue,
            };
            if !f(key, &value) {
                break;
            }
        }
        Ok(())
    }

    /// Persist the index, both pagers and the file header
    pub fn save(&self) -> Result<()> {
        let mut index = self.index.lock();

        let index_meta = index.save()?;
        let inner = index.pager_mut();
        let internal_meta = inner.save()?;
        let outer = inner.outer_mut();
        let stream_meta = outer.save()?;

        let header = StoreHeader {
            page_size: outer.page_size() as u32,
            stream_meta,
            internal_meta,
            index_meta,
        };
        outer.store().write_reserved(&header.to_bytes())?;

        if self.config.sync_on_save {
            outer.sync()?;
        }

        tracing::debug!(
            path = %self.config.path.display(),
            pages = outer.last_page_id().value(),
            "store saved"
        );

        Ok(())
    }

    /// Get statistics about the store
    pub fn stats(&self) -> StoreStats {
        let index = self.index.lock();
        let inner = index.pager();
        let outer = inner.outer();

        StoreStats {
            page_size: outer.page_size(),
            page_count: outer.last_page_id().value() as usize,
            free_page_count: outer.free_page_count(),
            inner_page_size: inner.page_size(),
            inner_page_count: inner.last_page_id().value() as usize,
            inner_free_page_count: inner.free_page_count(),
            node_count: index.node_count(),
            tree_height: index.height(),
        }
    }

    /// Export the tree structure for visualization
    pub fn export_tree(&self) -> Result<Option<TreeNode>> {
        self.index.lock().export_tree()
    }
}

/// Read the header of an existing store file; `None` for a new or empty file
fn read_header(config: &Config) -> Result<Option<StoreHeader>> {
    let len = match std::fs::metadata(&config.path) {
        Ok(metadata) => metadata.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if len == 0 {
        return Ok(None);
    }
    if len < STORE_HEADER_SIZE as u64 {
        return Err(StorageError::invalid_db(format!(
            "file is {} bytes, shorter than the store header",
            len
        )));
    }

    let mut buf = vec![0u8; STORE_HEADER_SIZE];
    File::open(&config.path)?.read_exact(&mut buf)?;
    StoreHeader::read(&buf).map(Some)
}

/// Store statistics
#[derive(Debug, Clone)]
pub struct StoreStats {
    /// Outer page size in bytes
    pub page_size: usize,
    /// Pages allocated in the data file (excluding the header region)
    pub page_count: usize,
    /// Outer pages waiting for reuse
    pub free_page_count: usize,
    /// Page size of the internal pager
    pub inner_page_size: usize,
    /// Virtual pages allocated in the internal pager
    pub inner_page_count: usize,
    /// Virtual pages waiting for reuse
    pub inner_free_page_count: usize,
    /// Number of index nodes (key buckets)
    pub node_count: usize,
    /// Height of the index tree
    pub tree_height: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::tempdir;

    #[test]
    fn test_basic_operations() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let config = Config::new(&path);
        let store = Store::open(config)?;

        // Test set and get
        store.set(1, b"value1")?;
        assert_eq!(store.get(1)?, Some(b"value1".to_vec()));

        // Test update
        store.set(1, b"value2")?;
        assert_eq!(store.get(1)?, Some(b"value2".to_vec()));

        // Test remove
        assert!(store.remove(1)?);
        assert_eq!(store.get(1)?, None);

        // Test non-existent key
        assert_eq!(store.get(12345)?, None);
        assert!(!store.remove(12345)?);
        assert!(!store.contains(12345)?);

        Ok(())
    }

    #[test]
    fn test_reopen_after_save() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("dirs").join("test.db");

        {
            let store = Store::open(Config::new(&path))?;
            for key in -50..50i64 {
                store.set(key * 1000, format!("value{}", key).as_bytes())?;
            }
            store.set(7, &vec![0xABu8; 9000])?;
            store.save()?;
        }

        let store = Store::open(Config::new(&path))?;
        for key in -50..50i64 {
            let expected = format!("value{}", key).into_bytes();
            assert_eq!(store.get(key * 1000)?, Some(expected));
        }
        assert_eq!(store.get(7)?, Some(vec![0xABu8; 9000]));

        Ok(())
    }

    #[test]
    fn test_unsaved_changes_are_dropped() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let store = Store::open(Config::new(&path))?;
            store.set(1, b"saved")?;
            store.save()?;
            store.set(2, b"never saved")?;
        }

        let store = Store::open(Config::new(&path))?;
        assert_eq!(store.get(1)?, Some(b"saved".to_vec()));
        assert_eq!(store.get(2)?, None);

        Ok(())
    }

    #[test]
    fn test_reopen_without_any_save() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let store = Store::open(Config::new(&path))?;
            store.set(1, b"lost")?;
        }

        let store = Store::open(Config::new(&path))?;
        assert_eq!(store.get(1)?, None);

        Ok(())
    }

    #[test]
    fn test_entries_and_visit() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = Store::open(Config::new(&path).btree_config(BTreeConfig::new(10)))?;

        for key in [3, 14, 25, 1] {
            store.set(key, &key.to_le_bytes())?;
        }

        let keys: Vec<i64> = store.entries()?.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![25, 14, 3, 1]);

        let mut seen = Vec::new();
        store.visit(|key, value| {
            assert_eq!(value, &key.to_le_bytes()[..]);
            seen.push(key);
            seen.len() < 2
        })?;
        assert_eq!(seen, vec![25, 14]);

        Ok(())
    }

    #[test]
    fn test_visit_callback_can_use_the_store() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = Store::open(Config::new(&path).btree_config(BTreeConfig::new(10)))?;

        for key in [5, 15, 25] {
            store.set(key, b"old")?;
        }

        let mut seen = Vec::new();
        store.visit(|key, value| {
            seen.push((key, value.to_vec()));
            assert!(store.contains(key).unwrap());
            assert_eq!(store.get(key).unwrap(), Some(value.to_vec()));
            if key == 25 {
                store.set(15, b"new").unwrap();
                store.remove(5).unwrap();
                store.set(100, b"late").unwrap();
            }
            true
        })?;

        // order fixed at start; later writes are seen, removed keys skipped
        assert_eq!(seen, vec![(25, b"old".to_vec()), (15, b"new".to_vec())]);
        assert_eq!(store.get(100)?, Some(b"late".to_vec()));
        assert_eq!(store.stats().node_count, 4);

        Ok(())
    }

    #[test]
    fn test_stats_and_export() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = Store::open(Config::new(&path).btree_config(BTreeConfig::per_key()))?;

        for key in 0..31 {
            store.set(key, b"v")?;
        }
        store.save()?;

        let stats = store.stats();
        assert_eq!(stats.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(stats.inner_page_size, DEFAULT_INNER_PAGE_SIZE as usize);
        assert_eq!(stats.node_count, 31);
        assert_eq!(stats.tree_height, 5);
        assert!(stats.page_count > 0);

        let root = store.export_tree()?.unwrap();
        assert_eq!(root.height, 5);
        assert_eq!(root.keys.len(), 1);

        Ok(())
    }

    #[test]
    fn test_rejects_foreign_file() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foreign.db");
        std::fs::write(&path, vec![0x42u8; 4096])?;

        assert!(matches!(
            Store::open(Config::new(&path)),
            Err(StorageError::InvalidDatabaseFile(_))
        ));

        Ok(())
    }

    #[test]
    fn test_detects_damaged_header() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        {
            let store = Store::open(Config::new(&path))?;
            store.set(1, b"x")?;
            store.save()?;
        }

        let mut file = std::fs::OpenOptions::new().write(true).open(&path)?;
        file.seek(SeekFrom::Start(24))?;
        file.write_all(&[0xFF])?;
        drop(file);

        assert!(matches!(
            Store::open(Config::new(&path)),
            Err(StorageError::Corruption(_))
        ));

        Ok(())
    }

    #[test]
    fn test_rejects_tiny_page_size() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().join("test.db")).page_size(64);
        assert!(matches!(
            Store::open(config),
            Err(StorageError::InvalidOperation(_))
        ));
    }
}
