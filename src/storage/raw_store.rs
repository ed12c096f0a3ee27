//! Raw page store.
//!
//! The raw page store reads and writes fixed-size pages of a backing
//! stream and hands out page ids. It knows nothing about chains, free
//! lists or what any page contains. The stream sits behind a trait so the
//! same store runs over a file or over an in-memory buffer.

use crate::error::{Result, StorageError};
use crate::types::{PageId, MIN_PAGE_SIZE};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Random-access byte stream a page store can sit on
pub trait BackingStream: Read + Write + Seek + Send {
    /// Flush written data to stable storage
    fn sync(&mut self) -> io::Result<()>;
}

impl BackingStream for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

impl BackingStream for Cursor<Vec<u8>> {
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Inner {
    stream: Box<dyn BackingStream>,
    last_page_id: u32,
}

/// Fixed-size page store over a backing stream
///
/// Page `id` lives at byte offset `id * page_size`. The region of page 0
/// is never handed out and is reserved for the owner's header.
pub struct RawPageStore {
    /// Stream and allocation counter. Seek and the following I/O must
    /// happen under one lock.
    inner: Mutex<Inner>,
    page_size: usize,
}

impl RawPageStore {
    /// Create a store over any backing stream.
    ///
    /// `last_page_id` is the highest id already handed out (0 for a new
    /// stream), normally restored from the owner's metadata.
    pub fn new(stream: Box<dyn BackingStream>, page_size: usize, last_page_id: u32) -> Result<Self> {
        if page_size < MIN_PAGE_SIZE {
            return Err(StorageError::invalid_operation(format!(
                "page size {} is below the minimum of {}",
                page_size, MIN_PAGE_SIZE
            )));
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                stream,
                last_page_id,
            }),
            page_size,
        })
    }

    /// Open or create a file-backed store
    pub fn open(path: &Path, page_size: usize, last_page_id: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Self::new(Box::new(file), page_size, last_page_id)
    }

    /// Create an empty store held in memory
    pub fn in_memory(page_size: usize) -> Result<Self> {
        Self::new(Box::new(Cursor::new(Vec::new())), page_size, 0)
    }

    /// Page size in bytes
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Highest page id handed out so far
    pub fn last_page_id(&self) -> PageId {
        PageId::new(self.inner.lock().last_page_id)
    }

    /// Current length of the backing stream in bytes
    pub fn stream_len(&self) -> Result<u64> {
        let mut inner = self.inner.lock();
        Ok(inner.stream.seek(SeekFrom::End(0))?)
    }

    /// Hand out the next page id and extend the stream with a zeroed page
    pub fn allocate_page_id(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();

        let next = inner
            .last_page_id
            .checked_add(1)
            .ok_or_else(|| StorageError::invalid_operation("page id space exhausted"))?;
        let page_id = PageId::new(next);

        let zeros = vec![0u8; self.page_size];
        inner.stream.seek(SeekFrom::Start(page_id.file_offset(self.page_size)))?;
        inner.stream.write_all(&zeros)?;
        inner.last_page_id = next;

        Ok(page_id)
    }

    /// Read `count` bytes from the start of a page.
    ///
    /// A `count` of 0, or one larger than the page size, reads the whole
    /// page.
    pub fn read_page(&self, page_id: PageId, count: usize) -> Result<Vec<u8>> {
        if page_id.is_none() {
            return Err(StorageError::invalid_operation("cannot read page 0"));
        }

        let count = if count == 0 || count > self.page_size {
            self.page_size
        } else {
            count
        };

        let mut buf = vec![0u8; count];
        let mut inner = self.inner.lock();
        inner.stream.seek(SeekFrom::Start(page_id.file_offset(self.page_size)))?;
        inner.stream.read_exact(&mut buf)?;

        Ok(buf)
    }

    /// Write a page. Data shorter than the page is zero-padded.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        if page_id.is_none() {
            return Err(StorageError::invalid_operation("cannot write page 0"));
        }

        if data.len() > self.page_size {
            return Err(StorageError::PageOverflow {
                page_id,
                size: data.len(),
                max: self.page_size,
            });
        }

        let mut page = vec![0u8; self.page_size];
        page[..data.len()].copy_from_slice(data);

        let mut inner = self.inner.lock();
        inner.stream.seek(SeekFrom::Start(page_id.file_offset(self.page_size)))?;
        inner.stream.write_all(&page)?;

        Ok(())
    }

    /// Read the start of the reserved page-0 region
    pub fn read_reserved(&self, len: usize) -> Result<Vec<u8>> {
        if len > self.page_size {
            return Err(StorageError::invalid_operation(format!(
                "reserved region is {} bytes, asked for {}",
                self.page_size, len
            )));
        }

        let mut buf = vec![0u8; len];
        let mut inner = self.inner.lock();
        inner.stream.seek(SeekFrom::Start(0))?;
        inner.stream.read_exact(&mut buf)?;

        Ok(buf)
    }

    /// Overwrite the start of the reserved page-0 region
    pub fn write_reserved(&self, data: &[u8]) -> Result<()> {
        if data.len() > self.page_size {
            return Err(StorageError::PageOverflow {
                page_id: PageId::NONE,
                size: data.len(),
                max: self.page_size,
            });
        }

        let mut inner = self.inner.lock();
        inner.stream.seek(SeekFrom::Start(0))?;
        inner.stream.write_all(data)?;

        Ok(())
    }

    /// Flush the stream to stable storage
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.stream.flush()?;
        inner.stream.sync()?;
        Ok(())
    }
}
