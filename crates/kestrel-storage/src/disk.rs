//! Disk-backed page files.

use crate::file::PageFile;
use kestrel_common::page::{FileId, Page, PageId, PageNum, PAGE_SIZE};
use kestrel_common::{KestrelError, Result, StorageConfig};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A page file stored in a single OS file.
///
/// Page N lives at byte offset `N * PAGE_SIZE`. Disposed page numbers are
/// kept in memory and handed out again by `allocate_page` before the file
/// is extended.
pub struct DiskFile {
    file_id: FileId,
    path: PathBuf,
    fsync_enabled: bool,
    inner: Mutex<DiskFileInner>,
}

struct DiskFileInner {
    file: File,
    /// Number of pages in the file, allocated or not.
    num_pages: u32,
    /// Disposed page numbers available for reuse.
    free_pages: BTreeSet<PageNum>,
}

impl DiskFile {
    /// Opens or creates the file at `path`.
    pub fn open(file_id: FileId, path: impl AsRef<Path>, fsync_enabled: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self {
            file_id,
            path,
            fsync_enabled,
            inner: Mutex::new(DiskFileInner {
                file,
                num_pages,
                free_pages: BTreeSet::new(),
            }),
        })
    }

    /// Returns the path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of pages in the file, including disposed ones.
    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }

    /// Returns the number of disposed pages awaiting reuse.
    pub fn free_page_count(&self) -> usize {
        self.inner.lock().free_pages.len()
    }

    /// Flushes pending writes to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }

    fn check_allocated(&self, inner: &DiskFileInner, page_num: PageNum) -> Result<()> {
        if page_num >= inner.num_pages || inner.free_pages.contains(&page_num) {
            return Err(KestrelError::PageNotAllocated {
                page_id: PageId::new(self.file_id, page_num),
            });
        }
        Ok(())
    }

    fn write_at(&self, inner: &mut DiskFileInner, page_num: PageNum, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let offset = (page_num as u64) * (PAGE_SIZE as u64);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(data)?;

        if self.fsync_enabled {
            inner.file.sync_all()?;
        }
        Ok(())
    }
}

impl PageFile for DiskFile {
    fn file_id(&self) -> FileId {
        self.file_id
    }

    fn read_page(&self, page_num: PageNum, page: &mut Page) -> Result<()> {
        let mut inner = self.inner.lock();
        self.check_allocated(&inner, page_num)?;

        let offset = (page_num as u64) * (PAGE_SIZE as u64);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read_exact(page.as_bytes_mut())?;
        Ok(())
    }

    fn write_page(&self, page_num: PageNum, page: &Page) -> Result<()> {
        let mut inner = self.inner.lock();
        self.check_allocated(&inner, page_num)?;
        self.write_at(&mut inner, page_num, page.as_bytes())
    }

    fn allocate_page(&self) -> Result<PageNum> {
        let mut inner = self.inner.lock();

        let (page_num, extends) = match inner.free_pages.first().copied() {
            Some(page_num) => (page_num, false),
            None => (inner.num_pages, true),
        };

        let mut page = Page::new();
        page.init(PageId::new(self.file_id, page_num));
        self.write_at(&mut inner, page_num, page.as_bytes())?;

        if extends {
            inner.num_pages = page_num + 1;
        } else {
            inner.free_pages.remove(&page_num);
        }

        debug!(file = self.file_id, page = page_num, reused = !extends, "allocated page");
        Ok(page_num)
    }

    fn dispose_page(&self, page_num: PageNum) -> Result<()> {
        let mut inner = self.inner.lock();
        self.check_allocated(&inner, page_num)?;
        inner.free_pages.insert(page_num);

        debug!(file = self.file_id, page = page_num, "disposed page");
        Ok(())
    }
}

impl std::fmt::Debug for DiskFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskFile")
            .field("file_id", &self.file_id)
            .field("path", &self.path)
            .field("num_pages", &self.num_pages())
            .finish()
    }
}

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for data files.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

impl From<&StorageConfig> for DiskManagerConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            fsync_enabled: config.fsync_enabled,
        }
    }
}

/// Opens and caches page files by id.
///
/// Each file_id maps to `{file_id:08}.dat` under the data directory.
pub struct DiskManager {
    config: DiskManagerConfig,
    files: Mutex<HashMap<FileId, Arc<DiskFile>>>,
}

impl DiskManager {
    /// Creates a new disk manager, creating the data directory if needed.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            config,
            files: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Generates the file path for a given file ID.
    fn file_path(&self, file_id: FileId) -> PathBuf {
        self.config.data_dir.join(format!("{:08}.dat", file_id))
    }

    /// Opens or creates a data file, returning the cached handle if open.
    pub fn open_file(&self, file_id: FileId) -> Result<Arc<DiskFile>> {
        let mut files = self.files.lock();

        if let Some(file) = files.get(&file_id) {
            return Ok(Arc::clone(file));
        }

        let file = Arc::new(DiskFile::open(
            file_id,
            self.file_path(file_id),
            self.config.fsync_enabled,
        )?);
        debug!(file = file_id, path = %file.path().display(), pages = file.num_pages(), "opened data file");
        files.insert(file_id, Arc::clone(&file));
        Ok(file)
    }

    /// Flushes all open files to stable storage.
    pub fn flush(&self) -> Result<()> {
        let files = self.files.lock();
        for file in files.values() {
            file.sync()?;
        }
        Ok(())
    }

    /// Closes a specific file.
    pub fn close_file(&self, file_id: FileId) -> Result<()> {
        let file = self.files.lock().remove(&file_id);
        if let Some(file) = file {
            file.sync()?;
        }
        Ok(())
    }

    /// Closes all open files.
    pub fn close_all(&self) -> Result<()> {
        let mut files = self.files.lock();
        for (_, file) in files.drain() {
            file.sync()?;
        }
        Ok(())
    }

    /// Deletes a data file.
    pub fn delete_file(&self, file_id: FileId) -> Result<()> {
        self.close_file(file_id)?;
        let path = self.file_path(file_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}
