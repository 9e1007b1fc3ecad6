//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameId, FrameState};
use crate::page_table::PageTable;
use crate::replacer::ClockReplacer;
use kestrel_common::page::{Page, PageId, PageNum, PAGE_SIZE};
use kestrel_common::{KestrelError, Result, StorageConfig};
use kestrel_storage::PageFile;
use parking_lot::{Mutex, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use sysinfo::System;
use tracing::{debug, trace, warn};

/// Minimum frame count for an automatically sized pool.
const MIN_AUTO_FRAMES: usize = 1_000;

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
    /// Number of buckets in the page table.
    pub index_buckets: usize,
}

impl BufferPoolConfig {
    /// Creates a configuration for `num_frames` frames with a page table
    /// about 1.2 times that size.
    pub fn new(num_frames: usize) -> Self {
        Self {
            num_frames,
            index_buckets: (num_frames as f64 * 1.2) as usize + 1,
        }
    }

    /// Checks that the configuration describes a usable pool.
    pub fn validate(&self) -> Result<()> {
        if self.num_frames == 0 {
            return Err(KestrelError::ConfigError(
                "buffer pool needs at least one frame".to_string(),
            ));
        }
        if self.num_frames > u32::MAX as usize {
            return Err(KestrelError::ConfigError(format!(
                "buffer pool frame count {} exceeds {}",
                self.num_frames,
                u32::MAX
            )));
        }
        if self.index_buckets == 0 {
            return Err(KestrelError::ConfigError(
                "page table needs at least one bucket".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl From<&StorageConfig> for BufferPoolConfig {
    fn from(config: &StorageConfig) -> Self {
        Self::new(config.buffer_pool_pages)
    }
}

/// Returns the frame count for a pool taking 25% of `available_bytes`,
/// never less than 1,000 frames.
pub fn frames_for_memory(available_bytes: u64) -> usize {
    let target_bytes = usize::try_from(available_bytes / 4).unwrap_or(usize::MAX);
    (target_bytes / PAGE_SIZE).max(MIN_AUTO_FRAMES)
}

/// State changed only under the pool lock.
struct PoolState {
    page_table: PageTable,
    replacer: ClockReplacer,
}

/// Buffer pool manager.
///
/// Multiplexes a fixed number of frames over the pages of any number of
/// files. Resident pages are found through the page table; on a miss the
/// clock replacer frees a frame, writing its page back first if it is
/// dirty. Pinned frames are never evicted.
///
/// All bookkeeping runs under a single lock. Page bytes are guarded per
/// frame, so a pinned page can be read or written without that lock.
///
/// Operations that may load a page (`fetch_page`, `allocate_page`) take the
/// file as `&Arc<dyn PageFile>`, since the frame keeps a handle for later
/// write-back. `dispose_page` and `flush_file` only borrow the file.
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Frame arena, addressed by FrameId.
    frames: Vec<BufferFrame>,
    /// Page table and clock hand.
    state: Mutex<PoolState>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    write_backs: AtomicU64,
}

impl BufferPool {
    /// Creates a new buffer pool.
    pub fn new(config: BufferPoolConfig) -> Result<Self> {
        config.validate()?;
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        let state = PoolState {
            page_table: PageTable::new(config.index_buckets),
            replacer: ClockReplacer::new(num_frames),
        };

        debug!(num_frames, index_buckets = state.page_table.num_buckets(), "created buffer pool");

        Ok(Self {
            config,
            frames,
            state: Mutex::new(state),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            write_backs: AtomicU64::new(0),
        })
    }

    /// Creates a buffer pool sized to 25% of available system RAM.
    ///
    /// Minimum 1,000 frames so that small machines still get useful caching.
    pub fn auto_sized() -> Result<Self> {
        let mut sys = System::new();
        sys.refresh_memory();

        Self::new(BufferPoolConfig::new(frames_for_memory(sys.available_memory())))
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of frames holding no page.
    pub fn free_count(&self) -> usize {
        let _state = self.state.lock();
        self.frames.iter().filter(|f| !f.is_valid()).count()
    }

    /// Returns the number of pages currently in the pool.
    pub fn page_count(&self) -> usize {
        self.state.lock().page_table.len()
    }

    /// Checks if a page is in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains(page_id)
    }

    /// Returns the pin count of a resident page.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        let frame_id = state.page_table.lookup(page_id)?;
        Some(self.frame(frame_id).pin_count())
    }

    #[inline(always)]
    fn frame(&self, frame_id: FrameId) -> &BufferFrame {
        &self.frames[frame_id.index()]
    }

    /// Fetches a page, reading it from `file` if it is not resident.
    ///
    /// The page is pinned until the returned handle is released or dropped.
    pub fn fetch_page(&self, file: &Arc<dyn PageFile>, page_num: PageNum) -> Result<PinnedPage<'_>> {
        let page_id = PageId::new(file.file_id(), page_num);
        let mut state = self.state.lock();

        if let Some(frame_id) = state.page_table.lookup(page_id) {
            let frame = self.frame(frame_id);
            frame.pin();
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(page = %page_id, frame = %frame_id, pins = frame.pin_count(), "page hit");
            return Ok(PinnedPage::new(self, page_id, frame));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let frame_id = self.evict_frame(&mut state)?;
        let frame = self.frame(frame_id);

        // A failed read leaves the frame empty and unindexed.
        {
            let mut data = frame.write_data();
            file.read_page(page_num, &mut *data)?;
        }

        self.publish(&mut state, frame, page_id, file)?;
        trace!(page = %page_id, frame = %frame_id, "page loaded");
        Ok(PinnedPage::new(self, page_id, frame))
    }

    /// Allocates a new page in `file` and pins it in the pool.
    ///
    /// The page buffer is zeroed and stamped with the new identity. If no
    /// frame can be freed the page stays allocated in the file.
    pub fn allocate_page(&self, file: &Arc<dyn PageFile>) -> Result<(PageNum, PinnedPage<'_>)> {
        let page_num = file.allocate_page()?;
        let page_id = PageId::new(file.file_id(), page_num);

        let mut state = self.state.lock();
        let frame_id = self.evict_frame(&mut state)?;
        let frame = self.frame(frame_id);
        frame.write_data().init(page_id);

        self.publish(&mut state, frame, page_id, file)?;
        debug!(page = %page_id, frame = %frame_id, "allocated page");
        Ok((page_num, PinnedPage::new(self, page_id, frame)))
    }

    /// Drops one pin from a resident page, marking it dirty if `is_dirty`.
    ///
    /// Dirty is sticky: releasing with `is_dirty = false` never clears it.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<()> {
        let state = self.state.lock();
        let frame_id = state
            .page_table
            .lookup(page_id)
            .ok_or(KestrelError::PageNotFound { page_id })?;
        let frame = self.frame(frame_id);

        frame
            .unpin()
            .ok_or(KestrelError::PageNotPinned { page_id })?;
        if is_dirty {
            frame.set_dirty(true);
        }
        Ok(())
    }

    /// Drops a page from the pool without writing it back and deallocates
    /// it in the file.
    ///
    /// A page that is not resident goes straight to the file. A pinned page
    /// is rejected with `PagePinned` and nothing is changed.
    pub fn dispose_page(&self, file: &dyn PageFile, page_num: PageNum) -> Result<()> {
        let page_id = PageId::new(file.file_id(), page_num);
        let mut state = self.state.lock();

        if let Some(frame_id) = state.page_table.lookup(page_id) {
            let frame = self.frame(frame_id);
            if frame.is_pinned() {
                return Err(KestrelError::PagePinned { page_id });
            }
            frame.clear();
            debug!(page = %page_id, frame = %frame_id, "dropped disposed page");
        }
        // Disposing a page that is not resident is not an error.
        let _ = state.page_table.remove(page_id);

        file.dispose_page(page_num)
    }

    /// Writes back and drops every resident page of `file`.
    ///
    /// Frames are visited in ascending order. Stops with `PagePinned` at
    /// the first pinned page of the file; pages flushed before it stay
    /// flushed and dropped.
    pub fn flush_file(&self, file: &dyn PageFile) -> Result<()> {
        let file_id = file.file_id();
        let mut state = self.state.lock();
        let mut flushed = 0usize;

        for frame in &self.frames {
            let Some(page_id) = frame.page_id() else {
                continue;
            };
            if page_id.file_id != file_id {
                continue;
            }
            if !frame.is_valid() {
                return Err(KestrelError::BadBuffer {
                    frame: frame.frame_id().0,
                    reason: format!("holds page {} but is not valid", page_id),
                });
            }
            if frame.is_pinned() {
                return Err(KestrelError::PagePinned { page_id });
            }

            if frame.write_back()? {
                self.write_backs.fetch_add(1, Ordering::Relaxed);
                flushed += 1;
            }
            self.unindex(&mut state, frame, page_id)?;
            frame.clear();
        }

        debug!(file = file_id, flushed, "flushed file");
        Ok(())
    }

    /// Writes back every unpinned dirty page without evicting anything.
    ///
    /// Pinned pages are skipped and stay dirty, so a caller holding a page's
    /// write guard never blocks the flush. Returns the number of pages written.
    pub fn flush_all(&self) -> Result<usize> {
        let state = self.state.lock();
        if state.page_table.is_empty() {
            return Ok(0);
        }
        let mut flushed = 0;

        for frame in &self.frames {
            if frame.is_pinned() {
                continue;
            }
            if frame.write_back()? {
                self.write_backs.fetch_add(1, Ordering::Relaxed);
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Frees a frame with the clock replacer.
    ///
    /// A dirty victim is written back first; if that write fails the victim
    /// keeps its page and the error is returned.
    fn evict_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        let frame_id = state
            .replacer
            .find_victim(&self.frames)
            .ok_or(KestrelError::BufferExceeded)?;
        let frame = self.frame(frame_id);

        if frame.is_valid() {
            let written = frame.write_back()?;
            if written {
                self.write_backs.fetch_add(1, Ordering::Relaxed);
            }
            if let Some(old_page_id) = frame.page_id() {
                self.unindex(state, frame, old_page_id)?;
                debug!(page = %old_page_id, frame = %frame_id, written, "evicted page");
            }
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        frame.clear();
        Ok(frame_id)
    }

    /// Publishes `page_id` in an empty frame that already holds its bytes.
    ///
    /// If the page table rejects the entry the frame stays empty.
    fn publish(
        &self,
        state: &mut PoolState,
        frame: &BufferFrame,
        page_id: PageId,
        file: &Arc<dyn PageFile>,
    ) -> Result<()> {
        if let Err(e) = state.page_table.insert(page_id, frame.frame_id()) {
            warn!(page = %page_id, frame = %frame.frame_id(), error = %e, "page table insert failed");
            frame.clear();
            return Err(e);
        }
        frame.load(page_id, Arc::clone(file));
        Ok(())
    }

    /// Removes a valid frame's page from the page table.
    fn unindex(&self, state: &mut PoolState, frame: &BufferFrame, page_id: PageId) -> Result<()> {
        state
            .page_table
            .remove(page_id)
            .map_err(|_| KestrelError::BadBuffer {
                frame: frame.frame_id().0,
                reason: format!("page {} is valid but missing from the page table", page_id),
            })?;
        Ok(())
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let state = self.state.lock();
        let mut pinned_frames = 0;
        let mut dirty_frames = 0;

        for (_, frame_id) in state.page_table.iter() {
            let frame = self.frame(frame_id);
            if frame.is_pinned() {
                pinned_frames += 1;
            }
            if frame.is_dirty() {
                dirty_frames += 1;
            }
        }

        let used_frames = state.page_table.len();
        BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: self.config.num_frames - used_frames,
            used_frames,
            pinned_frames,
            dirty_frames,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            write_backs: self.write_backs.load(Ordering::Relaxed),
        }
    }

    /// Returns a snapshot of every frame for debugging.
    ///
    /// The stamped identity is omitted for frames whose bytes are being
    /// written by a caller at the time of the call.
    pub fn dump(&self) -> PoolDump {
        let _state = self.state.lock();
        let frames = self
            .frames
            .iter()
            .map(|frame| FrameInfo {
                frame_id: frame.frame_id(),
                state: frame.state(),
                page_id: frame.page_id(),
                stamped_id: frame.try_read_data().map(|data| data.stamped_id()),
                pin_count: frame.pin_count(),
                dirty: frame.is_dirty(),
                referenced: frame.reference_bit(),
            })
            .collect();
        PoolDump { frames }
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        for frame in &self.frames {
            if let Err(e) = frame.write_back() {
                warn!(frame = %frame.frame_id(), page = ?frame.page_id(), error = %e, "failed to write back page on shutdown");
            }
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of frames without a page.
    pub free_frames: usize,
    /// Number of frames with pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
    /// Fetches served from the pool.
    pub hits: u64,
    /// Fetches that read from a file.
    pub misses: u64,
    /// Pages evicted by the replacer.
    pub evictions: u64,
    /// Pages written back to their files.
    pub write_backs: u64,
}

impl BufferPoolStats {
    /// Returns the fetch hit ratio (0.0 to 1.0).
    pub fn hit_ratio(&self) -> f64 {
        let fetches = self.hits + self.misses;
        if fetches == 0 {
            0.0
        } else {
            self.hits as f64 / fetches as f64
        }
    }
}

/// Diagnostic view of one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_id: FrameId,
    pub state: FrameState,
    /// Page published in the frame.
    pub page_id: Option<PageId>,
    /// Identity stamped in the frame's page header.
    pub stamped_id: Option<PageId>,
    pub pin_count: u32,
    pub dirty: bool,
    pub referenced: bool,
}

/// Snapshot of every frame in a pool, printable as a table.
#[derive(Debug, Clone)]
pub struct PoolDump {
    pub frames: Vec<FrameInfo>,
}

impl std::fmt::Display for PoolDump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "frame\tpage\tstamp\tpins\tflags")?;
        for info in &self.frames {
            let page = info.page_id.map_or_else(|| "-".to_string(), |p| p.to_string());
            let stamp = info.stamped_id.map_or_else(|| "?".to_string(), |p| p.to_string());
            write!(f, "{}\t{}\t{}\t{}\t", info.frame_id.0, page, stamp, info.pin_count)?;
            if info.state == FrameState::Loaded {
                write!(f, "valid")?;
            }
            if info.dirty {
                write!(f, " dirty")?;
            }
            if info.referenced {
                write!(f, " ref")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// A pinned page.
///
/// Returned by [`BufferPool::fetch_page`] and [`BufferPool::allocate_page`].
/// The pin is dropped by [`PinnedPage::release`], or when the handle is
/// dropped. The page cannot be evicted while the handle is alive.
pub struct PinnedPage<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame: &'a BufferFrame,
    dirty: bool,
    released: bool,
}

impl<'a> PinnedPage<'a> {
    fn new(pool: &'a BufferPool, page_id: PageId, frame: &'a BufferFrame) -> Self {
        Self {
            pool,
            page_id,
            frame,
            dirty: false,
            released: false,
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page number within its file.
    pub fn page_num(&self) -> PageNum {
        self.page_id.page_num
    }

    /// Returns the frame holding the page.
    pub fn frame_id(&self) -> FrameId {
        self.frame.frame_id()
    }

    /// Returns the page data.
    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.frame.read_data()
    }

    /// Returns mutable access to the page data.
    ///
    /// Writing does not mark the page dirty; use [`PinnedPage::mark_dirty`]
    /// or release with `dirty = true`.
    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.frame.write_data()
    }

    /// Marks the page dirty when the pin is dropped.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Drops the pin, marking the page dirty if `dirty` or `mark_dirty`
    /// was called.
    pub fn release(mut self, dirty: bool) -> Result<()> {
        self.released = true;
        self.pool.unpin_page(self.page_id, self.dirty || dirty)
    }

    /// Keeps the pin but gives up the handle.
    ///
    /// The caller becomes responsible for [`BufferPool::unpin_page`].
    pub fn detach(mut self) -> PageId {
        self.released = true;
        self.page_id
    }
}

impl Drop for PinnedPage<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.pool.unpin_page(self.page_id, self.dirty) {
            warn!(page = %self.page_id, error = %e, "failed to unpin dropped page");
        }
    }
}

impl std::fmt::Debug for PinnedPage<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedPage")
            .field("page_id", &self.page_id)
            .field("frame_id", &self.frame.frame_id())
            .field("dirty", &self.dirty)
            .finish()
    }
}
