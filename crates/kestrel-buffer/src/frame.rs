//! Buffer frames: per-slot descriptor state plus the page buffer.

use kestrel_common::page::{Page, PageId};
use kestrel_common::Result;
use kestrel_storage::PageFile;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Sentinel value indicating no page is loaded in the frame.
const NO_PAGE: u64 = u64::MAX;

/// Index of a frame in the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u32);

impl FrameId {
    /// Returns the frame index as a usize.
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

/// Lifecycle state of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// No page is published in the frame.
    Empty,
    /// A page is published and indexed.
    Loaded,
}

/// A frame in the buffer pool holding a single page.
///
/// Descriptor fields are atomics so the frame can be shared by reference,
/// but every transition is made by the pool while it holds its state lock.
/// Only the page bytes are accessed outside that lock, through `data`.
pub(crate) struct BufferFrame {
    frame_id: FrameId,
    /// Packed identity of the resident page, NO_PAGE when empty.
    page_id: AtomicU64,
    /// Whether the page is published in the page table.
    valid: AtomicBool,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
    /// Reference bit for clock replacement.
    reference_bit: AtomicBool,
    /// File the resident page is written back to.
    file: Mutex<Option<Arc<dyn PageFile>>>,
    data: RwLock<Page>,
}

impl BufferFrame {
    /// Creates a new empty buffer frame.
    pub(crate) fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: AtomicU64::new(NO_PAGE),
            valid: AtomicBool::new(false),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            reference_bit: AtomicBool::new(false),
            file: Mutex::new(None),
            data: RwLock::new(Page::new()),
        }
    }

    #[inline]
    pub(crate) fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the page ID currently stored in this frame.
    #[inline]
    pub(crate) fn page_id(&self) -> Option<PageId> {
        let packed = self.page_id.load(Ordering::Acquire);
        if packed == NO_PAGE {
            None
        } else {
            Some(PageId::from_u64(packed))
        }
    }

    #[cfg(test)]
    pub(crate) fn set_page_id(&self, page_id: Option<PageId>) {
        let packed = page_id.map_or(NO_PAGE, |pid| pid.as_u64());
        self.page_id.store(packed, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub(crate) fn state(&self) -> FrameState {
        if self.is_valid() {
            FrameState::Loaded
        } else {
            FrameState::Empty
        }
    }

    #[inline]
    pub(crate) fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    #[inline]
    pub(crate) fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    #[inline]
    pub(crate) fn reference_bit(&self) -> bool {
        self.reference_bit.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_reference_bit(&self, value: bool) {
        self.reference_bit.store(value, Ordering::Relaxed);
    }

    /// Publishes `page_id` in this empty frame with a single pin.
    ///
    /// The page bytes must already be in place.
    pub(crate) fn load(&self, page_id: PageId, file: Arc<dyn PageFile>) {
        debug_assert_eq!(self.state(), FrameState::Empty);
        *self.file.lock() = Some(file);
        self.page_id.store(page_id.as_u64(), Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.pin_count.store(1, Ordering::Release);
        self.reference_bit.store(true, Ordering::Relaxed);
        self.valid.store(true, Ordering::Release);
    }

    /// Adds a pin to a loaded frame and returns the previous pin count.
    #[inline]
    pub(crate) fn pin(&self) -> u32 {
        let prev = self.pin_count.fetch_add(1, Ordering::AcqRel);
        self.reference_bit.store(true, Ordering::Relaxed);
        prev
    }

    /// Drops a pin and returns the new pin count.
    ///
    /// Returns None, leaving the count at zero, if the frame was not pinned.
    #[inline]
    pub(crate) fn unpin(&self) -> Option<u32> {
        self.pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
            .ok()
            .map(|prev| prev - 1)
    }

    /// Writes the page back to its file if it is loaded and dirty.
    ///
    /// Returns true if a write was issued. The dirty flag is only cleared
    /// once the write succeeds.
    pub(crate) fn write_back(&self) -> Result<bool> {
        if !self.is_valid() || !self.is_dirty() {
            return Ok(false);
        }
        let (Some(page_id), Some(file)) = (self.page_id(), self.file()) else {
            return Ok(false);
        };

        let data = self.data.read();
        file.write_page(page_id.page_num, &data)?;
        drop(data);

        self.set_dirty(false);
        Ok(true)
    }

    /// Returns the file of the resident page.
    pub(crate) fn file(&self) -> Option<Arc<dyn PageFile>> {
        self.file.lock().clone()
    }

    /// Returns the frame to the empty state. Page bytes are left as they are.
    pub(crate) fn clear(&self) {
        self.valid.store(false, Ordering::Release);
        self.page_id.store(NO_PAGE, Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.reference_bit.store(false, Ordering::Relaxed);
        *self.file.lock() = None;
    }

    #[inline]
    pub(crate) fn read_data(&self) -> RwLockReadGuard<'_, Page> {
        self.data.read()
    }

    /// Reads the page data without blocking, for diagnostics.
    pub(crate) fn try_read_data(&self) -> Option<RwLockReadGuard<'_, Page>> {
        self.data.try_read()
    }

    #[inline]
    pub(crate) fn write_data(&self) -> RwLockWriteGuard<'_, Page> {
        self.data.write()
    }
}

impl std::fmt::Debug for BufferFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferFrame")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id())
            .field("valid", &self.is_valid())
            .field("pin_count", &self.pin_count())
            .field("is_dirty", &self.is_dirty())
            .field("reference_bit", &self.reference_bit())
            .finish()
    }
}
