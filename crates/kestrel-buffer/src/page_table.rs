//! Page table mapping resident page IDs to frame IDs.

use crate::frame::FrameId;
use kestrel_common::page::PageId;
use kestrel_common::{KestrelError, Result};

#[derive(Debug, Clone, Copy)]
enum Bucket {
    Empty,
    /// Deleted entry; probing continues past it.
    Tombstone,
    Occupied { page_id: PageId, frame_id: FrameId },
}

/// Fixed-size open-addressing hash table from PageId to FrameId.
///
/// Uses linear probing with tombstones. The table never grows: an insert
/// fails once every bucket holds a live entry, and inserting an identity
/// that is already present is rejected.
pub struct PageTable {
    buckets: Box<[Bucket]>,
    len: usize,
}

impl PageTable {
    /// Creates a page table with `num_buckets` buckets (at least one).
    pub fn new(num_buckets: usize) -> Self {
        Self {
            buckets: vec![Bucket::Empty; num_buckets.max(1)].into_boxed_slice(),
            len: 0,
        }
    }

    /// Looks up a page ID and returns its frame ID if present.
    pub fn lookup(&self, page_id: PageId) -> Option<FrameId> {
        let mut idx = self.hash_index(page_id);
        for _ in 0..self.buckets.len() {
            match self.buckets[idx] {
                Bucket::Empty => return None,
                Bucket::Occupied {
                    page_id: stored,
                    frame_id,
                } if stored == page_id => return Some(frame_id),
                _ => {}
            }
            idx = self.next(idx);
        }
        None
    }

    /// Inserts a page ID to frame ID mapping.
    ///
    /// Fails with `IndexError` if the page is already mapped or the table
    /// has no free bucket.
    pub fn insert(&mut self, page_id: PageId, frame_id: FrameId) -> Result<()> {
        let mut idx = self.hash_index(page_id);
        let mut reusable = None;

        for _ in 0..self.buckets.len() {
            match self.buckets[idx] {
                Bucket::Empty => {
                    reusable = reusable.or(Some(idx));
                    break;
                }
                Bucket::Tombstone => {
                    reusable = reusable.or(Some(idx));
                }
                Bucket::Occupied { page_id: stored, .. } if stored == page_id => {
                    return Err(KestrelError::IndexError(format!(
                        "page {} is already mapped",
                        page_id
                    )));
                }
                Bucket::Occupied { .. } => {}
            }
            idx = self.next(idx);
        }

        let Some(slot) = reusable else {
            return Err(KestrelError::IndexError(format!(
                "no free bucket for page {} ({} buckets)",
                page_id,
                self.buckets.len()
            )));
        };
        self.buckets[slot] = Bucket::Occupied { page_id, frame_id };
        self.len += 1;
        Ok(())
    }

    /// Removes a page ID mapping and returns the frame it pointed to.
    ///
    /// Fails with `PageNotFound` if the page is not mapped.
    pub fn remove(&mut self, page_id: PageId) -> Result<FrameId> {
        let mut idx = self.hash_index(page_id);
        for _ in 0..self.buckets.len() {
            match self.buckets[idx] {
                Bucket::Empty => break,
                Bucket::Occupied {
                    page_id: stored,
                    frame_id,
                } if stored == page_id => {
                    self.buckets[idx] = Bucket::Tombstone;
                    self.len -= 1;
                    return Ok(frame_id);
                }
                _ => {}
            }
            idx = self.next(idx);
        }
        Err(KestrelError::PageNotFound { page_id })
    }

    /// Returns true if the page ID is in the table.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.lookup(page_id).is_some()
    }

    /// Returns the number of entries in the table.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of buckets.
    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Iterates over all entries in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = (PageId, FrameId)> + '_ {
        self.buckets.iter().filter_map(|bucket| match *bucket {
            Bucket::Occupied { page_id, frame_id } => Some((page_id, frame_id)),
            _ => None,
        })
    }

    #[inline(always)]
    fn hash_index(&self, page_id: PageId) -> usize {
        // FxHash-style multiply, folding the high half into the low half
        let hash = page_id.as_u64().wrapping_mul(0x517cc1b727220a95);
        ((hash ^ (hash >> 32)) % self.buckets.len() as u64) as usize
    }

    #[inline(always)]
    fn next(&self, idx: usize) -> usize {
        (idx + 1) % self.buckets.len()
    }
}

impl std::fmt::Debug for PageTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageTable")
            .field("len", &self.len)
            .field("num_buckets", &self.buckets.len())
            .finish()
    }
}
