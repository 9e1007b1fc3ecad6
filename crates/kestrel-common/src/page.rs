//! Page structures for the Kestrel page store.

use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// Default page size in bytes (16 KB).
pub const PAGE_SIZE: usize = 16 * 1024;

/// Identifier of an open page file.
pub type FileId = u32;

/// Page number within a file (0-indexed).
pub type PageNum = u32;

/// Unique identifier for a page: the file it lives in and its number there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId {
    /// File identifier.
    pub file_id: FileId,
    /// Page number within the file.
    pub page_num: PageNum,
}

impl PageId {
    /// Creates a new PageId.
    pub fn new(file_id: FileId, page_num: PageNum) -> Self {
        Self { file_id, page_num }
    }

    /// Returns the PageId as a single u64 for compact storage.
    pub fn as_u64(&self) -> u64 {
        ((self.file_id as u64) << 32) | (self.page_num as u64)
    }

    /// Creates a PageId from a u64 representation.
    pub fn from_u64(value: u64) -> Self {
        Self {
            file_id: (value >> 32) as u32,
            page_num: value as u32,
        }
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file_id, self.page_num)
    }
}

/// Raw fixed-size page.
///
/// The page is an opaque byte container. The only structure imposed on it is
/// an 8-byte identity stamp at the start (file_id then page_num, both
/// little-endian), written by [`Page::init`].
#[derive(Clone)]
pub struct Page {
    data: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    /// Size of the identity stamp at the start of the page.
    pub const HEADER_SIZE: usize = 8;

    /// Creates a zeroed page.
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
        }
    }

    /// Zeroes the page and stamps it with `page_id`.
    pub fn init(&mut self, page_id: PageId) {
        self.data.fill(0);
        self.data[0..4].copy_from_slice(&page_id.file_id.to_le_bytes());
        self.data[4..8].copy_from_slice(&page_id.page_num.to_le_bytes());
    }

    /// Returns the identity stamped into the page header.
    pub fn stamped_id(&self) -> PageId {
        let file_id = u32::from_le_bytes([self.data[0], self.data[1], self.data[2], self.data[3]]);
        let page_num = u32::from_le_bytes([self.data[4], self.data[5], self.data[6], self.data[7]]);
        PageId::new(file_id, page_num)
    }

    /// Returns the bytes following the identity stamp.
    pub fn payload(&self) -> &[u8] {
        &self.data[Self::HEADER_SIZE..]
    }

    /// Returns the bytes following the identity stamp, mutably.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[Self::HEADER_SIZE..]
    }

    /// Returns the full page image.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    /// Returns the full page image, mutably.
    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Page {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data[..]
    }
}

impl DerefMut for Page {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("stamped_id", &self.stamped_id())
            .finish_non_exhaustive()
    }
}
