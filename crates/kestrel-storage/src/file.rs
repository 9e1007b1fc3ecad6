//! Page file interface consumed by the buffer pool.

use kestrel_common::page::{FileId, Page, PageNum};
use kestrel_common::Result;

/// A file of fixed-size pages.
///
/// The buffer pool performs all of its I/O through this trait and keys
/// resident pages by `(file_id(), page_num)`, so `file_id` must be unique
/// among the files that share a pool.
pub trait PageFile: Send + Sync {
    /// Returns the identifier of this file.
    fn file_id(&self) -> FileId;

    /// Reads page `page_num` into `page`.
    fn read_page(&self, page_num: PageNum, page: &mut Page) -> Result<()>;

    /// Writes `page` to page `page_num`.
    fn write_page(&self, page_num: PageNum, page: &Page) -> Result<()>;

    /// Allocates a new page and returns its number.
    fn allocate_page(&self) -> Result<PageNum>;

    /// Releases page `page_num` back to the file.
    fn dispose_page(&self, page_num: PageNum) -> Result<()>;
}
