//! Storage layer for the Kestrel page store.
//!
//! This crate provides:
//! - The `PageFile` interface the buffer pool performs I/O through
//! - Disk-backed page files with page allocation and disposal
//! - A disk manager that opens data files by id

mod disk;
mod file;

pub use disk::{DiskFile, DiskManager, DiskManagerConfig};
pub use file::PageFile;
