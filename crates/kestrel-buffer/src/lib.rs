//! Buffer pool management for the Kestrel page store.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable frame count
//! - Clock eviction policy with second-chance reference bits
//! - Pin counting, with pinned pages handed out as `PinnedPage` handles
//! - Dirty page tracking and write-back on eviction, flush, and shutdown

mod frame;
mod page_table;
mod pool;
mod replacer;

pub use frame::{FrameId, FrameState};
pub use page_table::PageTable;
pub use pool::{
    frames_for_memory, BufferPool, BufferPoolConfig, BufferPoolStats, FrameInfo, PinnedPage,
    PoolDump,
};
