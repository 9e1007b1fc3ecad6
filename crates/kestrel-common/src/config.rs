//! Configuration structures for the Kestrel page store.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration shared by the disk layer and the buffer pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for data files.
    pub data_dir: PathBuf,
    /// Enable fsync after every page write.
    pub fsync_enabled: bool,
    /// Buffer pool size in number of pages.
    pub buffer_pool_pages: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
            buffer_pool_pages: 8192, // 128 MB with 16 KB pages
        }
    }
}
