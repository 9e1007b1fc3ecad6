//! Error types for the Kestrel page store.

use crate::page::PageId;
use thiserror::Error;

/// Result type alias using KestrelError.
pub type Result<T> = std::result::Result<T, KestrelError>;

/// Errors that can occur in page store operations.
#[derive(Debug, Error)]
pub enum KestrelError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    // Buffer pool errors
    #[error("Buffer exceeded, all frames are pinned")]
    BufferExceeded,

    #[error("Page not found in buffer pool: {page_id}")]
    PageNotFound { page_id: PageId },

    #[error("Page not pinned: {page_id}")]
    PageNotPinned { page_id: PageId },

    #[error("Page pinned: {page_id}")]
    PagePinned { page_id: PageId },

    #[error("Bad buffer in frame {frame}: {reason}")]
    BadBuffer { frame: u32, reason: String },

    #[error("Page index error: {0}")]
    IndexError(String),

    // File errors
    #[error("Page {page_id} is not allocated")]
    PageNotAllocated { page_id: PageId },

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl KestrelError {
    /// Returns true if the caller can retry after releasing pins.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BufferExceeded)
    }

    /// Returns true if the error came from the file layer.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::IoError(_) | Self::PageNotAllocated { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: KestrelError = io_err.into();
        assert!(matches!(err, KestrelError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
        assert!(err.is_io());
    }

    #[test]
    fn test_buffer_exceeded_display() {
        let err = KestrelError::BufferExceeded;
        assert_eq!(err.to_string(), "Buffer exceeded, all frames are pinned");
        assert!(err.is_retryable());
        assert!(!err.is_io());
    }

    #[test]
    fn test_page_errors_display() {
        let page_id = PageId::new(3, 17);

        let err = KestrelError::PageNotFound { page_id };
        assert_eq!(err.to_string(), "Page not found in buffer pool: 3:17");

        let err = KestrelError::PageNotPinned { page_id };
        assert_eq!(err.to_string(), "Page not pinned: 3:17");

        let err = KestrelError::PagePinned { page_id };
        assert_eq!(err.to_string(), "Page pinned: 3:17");

        let err = KestrelError::PageNotAllocated { page_id };
        assert_eq!(err.to_string(), "Page 3:17 is not allocated");
        assert!(err.is_io());
    }

    #[test]
    fn test_bad_buffer_display() {
        let err = KestrelError::BadBuffer {
            frame: 4,
            reason: "identity without valid flag".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Bad buffer in frame 4: identity without valid flag"
        );
    }

    #[test]
    fn test_index_error_is_distinct() {
        let err = KestrelError::IndexError("table full".to_string());
        assert_eq!(err.to_string(), "Page index error: table full");
        assert!(!err.is_io());
        assert!(!err.is_retryable());
        assert!(!matches!(err, KestrelError::PageNotFound { .. }));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KestrelError>();
    }
}
