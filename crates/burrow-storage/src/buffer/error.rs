//! Buffer pool errors.

use std::io;

use thiserror::Error;

/// Result type for buffer pool operations.
pub type BufferResult<T> = Result<T, BufferError>;

/// Errors that can occur during buffer pool operations.
#[derive(Debug, Error)]
pub enum BufferError {
    /// Every frame is pinned; nothing can be evicted to make room.
    #[error("no free frames available, all pages are pinned")]
    NoFreeFrames,

    /// I/O error while reading or writing a page.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying error from the disk manager.
        #[from]
        source: io::Error,
    },
}

impl BufferError {
    /// Returns true if this is a transient error that can be retried
    /// once some caller unpins a page.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NoFreeFrames)
    }
}
