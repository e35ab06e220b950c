//! Error types for segment backend operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during segment backend operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The named segment does not exist.
    #[error("segment not found: {0}")]
    SegmentNotFound(String),

    /// A page write was not aligned to the backend page size.
    #[error("misaligned page write: offset {offset}, len {len}, page size {page_size}")]
    Misaligned {
        /// The requested write offset.
        offset: u64,
        /// The requested write length.
        len: usize,
        /// The page size the backend requires.
        page_size: usize,
    },

    /// A write would extend past the declared segment capacity.
    #[error("write past segment capacity: offset {offset}, len {len}, capacity {capacity}")]
    CapacityExceeded {
        /// The requested write offset.
        offset: u64,
        /// The requested write length.
        len: usize,
        /// The declared capacity of the segment.
        capacity: u64,
    },

    /// Another writer holds the store lock.
    #[error("store locked: another process has exclusive access")]
    Locked,

    /// The backend was opened read-only.
    #[error("backend is read-only")]
    ReadOnly,

    /// A temporary backend failure that may succeed on retry.
    #[error("transient backend failure: {0}")]
    Transient(String),
}

impl StorageError {
    /// Creates a transient failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Returns true if the operation may succeed when retried.
    ///
    /// Everything not listed here is permanent and surfaces immediately.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}
