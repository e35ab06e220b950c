//! Error types for TapeStore core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in TapeStore core operations.
///
/// Optimistic concurrency conflicts are not errors; they are reported through
/// [`crate::AppendOutcome::Conflict`].
#[derive(Debug, Error)]
pub enum CoreError {
    /// Segment backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tapestore_storage::StorageError),

    /// An argument was rejected before any state changed.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// The calling thread already holds the index writer lock.
    #[error("lock recursion: the index writer lock is already held by this thread")]
    LockReentrancy,

    /// A previous append failed; the store refuses writes until reopened.
    #[error("store faulted: {reason}")]
    StoreFaulted {
        /// The error that faulted the store.
        reason: String,
    },

    /// Loading was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl CoreError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a store faulted error.
    pub fn store_faulted(reason: impl Into<String>) -> Self {
        Self::StoreFaulted {
            reason: reason.into(),
        }
    }

    /// Returns true if the underlying backend failure may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            _ => false,
        }
    }
}
