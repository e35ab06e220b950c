//! # TapeStore Storage
//!
//! Segment backend trait and implementations for TapeStore.
//!
//! This crate provides the lowest-level storage abstraction for TapeStore.
//! Backends are **opaque byte stores** holding named segments - they do not
//! interpret the data they store.
//!
//! ## Design Principles
//!
//! - Backends store named segments and accept positional page writes
//! - No knowledge of frames, versions or streams
//! - Must be `Send + Sync` for concurrent access
//! - Failures are classified transient or permanent; transient ones are
//!   retried through a [`RetryPolicy`]
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing, ephemeral stores and page-blob emulation
//! - [`FileBackend`] - For persistent storage in a locked directory
//!
//! ## Example
//!
//! ```rust
//! use tapestore_storage::{InMemoryBackend, SegmentBackend};
//!
//! let backend = InMemoryBackend::new();
//! let mut writer = backend.create_or_open_for_append("00000000.dat", 4096).unwrap();
//! writer.write_page(0, b"hello world").unwrap();
//! assert_eq!(backend.read_segment("00000000.dat").unwrap(), b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod retry;

pub use backend::{
    is_segment_id, CleanupPolicy, SegmentBackend, SegmentInfo, SegmentWriter, BACKUP_SUFFIX,
    SEGMENT_EXTENSION,
};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use retry::{RetryConfig, RetryPolicy};
