//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up test stores
//! and common test scenarios.

use std::path::Path;
use std::sync::Arc;
use tapestore_core::{StoreConfig, TapeStore};
use tapestore_storage::InMemoryBackend;
use tempfile::TempDir;

enum Backing {
    Memory(Arc<InMemoryBackend>),
    File(TempDir),
}

/// A test store with automatic cleanup.
///
/// The backing storage outlives the store, so [`TestStore::reopen`] sees
/// everything that was written.
pub struct TestStore {
    /// The store instance.
    pub store: TapeStore,
    config: StoreConfig,
    backing: Backing,
}

impl TestStore {
    /// Creates a new in-memory test store.
    pub fn memory() -> Self {
        Self::memory_with_config(StoreConfig::default())
    }

    /// Creates a new in-memory test store with a custom configuration.
    pub fn memory_with_config(config: StoreConfig) -> Self {
        Self::on_backend(Arc::new(InMemoryBackend::new()), config)
    }

    /// Creates a test store emulating a page-blob backend.
    pub fn page_blob() -> Self {
        let config = StoreConfig::page_blob();
        Self::on_backend(Arc::new(InMemoryBackend::paged(config.page_size)), config)
    }

    /// Creates a test store on an existing in-memory backend.
    pub fn on_backend(backend: Arc<InMemoryBackend>, config: StoreConfig) -> Self {
        let store = TapeStore::open_with_backend(Arc::clone(&backend), config.clone())
            .expect("Failed to open in-memory store");
        Self {
            store,
            config,
            backing: Backing::Memory(backend),
        }
    }

    /// Creates a new file-based test store.
    pub fn file() -> Self {
        Self::file_with_config(StoreConfig::default())
    }

    /// Creates a new file-based test store with a custom configuration.
    pub fn file_with_config(config: StoreConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = TapeStore::open_with_config(temp_dir.path(), config.clone())
            .expect("Failed to open file store");
        Self {
            store,
            config,
            backing: Backing::File(temp_dir),
        }
    }

    /// Returns the store directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::File(dir) => Some(dir.path()),
            Backing::Memory(_) => None,
        }
    }

    /// Returns the in-memory backend, None if file-based.
    pub fn memory_backend(&self) -> Option<&Arc<InMemoryBackend>> {
        match &self.backing {
            Backing::Memory(backend) => Some(backend),
            Backing::File(_) => None,
        }
    }

    /// Drops the store and opens a new one on the same storage.
    pub fn reopen(self) -> Self {
        let Self {
            store,
            config,
            backing,
        } = self;
        // Must drop to release the LOCK file before reopening
        drop(store);

        let store = match &backing {
            Backing::Memory(backend) => {
                TapeStore::open_with_backend(Arc::clone(backend), config.clone())
            }
            Backing::File(dir) => TapeStore::open_with_config(dir.path(), config.clone()),
        }
        .expect("Failed to reopen store");

        Self {
            store,
            config,
            backing,
        }
    }
}

impl std::ops::Deref for TestStore {
    type Target = TapeStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary in-memory store.
///
/// # Example
///
/// ```rust
/// use tapestore_core::ExpectedVersion;
/// use tapestore_testkit::with_memory_store;
///
/// with_memory_store(|store| {
///     store.append("a", b"1".to_vec(), ExpectedVersion::Any).unwrap();
///     assert_eq!(store.current_version(), 1);
/// });
/// ```
pub fn with_memory_store<F, R>(f: F) -> R
where
    F: FnOnce(&TapeStore) -> R,
{
    let test_store = TestStore::memory();
    f(&test_store.store)
}

/// Runs a test with a temporary file-based store.
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&TapeStore, &Path) -> R,
{
    let test_store = TestStore::file();
    let path = test_store.path().expect("File store should have a path");
    f(&test_store.store, path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use tapestore_core::ExpectedVersion;

    /// Stream key used by [`populated_store`] for stream `i`.
    pub fn stream_key(i: usize) -> String {
        format!("stream-{i}")
    }

    /// Payload used by [`populated_store`] for frame `n` of a stream.
    pub fn payload(stream: usize, n: usize) -> Vec<u8> {
        format!("{stream}:{n}").into_bytes()
    }

    /// Creates a store with `frames_per_stream` frames in each of
    /// `stream_count` streams, interleaved round-robin.
    pub fn populated_store(stream_count: usize, frames_per_stream: usize) -> TestStore {
        let test_store = TestStore::memory();
        for n in 0..frames_per_stream {
            for s in 0..stream_count {
                test_store
                    .append(&stream_key(s), payload(s, n), ExpectedVersion::Any)
                    .expect("Failed to append");
            }
        }
        test_store
    }
}
