//! Benchmark utilities.

#![warn(missing_docs)]

use rand::Rng;
use std::sync::Arc;
use tapestore_core::{ExpectedVersion, StoreConfig, TapeStore};
use tapestore_storage::InMemoryBackend;

/// Generate random payload bytes of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` stream keys.
pub fn stream_keys(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("stream-{i}")).collect()
}

/// Fills an in-memory backend with `frames` frames spread over `streams`
/// streams and returns it closed.
pub fn filled_backend(
    config: &StoreConfig,
    frames: usize,
    streams: usize,
    payload_size: usize,
) -> Arc<InMemoryBackend> {
    let backend = Arc::new(InMemoryBackend::new());
    let store = TapeStore::open_with_backend(Arc::clone(&backend), config.clone())
        .expect("open bench store");
    let keys = stream_keys(streams.max(1));
    let payload = random_data(payload_size);

    for i in 0..frames {
        store
            .append(&keys[i % keys.len()], payload.clone(), ExpectedVersion::Any)
            .expect("append bench frame");
    }
    drop(store);
    backend
}

/// Opens an in-memory store preloaded with `frames` frames.
pub fn filled_store(frames: usize, streams: usize, payload_size: usize) -> TapeStore {
    let config = StoreConfig::default();
    let backend = filled_backend(&config, frames, streams, payload_size);
    TapeStore::open_with_backend(backend, config).expect("reopen bench store")
}
