//! Model-checked store harness.
//!
//! [`IntegrationHarness`] drives a [`TapeStore`] and a plain reference model
//! side by side, asserting after every step that both agree.

use crate::fixtures::TestStore;
use crate::generators::AppendOp;
use std::collections::BTreeMap;
use tapestore_core::{AppendOutcome, ExpectedVersion, TapeStore};

/// Expected contents of a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreModel {
    streams: BTreeMap<String, Vec<Vec<u8>>>,
    log: Vec<(String, u64)>,
}

impl StoreModel {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames in a stream.
    pub fn stream_version(&self, key: &str) -> u64 {
        self.streams.get(key).map_or(0, |frames| frames.len() as u64)
    }

    /// Number of frames in the log.
    pub fn store_version(&self) -> u64 {
        self.log.len() as u64
    }

    /// Applies an append; returns whether it commits.
    pub fn apply(&mut self, key: &str, payload: &[u8], expected: ExpectedVersion) -> bool {
        if !expected.matches(self.stream_version(key)) {
            return false;
        }
        let frames = self.streams.entry(key.to_string()).or_default();
        frames.push(payload.to_vec());
        self.log.push((key.to_string(), frames.len() as u64));
        true
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.streams.clear();
        self.log.clear();
    }

    /// Stream keys in the model.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.streams.keys().map(String::as_str)
    }

    /// Asserts that `store` holds exactly what the model expects.
    ///
    /// # Panics
    ///
    /// Panics on the first disagreement.
    pub fn assert_matches(&self, store: &TapeStore) {
        assert_eq!(store.current_version(), self.store_version(), "store version");

        let all = store.read_all(0, usize::MAX);
        assert_eq!(all.len(), self.log.len(), "read_all length");
        for (i, (frame, (key, stream_version))) in all.iter().zip(&self.log).enumerate() {
            assert_eq!(frame.store_version, i as u64 + 1, "store version of frame {i}");
            assert_eq!(&*frame.stream_key, key.as_str(), "stream of frame {i}");
            assert_eq!(frame.stream_version, *stream_version, "stream version of frame {i}");
        }

        for (key, payloads) in &self.streams {
            let frames = store.read_stream(key, 0, usize::MAX);
            let actual: Vec<&[u8]> = frames.iter().map(|f| &f.payload[..]).collect();
            let expected: Vec<&[u8]> = payloads.iter().map(Vec::as_slice).collect();
            assert_eq!(actual, expected, "payloads of {key}");
            assert_eq!(store.stream_version(key), payloads.len() as u64);
        }
    }
}

/// A test harness pairing a store with its model.
pub struct IntegrationHarness {
    /// The store under test.
    pub store: TestStore,
    /// What the store should contain.
    pub model: StoreModel,
}

impl IntegrationHarness {
    /// Creates a new harness with an in-memory store.
    pub fn new() -> Self {
        Self::with_store(TestStore::memory())
    }

    /// Creates a harness around an existing (empty) test store.
    pub fn with_store(store: TestStore) -> Self {
        Self {
            store,
            model: StoreModel::new(),
        }
    }

    /// Appends to both and asserts that they agree on the outcome.
    pub fn append(&mut self, key: &str, payload: &[u8], expected: ExpectedVersion) -> bool {
        let before = self.model.stream_version(key);
        let model_commits = self.model.apply(key, payload, expected);

        let outcome = self
            .store
            .append(key, payload.to_vec(), expected)
            .expect("Failed to append");
        match outcome {
            AppendOutcome::Committed(receipt) => {
                assert!(model_commits, "store committed, model expected a conflict");
                assert_eq!(receipt.stream_version, before + 1);
                assert_eq!(receipt.store_version, self.model.store_version());
            }
            AppendOutcome::Conflict(conflict) => {
                assert!(!model_commits, "store reported a conflict, model expected a commit");
                assert_eq!(conflict.actual, before);
            }
        }
        model_commits
    }

    /// Applies a generated operation.
    pub fn apply(&mut self, op: &AppendOp) -> bool {
        self.append(&op.key, &op.payload, op.expected_version())
    }

    /// Resets both.
    pub fn reset(&mut self) {
        self.store.reset_store().expect("Failed to reset store");
        self.model.clear();
    }

    /// Reopens the store on the same storage.
    pub fn reopen(self) -> Self {
        Self {
            store: self.store.reopen(),
            model: self.model,
        }
    }

    /// Asserts that store and model agree.
    pub fn verify(&self) {
        self.model.assert_matches(&self.store);
    }
}

impl Default for IntegrationHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harness_tracks_conflicts() {
        let mut harness = IntegrationHarness::new();
        assert!(harness.append("a", b"1", ExpectedVersion::Exact(0)));
        assert!(!harness.append("a", b"2", ExpectedVersion::Exact(0)));
        assert!(harness.append("b", b"3", ExpectedVersion::Any));
        harness.verify();
    }

    #[test]
    fn test_harness_survives_reopen() {
        let mut harness = IntegrationHarness::with_store(TestStore::file());
        harness.append("a", b"1", ExpectedVersion::Any);
        harness.append("b", b"2", ExpectedVersion::Any);

        let harness = harness.reopen();
        harness.verify();
    }

    #[test]
    fn test_model_versions() {
        let mut model = StoreModel::new();
        assert!(model.apply("a", b"x", ExpectedVersion::Any));
        assert!(!model.apply("a", b"y", ExpectedVersion::Exact(5)));
        assert_eq!(model.stream_version("a"), 1);
        assert_eq!(model.store_version(), 1);
        assert_eq!(model.keys().collect::<Vec<_>>(), vec!["a"]);
    }
}
