//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use proptest::prelude::*;
use tapestore_core::ExpectedVersion;

/// Strategy for generating valid stream keys.
pub fn stream_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,8}(/[0-9]{1,4})?").expect("Invalid regex")
}

/// Strategy for keys drawn from a small set, so streams receive many frames.
pub fn few_keys_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "b", "c", "orders/1", "orders/2"]).prop_map(str::to_string)
}

/// Strategy for keys with arbitrary Unicode content.
pub fn unicode_key_strategy() -> impl Strategy<Value = String> {
    "\\PC{1,16}"
}

/// Strategy for generating payloads (arbitrary bytes, possibly empty).
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

/// Strategy for generating valid stream versions.
pub fn stream_version_strategy() -> impl Strategy<Value = u64> {
    prop_oneof![1u64..1000, 1u64..=u64::MAX]
}

/// One append in a generated workload.
#[derive(Debug, Clone)]
pub struct AppendOp {
    /// Stream to append to.
    pub key: String,
    /// Frame payload.
    pub payload: Vec<u8>,
    /// Version check; `None` appends unconditionally.
    pub expected: Option<u64>,
}

impl AppendOp {
    /// The version check as passed to the store.
    pub fn expected_version(&self) -> ExpectedVersion {
        self.expected.map_or(ExpectedVersion::Any, ExpectedVersion::Exact)
    }
}

/// Strategy for one append, sometimes with a version check near zero.
pub fn append_op_strategy() -> impl Strategy<Value = AppendOp> {
    (
        few_keys_strategy(),
        prop::collection::vec(any::<u8>(), 0..64),
        prop::option::weighted(0.3, 0u64..6),
    )
        .prop_map(|(key, payload, expected)| AppendOp {
            key,
            payload,
            expected,
        })
}

/// Strategy for a workload of appends.
pub fn append_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<AppendOp>> {
    prop::collection::vec(append_op_strategy(), 0..max_len)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapestore_core::validate_frame;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn stream_keys_are_valid(key in stream_key_strategy()) {
            prop_assert!(validate_frame(&key, 0).is_ok());
        }

        #[test]
        fn unicode_keys_are_valid(key in unicode_key_strategy()) {
            prop_assert!(validate_frame(&key, 0).is_ok());
        }

        #[test]
        fn ops_use_known_keys(op in append_op_strategy()) {
            prop_assert!(!op.key.is_empty());
            prop_assert!(op.expected.map_or(true, |v| v < 6));
        }
    }
}
