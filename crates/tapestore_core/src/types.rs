//! Core type definitions for TapeStore.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// A committed record.
///
/// Frames are immutable once committed. Cloning is cheap: the key and the
/// payload are reference-counted and shared with the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The stream this frame belongs to.
    pub stream_key: Arc<str>,
    /// Opaque payload bytes.
    pub payload: Bytes,
    /// 1-based position within the stream.
    pub stream_version: u64,
    /// 1-based position within the whole store.
    pub store_version: u64,
}

/// Versions a pending append will receive if it commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReservedVersions {
    /// New version of the stream.
    pub stream_version: u64,
    /// New version of the store.
    pub store_version: u64,
}

/// The stream version an append expects to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExpectedVersion {
    /// Append regardless of the current stream version.
    #[default]
    Any,
    /// Append only if the stream currently holds exactly this many frames.
    Exact(u64),
}

impl ExpectedVersion {
    /// Converts a signed version where any negative value means "any".
    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        if raw < 0 {
            Self::Any
        } else {
            Self::Exact(raw as u64)
        }
    }

    /// Returns true if a stream at `current` satisfies this expectation.
    #[must_use]
    pub const fn matches(self, current: u64) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected == current,
        }
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Exact(v) => write!(f, "{v}"),
        }
    }
}

/// An optimistic concurrency check failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected version {expected} for stream '{stream}', but it is at {actual}")]
pub struct VersionConflict {
    /// The stream that was appended to.
    pub stream: String,
    /// The version the caller expected.
    pub expected: u64,
    /// The version the stream is actually at.
    pub actual: u64,
}

/// Details of a committed append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendReceipt {
    /// Version assigned within the stream.
    pub stream_version: u64,
    /// Version assigned within the store.
    pub store_version: u64,
    /// Segment the frame was written to.
    pub segment: String,
}

/// Result of an append that did not fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The frame is durable and visible.
    Committed(AppendReceipt),
    /// The expected version did not match; nothing changed.
    Conflict(VersionConflict),
}

impl AppendOutcome {
    /// Returns true if the append committed.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }

    /// Returns the receipt of a committed append.
    #[must_use]
    pub fn receipt(&self) -> Option<&AppendReceipt> {
        match self {
            Self::Committed(receipt) => Some(receipt),
            Self::Conflict(_) => None,
        }
    }

    /// Returns the conflict of a rejected append.
    #[must_use]
    pub fn conflict(&self) -> Option<&VersionConflict> {
        match self {
            Self::Committed(_) => None,
            Self::Conflict(conflict) => Some(conflict),
        }
    }

    /// Converts a conflict into an error, for callers that treat it as one.
    ///
    /// # Errors
    ///
    /// Returns the conflict if the append did not commit.
    pub fn into_result(self) -> Result<AppendReceipt, VersionConflict> {
        match self {
            Self::Committed(receipt) => Ok(receipt),
            Self::Conflict(conflict) => Err(conflict),
        }
    }
}

/// Cooperative cancellation for long-running loads.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates a flag that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A snapshot of store state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of live segments in the backend.
    pub segment_count: usize,
    /// Number of known streams.
    pub stream_count: usize,
    /// Current store version.
    pub store_version: u64,
    /// Segment currently open for appends.
    pub open_segment: Option<String>,
    /// Bytes of the open segment known to be on the backend.
    pub persisted_position: u64,
    /// Whether the store refuses appends until reopened.
    pub faulted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_version_from_raw() {
        assert_eq!(ExpectedVersion::from_raw(-1), ExpectedVersion::Any);
        assert_eq!(ExpectedVersion::from_raw(-42), ExpectedVersion::Any);
        assert_eq!(ExpectedVersion::from_raw(0), ExpectedVersion::Exact(0));
        assert_eq!(ExpectedVersion::from_raw(7), ExpectedVersion::Exact(7));
    }

    #[test]
    fn expected_version_matches() {
        assert!(ExpectedVersion::Any.matches(0));
        assert!(ExpectedVersion::Any.matches(99));
        assert!(ExpectedVersion::Exact(3).matches(3));
        assert!(!ExpectedVersion::Exact(3).matches(2));
    }

    #[test]
    fn outcome_accessors() {
        let committed = AppendOutcome::Committed(AppendReceipt {
            stream_version: 1,
            store_version: 1,
            segment: "s.dat".into(),
        });
        assert!(committed.is_committed());
        assert!(committed.conflict().is_none());
        assert_eq!(committed.receipt().map(|r| r.store_version), Some(1));

        let conflict = AppendOutcome::Conflict(VersionConflict {
            stream: "A".into(),
            expected: 100,
            actual: 0,
        });
        assert!(!conflict.is_committed());
        let err = conflict.into_result().unwrap_err();
        assert!(err.to_string().contains("expected version 100"));
    }

    #[test]
    fn cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }
}
