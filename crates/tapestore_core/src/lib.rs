//! # TapeStore Core
//!
//! Append-only multi-stream tape store engine.
//!
//! This crate provides:
//! - Frame codec with integrity digests
//! - Page-aligned segment writing for page-blob backends
//! - An in-memory stream index with optimistic version checks
//! - Crash recovery with torn-write repair
//! - The [`TapeStore`] facade tying them together
//!
//! ## Example
//!
//! ```rust
//! use tapestore_core::{ExpectedVersion, TapeStore};
//!
//! let store = TapeStore::open_in_memory().unwrap();
//! store.append("orders/1", b"created".to_vec(), ExpectedVersion::Any).unwrap();
//! store.append("orders/1", b"paid".to_vec(), ExpectedVersion::Exact(1)).unwrap();
//!
//! let conflict = store
//!     .append("orders/1", b"paid".to_vec(), ExpectedVersion::Exact(1))
//!     .unwrap();
//! assert!(!conflict.is_committed());
//! assert_eq!(store.read_stream("orders/1", 0, 10).len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod frame;
mod index;
mod paged;
mod recovery;
mod segment;
mod store;
mod types;

pub use config::{StoreConfig, StreamFilter};
pub use error::{CoreError, CoreResult};
pub use frame::{
    encode_frame, encoded_len, scan_reader, scan_segment, validate_frame, DecodedFrame, FrameReader,
    SegmentScan, FRAME_OVERHEAD, HASH_LEN, MAX_KEY_LEN, MAX_PAYLOAD_LEN,
};
pub use index::{Reservation, StreamIndex};
pub use paged::{PageSink, PagedWriter, SegmentSink};
pub use recovery::{
    classify, recover, scan_segments, RecoveryOptions, RecoveryReport, RepairedSegment,
    SegmentHealth,
};
pub use segment::{segment_name, sort_segments, version_prefix};
pub use store::TapeStore;
pub use types::{
    AppendOutcome, AppendReceipt, CancelFlag, ExpectedVersion, Frame, ReservedVersions,
    StoreStats, VersionConflict,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
