//! # TapeStore Testkit
//!
//! Test utilities for TapeStore.
//!
//! This crate provides:
//! - Test fixtures and store helpers
//! - A crash-injecting backend wrapper
//! - Property-based test generators using proptest
//! - A reference model for checking store behaviour
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tapestore_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_store() {
//!     with_memory_store(|store| {
//!         store.append("orders/1", b"created".to_vec(), ExpectedVersion::Any).unwrap();
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
    pub use tapestore_core::{ExpectedVersion, StoreConfig, TapeStore};
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
