//! Store configuration.

use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::sync::Arc;
use tapestore_storage::{CleanupPolicy, RetryConfig};

/// Predicate deciding whether a stream's frames are kept in memory.
///
/// Rejected streams still consume stream and store versions.
pub type StreamFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Configuration for opening a tape store.
#[derive(Clone)]
pub struct StoreConfig {
    /// Whether to create the store directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Alignment unit of backend writes.
    pub page_size: usize,

    /// Maximum number of bytes written to one segment before rolling over.
    pub segment_capacity: u64,

    /// Number of segments scanned concurrently on open.
    pub load_parallelism: usize,

    /// Retry behaviour for transient backend failures.
    pub retry: RetryConfig,

    /// Overrides the backend's policy for unreadable segments.
    pub cleanup_policy: Option<CleanupPolicy>,

    /// Streams to keep in memory. `None` keeps all of them.
    pub retain_stream: Option<StreamFilter>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            page_size: Self::DEFAULT_PAGE_SIZE,
            segment_capacity: 256 * 1024 * 1024, // 256 MB
            load_parallelism: 4,
            retry: RetryConfig::default(),
            cleanup_policy: None,
            retain_stream: None,
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("create_if_missing", &self.create_if_missing)
            .field("page_size", &self.page_size)
            .field("segment_capacity", &self.segment_capacity)
            .field("load_parallelism", &self.load_parallelism)
            .field("retry", &self.retry)
            .field("cleanup_policy", &self.cleanup_policy)
            .field("retain_stream", &self.retain_stream.is_some())
            .finish()
    }
}

impl StoreConfig {
    /// Page size used unless configured otherwise.
    pub const DEFAULT_PAGE_SIZE: usize = 512;

    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings suited to page-blob backends: 512 KB segments.
    #[must_use]
    pub fn page_blob() -> Self {
        Self::default().segment_capacity(512 * 1024)
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the page size.
    #[must_use]
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the maximum segment size.
    #[must_use]
    pub fn segment_capacity(mut self, bytes: u64) -> Self {
        self.segment_capacity = bytes;
        self
    }

    /// Sets how many segments are scanned concurrently on open.
    #[must_use]
    pub fn load_parallelism(mut self, workers: usize) -> Self {
        self.load_parallelism = workers;
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Overrides the backend cleanup policy.
    #[must_use]
    pub fn cleanup_policy(mut self, policy: CleanupPolicy) -> Self {
        self.cleanup_policy = Some(policy);
        self
    }

    /// Keeps only frames of streams accepted by `filter` in memory.
    #[must_use]
    pub fn retain_stream<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.retain_stream = Some(Arc::new(filter));
        self
    }

    /// Checks that the values are usable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero page size, a segment capacity
    /// smaller than one page, or zero load parallelism.
    pub fn validate(&self) -> CoreResult<()> {
        if self.page_size == 0 {
            return Err(CoreError::invalid_argument("page size must be positive"));
        }
        if self.segment_capacity < self.page_size as u64 {
            return Err(CoreError::invalid_argument(format!(
                "segment capacity {} is smaller than page size {}",
                self.segment_capacity, self.page_size
            )));
        }
        if self.load_parallelism == 0 {
            return Err(CoreError::invalid_argument(
                "load parallelism must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = StoreConfig::default();
        assert!(config.create_if_missing);
        assert_eq!(config.page_size, 512);
        assert_eq!(config.segment_capacity, 256 * 1024 * 1024);
        assert_eq!(config.load_parallelism, 4);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.cleanup_policy.is_none());
        assert!(config.retain_stream.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = StoreConfig::new()
            .create_if_missing(false)
            .page_size(4096)
            .segment_capacity(1 << 20)
            .load_parallelism(2)
            .cleanup_policy(CleanupPolicy::Skip)
            .retain_stream(|key| key.starts_with("keep"));

        assert!(!config.create_if_missing);
        assert_eq!(config.page_size, 4096);
        assert_eq!(config.segment_capacity, 1 << 20);
        assert_eq!(config.load_parallelism, 2);
        assert_eq!(config.cleanup_policy, Some(CleanupPolicy::Skip));

        let filter = config.retain_stream.as_ref().unwrap();
        assert!(filter("keep-1"));
        assert!(!filter("drop-1"));
    }

    #[test]
    fn page_blob_preset() {
        assert_eq!(StoreConfig::page_blob().segment_capacity, 512 * 1024);
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(StoreConfig::new().page_size(0).validate().is_err());
        assert!(StoreConfig::new()
            .page_size(512)
            .segment_capacity(100)
            .validate()
            .is_err());
        assert!(StoreConfig::new().load_parallelism(0).validate().is_err());
    }

    #[test]
    fn debug_hides_filter() {
        let config = StoreConfig::new().retain_stream(|_| true);
        let text = format!("{config:?}");
        assert!(text.contains("retain_stream: true"));
    }
}
