//! Tape store facade and segment lifecycle.

use crate::config::StoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::frame::{encode_frame, encoded_len, validate_frame};
use crate::index::StreamIndex;
use crate::paged::{PagedWriter, SegmentSink};
use crate::recovery::{recover, RecoveryOptions, RecoveryReport};
use crate::segment::segment_name;
use crate::types::{
    AppendOutcome, AppendReceipt, CancelFlag, ExpectedVersion, Frame, ReservedVersions,
    StoreStats,
};
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tapestore_storage::{FileBackend, InMemoryBackend, RetryPolicy, SegmentBackend};

/// The segment currently receiving appends.
struct OpenSegment {
    id: String,
    writer: PagedWriter<SegmentSink>,
}

/// An append-only store of many independently versioned streams.
///
/// `TapeStore` multiplexes named streams into one physically ordered log.
/// Every frame gets a dense per-stream version and a dense store-wide
/// version. The log is split into segments on a [`SegmentBackend`]; a
/// segment is created when none is open or when the next frame does not
/// fit.
///
/// # Opening a Store
///
/// ```rust,no_run
/// use tapestore_core::{ExpectedVersion, TapeStore};
/// use std::path::Path;
///
/// let store = TapeStore::open(Path::new("my_tape")).unwrap();
/// store.append("orders/42", b"created".to_vec(), ExpectedVersion::Any).unwrap();
///
/// for frame in store.read_stream("orders/42", 0, 100) {
///     println!("{} v{}", frame.stream_key, frame.stream_version);
/// }
/// ```
///
/// # Concurrency
///
/// Appends serialize on the index writer lock and perform their I/O while
/// holding it. Readers do not wait for that I/O and never observe a frame
/// before it is durable.
///
/// # Faults
///
/// Any failure while persisting an append drops the open segment and marks
/// the store faulted. Later appends fail with [`CoreError::StoreFaulted`]
/// until [`TapeStore::reopen`] or [`TapeStore::reset_store`] succeeds.
/// Version conflicts are not faults.
pub struct TapeStore {
    config: StoreConfig,
    backend: Arc<dyn SegmentBackend>,
    index: StreamIndex,
    retry: RetryPolicy,
    writer: Mutex<Option<OpenSegment>>,
    faulted: Mutex<Option<String>>,
    last_recovery: Mutex<RecoveryReport>,
}

impl TapeStore {
    /// Opens a store in a directory with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be opened or locked, or if
    /// recovery fails.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens a store in a directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the directory
    /// cannot be opened or locked, or recovery fails.
    pub fn open_with_config(path: &Path, config: StoreConfig) -> CoreResult<Self> {
        config.validate()?;
        let backend = FileBackend::open(path, config.create_if_missing)?;
        Self::open_with_backend(backend, config)
    }

    /// Opens a fresh in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches the other constructors.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backend(InMemoryBackend::new(), StoreConfig::default())
    }

    /// Opens a store on an arbitrary backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or recovery fails.
    pub fn open_with_backend<B>(backend: B, config: StoreConfig) -> CoreResult<Self>
    where
        B: SegmentBackend + 'static,
    {
        Self::open_cancellable(backend, config, &CancelFlag::new())
    }

    /// Opens a store, checking `cancel` while segments are scanned.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if the flag is raised before loading completes,
    /// otherwise as [`TapeStore::open_with_backend`].
    pub fn open_cancellable<B>(
        backend: B,
        config: StoreConfig,
        cancel: &CancelFlag,
    ) -> CoreResult<Self>
    where
        B: SegmentBackend + 'static,
    {
        config.validate()?;
        let backend: Arc<dyn SegmentBackend> = Arc::new(backend);
        let retry = config.retry.policy();

        let store = Self {
            index: StreamIndex::with_filter(config.retain_stream.clone()),
            config,
            backend,
            retry,
            writer: Mutex::new(None),
            faulted: Mutex::new(None),
            last_recovery: Mutex::new(RecoveryReport::default()),
        };

        let (frames, report) = recover(&*store.backend, &store.recovery_options(cancel))?;
        store.index.load_history(frames)?;
        *store.last_recovery.lock() = report;

        tracing::info!(
            store_version = store.index.store_version(),
            streams = store.index.stream_count(),
            "tape store opened"
        );
        Ok(store)
    }

    fn recovery_options<'a>(&'a self, cancel: &'a CancelFlag) -> RecoveryOptions<'a> {
        RecoveryOptions {
            page_size: self.config.page_size,
            parallelism: self.config.load_parallelism,
            cleanup_policy: self
                .config
                .cleanup_policy
                .unwrap_or_else(|| self.backend.cleanup_policy()),
            retry: &self.retry,
            cancel,
        }
    }

    fn check_faulted(&self) -> CoreResult<()> {
        match self.faulted.lock().as_ref() {
            Some(reason) => Err(CoreError::store_faulted(reason.clone())),
            None => Ok(()),
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Appends a frame to a stream.
    ///
    /// With [`ExpectedVersion::Exact`] the append only happens if the stream
    /// currently holds exactly that many frames; otherwise the outcome is
    /// [`AppendOutcome::Conflict`] and nothing changes.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an empty or oversized key, or a frame larger
    ///   than the segment capacity; nothing changes
    /// - `StoreFaulted` if an earlier append faulted the store
    /// - the backend error if persisting fails; the store is then faulted
    pub fn append(
        &self,
        stream_key: &str,
        payload: impl Into<Bytes>,
        expected: ExpectedVersion,
    ) -> CoreResult<AppendOutcome> {
        let payload = payload.into();
        validate_frame(stream_key, payload.len())?;

        let frame_len = encoded_len(stream_key.len(), payload.len()) as u64;
        if frame_len > self.config.segment_capacity {
            return Err(CoreError::invalid_argument(format!(
                "frame of {frame_len} bytes exceeds segment capacity of {} bytes",
                self.config.segment_capacity
            )));
        }

        self.check_faulted()?;

        let reservation = match self.index.reserve(stream_key, expected)? {
            Ok(reservation) => reservation,
            Err(conflict) => {
                tracing::debug!(
                    stream = stream_key,
                    expected = conflict.expected,
                    actual = conflict.actual,
                    "append rejected by version check"
                );
                return Ok(AppendOutcome::Conflict(conflict));
            }
        };

        // Another append may have faulted the store while this one waited
        self.check_faulted()?;

        let versions = reservation.versions();
        let segment = match self.persist(stream_key, &payload, versions) {
            Ok(segment) => segment,
            Err(e) => {
                drop(reservation);
                self.fault(&e);
                return Err(e);
            }
        };

        let frame = reservation.commit(payload);
        tracing::debug!(
            stream = %frame.stream_key,
            stream_version = frame.stream_version,
            store_version = frame.store_version,
            segment = %segment,
            "appended frame"
        );

        Ok(AppendOutcome::Committed(AppendReceipt {
            stream_version: frame.stream_version,
            store_version: frame.store_version,
            segment,
        }))
    }

    /// Writes one encoded frame to the open segment, rolling over if needed.
    ///
    /// Runs while the index writer lock is held. On error the open segment is
    /// gone.
    fn persist(
        &self,
        stream_key: &str,
        payload: &[u8],
        versions: ReservedVersions,
    ) -> CoreResult<String> {
        let encoded = encode_frame(stream_key, payload, versions.stream_version)?;
        let current_version = versions.store_version - 1;

        let mut slot = self.writer.lock();
        let mut open = match slot.take() {
            Some(open) if open.writer.fits(encoded.len()) => open,
            Some(mut full) => {
                full.writer.close()?;
                tracing::info!(
                    segment = %full.id,
                    bytes = full.writer.persisted_position(),
                    "segment full, rolling over"
                );
                self.open_segment(current_version)?
            }
            None => self.open_segment(current_version)?,
        };

        open.writer.write(&encoded)?;
        open.writer.flush()?;

        let id = open.id.clone();
        *slot = Some(open);
        Ok(id)
    }

    fn open_segment(&self, store_version: u64) -> CoreResult<OpenSegment> {
        let id = segment_name(store_version, Utc::now());
        let capacity = self.config.segment_capacity;
        let writer = self.retry.run("create_segment", || {
            self.backend.create_or_open_for_append(&id, capacity)
        })?;

        tracing::info!(segment = %id, store_version, capacity, "created segment");
        Ok(OpenSegment {
            writer: PagedWriter::new(
                self.config.page_size,
                capacity,
                SegmentSink::new(writer),
                self.retry.clone(),
            ),
            id,
        })
    }

    fn fault(&self, error: &CoreError) {
        tracing::warn!(error = %error, "append failed, store faulted until reopened");
        *self.faulted.lock() = Some(error.to_string());
    }

    /// Closes the open segment, logging instead of failing.
    fn release_writer(&self) {
        if let Some(mut open) = self.writer.lock().take() {
            if let Err(e) = open.writer.close() {
                tracing::warn!(segment = %open.id, error = %e, "failed to close segment");
            }
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Frames of one stream with `stream_version > after`, at most
    /// `max_count`, ascending.
    #[must_use]
    pub fn read_stream(&self, stream_key: &str, after: u64, max_count: usize) -> Vec<Frame> {
        self.index.read_stream(stream_key, after, max_count)
    }

    /// Frames of all streams with `store_version > after`, at most
    /// `max_count`, ascending.
    #[must_use]
    pub fn read_all(&self, after: u64, max_count: usize) -> Vec<Frame> {
        self.index.read_all(after, max_count)
    }

    /// Number of frames ever committed.
    #[must_use]
    pub fn current_version(&self) -> u64 {
        self.index.store_version()
    }

    /// Number of frames ever committed to one stream.
    #[must_use]
    pub fn stream_version(&self, stream_key: &str) -> u64 {
        self.index.stream_version(stream_key)
    }

    /// Every known stream with its current version, sorted by key.
    #[must_use]
    pub fn streams(&self) -> Vec<(String, u64)> {
        self.index.streams()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Flushes and releases the open segment. Closing twice is a no-op; a
    /// later append opens a new segment.
    ///
    /// # Errors
    ///
    /// Returns the flush error. The segment is released regardless.
    pub fn close(&self) -> CoreResult<()> {
        if let Some(mut open) = self.writer.lock().take() {
            open.writer.close()?;
            tracing::debug!(segment = %open.id, "closed segment");
        }
        Ok(())
    }

    /// Deletes every segment and resets to version 0.
    ///
    /// The in-memory state is only reset if the deletion succeeds. Clears a
    /// fault.
    ///
    /// # Errors
    ///
    /// Returns the backend error; the store is unchanged apart from the
    /// released segment writer.
    pub fn reset_store(&self) -> CoreResult<()> {
        self.index.clear(|| -> CoreResult<()> {
            self.release_writer();
            self.retry.run("delete_all", || self.backend.delete_all())?;
            Ok(())
        })?;
        *self.faulted.lock() = None;
        tracing::info!("tape store reset");
        Ok(())
    }

    /// Releases the open segment, reruns recovery and reloads the index.
    ///
    /// Clears a fault. Appends wait until the reload finishes.
    ///
    /// # Errors
    ///
    /// Returns the recovery error; the index and fault state are unchanged.
    pub fn reopen(&self) -> CoreResult<RecoveryReport> {
        let cancel = CancelFlag::new();
        let mut report = RecoveryReport::default();

        self.index.reload(|| -> CoreResult<_> {
            self.release_writer();
            let (frames, recovered) = recover(&*self.backend, &self.recovery_options(&cancel))?;
            report = recovered;
            Ok(frames)
        })?;

        *self.faulted.lock() = None;
        *self.last_recovery.lock() = report.clone();
        tracing::info!(
            store_version = self.index.store_version(),
            "tape store reopened"
        );
        Ok(report)
    }

    /// Returns a snapshot of store state.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot list segments.
    pub fn stats(&self) -> CoreResult<StoreStats> {
        let segment_count = self
            .retry
            .run("list_segments", || self.backend.list_segments())?
            .len();
        let stream_count = self.index.stream_count();
        let store_version = self.index.store_version();
        let faulted = self.is_faulted();

        // Index before writer, as in append
        let writer = self.writer.lock();
        Ok(StoreStats {
            segment_count,
            stream_count,
            store_version,
            open_segment: writer.as_ref().map(|open| open.id.clone()),
            persisted_position: writer
                .as_ref()
                .map_or(0, |open| open.writer.persisted_position()),
            faulted,
        })
    }

    /// What the most recent open or reopen found.
    #[must_use]
    pub fn recovery_report(&self) -> RecoveryReport {
        self.last_recovery.lock().clone()
    }

    /// Whether appends are refused until the store is reopened.
    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.faulted.lock().is_some()
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the segment backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn SegmentBackend> {
        &self.backend
    }
}

impl fmt::Debug for TapeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TapeStore")
            .field("store_version", &self.current_version())
            .field("faulted", &self.is_faulted())
            .finish_non_exhaustive()
    }
}

impl Drop for TapeStore {
    fn drop(&mut self) {
        self.release_writer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tapestore_storage::{
        CleanupPolicy, RetryConfig, SegmentInfo, SegmentWriter, StorageError, StorageResult,
    };
    use tempfile::tempdir;

    fn payloads(frames: &[Frame]) -> Vec<&[u8]> {
        frames.iter().map(|f| &f.payload[..]).collect()
    }

    /// Memory backend whose page writes can be switched to fail.
    struct SwitchBackend {
        inner: Arc<InMemoryBackend>,
        fail: Arc<AtomicBool>,
    }

    struct SwitchWriter {
        inner: Box<dyn SegmentWriter>,
        fail: Arc<AtomicBool>,
    }

    impl SegmentWriter for SwitchWriter {
        fn write_page(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StorageError::Io(std::io::Error::other("disk full")));
            }
            self.inner.write_page(offset, data)
        }

        fn sync(&mut self) -> StorageResult<()> {
            self.inner.sync()
        }
    }

    impl SegmentBackend for SwitchBackend {
        fn create_or_open_for_append(
            &self,
            id: &str,
            capacity: u64,
        ) -> StorageResult<Box<dyn SegmentWriter>> {
            Ok(Box::new(SwitchWriter {
                inner: self.inner.create_or_open_for_append(id, capacity)?,
                fail: Arc::clone(&self.fail),
            }))
        }
        fn list_segments(&self) -> StorageResult<Vec<SegmentInfo>> {
            self.inner.list_segments()
        }
        fn open_for_read(&self, id: &str) -> StorageResult<Box<dyn std::io::Read + Send>> {
            self.inner.open_for_read(id)
        }
        fn delete_segment(&self, id: &str) -> StorageResult<()> {
            self.inner.delete_segment(id)
        }
        fn delete_all(&self) -> StorageResult<()> {
            self.inner.delete_all()
        }
        fn copy_segment(&self, src: &str, dst: &str) -> StorageResult<()> {
            self.inner.copy_segment(src, dst)
        }
        fn truncate_segment(&self, id: &str, len: u64) -> StorageResult<()> {
            self.inner.truncate_segment(id, len)
        }
    }

    #[test]
    fn open_in_memory() {
        let store = TapeStore::open_in_memory().unwrap();
        assert_eq!(store.current_version(), 0);
        assert!(!store.is_faulted());
        assert!(store.read_all(0, 10).is_empty());
    }

    #[test]
    fn interleaved_appends() {
        let store = TapeStore::open_in_memory().unwrap();
        store.append("A", &b"m1"[..], ExpectedVersion::Any).unwrap();
        store.append("B", &b"m2"[..], ExpectedVersion::Any).unwrap();
        store.append("A", &b"m3"[..], ExpectedVersion::Any).unwrap();

        let a = store.read_stream("A", 0, usize::MAX);
        assert_eq!(payloads(&a), vec![&b"m1"[..], b"m3"]);
        assert_eq!((a[1].stream_version, a[1].store_version), (2, 3));

        let all = store.read_all(0, usize::MAX);
        let versions: Vec<u64> = all.iter().map(|f| f.store_version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(store.current_version(), 3);
        assert!(store.read_all(0, 0).is_empty());
    }

    #[test]
    fn conflict_leaves_store_usable() {
        let store = TapeStore::open_in_memory().unwrap();
        let outcome = store
            .append("A", &b"m1"[..], ExpectedVersion::Exact(100))
            .unwrap();

        let conflict = outcome.conflict().unwrap();
        assert_eq!((conflict.expected, conflict.actual), (100, 0));
        assert_eq!(store.current_version(), 0);
        assert!(!store.is_faulted());

        let outcome = store.append("A", &b"m1"[..], ExpectedVersion::Exact(0)).unwrap();
        assert!(outcome.is_committed());
    }

    #[test]
    fn invalid_arguments_change_nothing() {
        let store = TapeStore::open_with_backend(
            InMemoryBackend::new(),
            StoreConfig::new().segment_capacity(1024),
        )
        .unwrap();

        assert!(matches!(
            store.append("", &b"x"[..], ExpectedVersion::Any),
            Err(CoreError::InvalidArgument { .. })
        ));
        assert!(matches!(
            store.append("big", vec![0u8; 2000], ExpectedVersion::Any),
            Err(CoreError::InvalidArgument { .. })
        ));
        assert_eq!(store.current_version(), 0);
        assert!(!store.is_faulted());
    }

    #[test]
    fn persists_across_reopen_on_disk() {
        let dir = tempdir().unwrap();
        {
            let store = TapeStore::open(dir.path()).unwrap();
            store.append("A", &b"m1"[..], ExpectedVersion::Any).unwrap();
            store.append("B", &b"m2"[..], ExpectedVersion::Any).unwrap();
        }

        let store = TapeStore::open(dir.path()).unwrap();
        assert_eq!(store.current_version(), 2);
        assert_eq!(payloads(&store.read_stream("B", 0, 10)), vec![&b"m2"[..]]);

        let receipt = store
            .append("A", &b"m3"[..], ExpectedVersion::Exact(1))
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!((receipt.stream_version, receipt.store_version), (2, 3));
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _store = TapeStore::open(dir.path()).unwrap();
        assert!(matches!(
            TapeStore::open(dir.path()),
            Err(CoreError::Storage(StorageError::Locked))
        ));
    }

    #[test]
    fn segments_roll_over() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = TapeStore::open_with_backend(
            Arc::clone(&backend),
            StoreConfig::new().page_size(64).segment_capacity(256),
        )
        .unwrap();

        for i in 0..20u32 {
            store
                .append("s", i.to_le_bytes().to_vec(), ExpectedVersion::Any)
                .unwrap();
        }

        let stats = store.stats().unwrap();
        assert!(stats.segment_count > 1);
        drop(store);

        let store = TapeStore::open_with_backend(
            Arc::clone(&backend),
            StoreConfig::new().page_size(64).segment_capacity(256),
        )
        .unwrap();
        assert_eq!(store.current_version(), 20);
        let frames = store.read_stream("s", 0, usize::MAX);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(&frame.payload[..], &(i as u32).to_le_bytes());
        }
    }

    #[test]
    fn close_is_idempotent_and_append_reopens_segment() {
        let store = TapeStore::open_in_memory().unwrap();
        store.append("A", &b"1"[..], ExpectedVersion::Any).unwrap();
        assert!(store.stats().unwrap().open_segment.is_some());

        store.close().unwrap();
        store.close().unwrap();
        assert!(store.stats().unwrap().open_segment.is_none());

        store.append("A", &b"2"[..], ExpectedVersion::Any).unwrap();
        assert_eq!(store.current_version(), 2);
        assert!(store.stats().unwrap().open_segment.is_some());
    }

    #[test]
    fn reset_store_starts_over() {
        let store = TapeStore::open_in_memory().unwrap();
        for i in 0..10u8 {
            store.append("A", vec![i], ExpectedVersion::Any).unwrap();
        }

        store.reset_store().unwrap();
        assert_eq!(store.current_version(), 0);
        assert!(store.read_stream("A", 0, 100).is_empty());
        assert!(store.read_all(0, 100).is_empty());
        assert_eq!(store.stats().unwrap().segment_count, 0);

        let receipt = store
            .append("A", &b"again"[..], ExpectedVersion::Any)
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(receipt.store_version, 1);
    }

    #[test]
    fn fault_blocks_appends_until_reopen() {
        let inner = Arc::new(InMemoryBackend::new());
        let fail = Arc::new(AtomicBool::new(false));
        let backend = SwitchBackend {
            inner: Arc::clone(&inner),
            fail: Arc::clone(&fail),
        };
        let store = TapeStore::open_with_backend(
            backend,
            StoreConfig::new().retry(RetryConfig::no_retry()),
        )
        .unwrap();

        store.append("A", &b"ok"[..], ExpectedVersion::Any).unwrap();

        fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            store.append("A", &b"lost"[..], ExpectedVersion::Any),
            Err(CoreError::Storage(_))
        ));
        assert!(store.is_faulted());
        assert_eq!(store.current_version(), 1);

        fail.store(false, Ordering::SeqCst);
        assert!(matches!(
            store.append("A", &b"refused"[..], ExpectedVersion::Any),
            Err(CoreError::StoreFaulted { .. })
        ));

        store.reopen().unwrap();
        assert!(!store.is_faulted());
        assert_eq!(store.current_version(), 1);

        store.append("A", &b"after"[..], ExpectedVersion::Any).unwrap();
        assert_eq!(
            payloads(&store.read_stream("A", 0, 10)),
            vec![&b"ok"[..], b"after"]
        );
    }

    #[test]
    fn reset_clears_fault() {
        let fail = Arc::new(AtomicBool::new(true));
        let backend = SwitchBackend {
            inner: Arc::new(InMemoryBackend::new()),
            fail: Arc::clone(&fail),
        };
        let store = TapeStore::open_with_backend(
            backend,
            StoreConfig::new().retry(RetryConfig::no_retry()),
        )
        .unwrap();

        assert!(store.append("A", &b"x"[..], ExpectedVersion::Any).is_err());
        assert!(store.is_faulted());

        fail.store(false, Ordering::SeqCst);
        store.reset_store().unwrap();
        assert!(!store.is_faulted());
        assert!(store.append("A", &b"x"[..], ExpectedVersion::Any).is_ok());
    }

    #[test]
    fn paged_backend_round_trip() {
        let backend = Arc::new(InMemoryBackend::paged(512));
        let config = StoreConfig::page_blob();
        {
            let store = TapeStore::open_with_backend(Arc::clone(&backend), config.clone()).unwrap();
            for i in 0..50u32 {
                store
                    .append(&format!("s{}", i % 3), vec![i as u8; 100], ExpectedVersion::Any)
                    .unwrap();
            }
        }

        let store = TapeStore::open_with_backend(Arc::clone(&backend), config).unwrap();
        assert_eq!(store.current_version(), 50);
        assert!(!store.recovery_report().had_problems());
        assert_eq!(store.stream_version("s0"), 17);
    }

    #[test]
    fn cleanup_policy_override() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert_segment("00000000-junk.dat", vec![0xAB; 100]);

        let store = TapeStore::open_with_backend(
            Arc::clone(&backend),
            StoreConfig::new().cleanup_policy(CleanupPolicy::Skip),
        )
        .unwrap();

        assert_eq!(store.recovery_report().skipped, vec!["00000000-junk.dat"]);
        assert!(backend.segment_data("00000000-junk.dat").is_some());
    }

    #[test]
    fn cancelled_open_fails() {
        let backend = InMemoryBackend::new();
        backend.insert_segment(
            "00000000-a.dat",
            encode_frame("A", b"1", 1).unwrap(),
        );
        let cancel = CancelFlag::new();
        cancel.cancel();

        let result = TapeStore::open_cancellable(backend, StoreConfig::default(), &cancel);
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }

    #[test]
    fn retain_stream_filters_memory_only() {
        let backend = Arc::new(InMemoryBackend::new());
        let config = StoreConfig::new().retain_stream(|key| !key.starts_with("tmp"));
        {
            let store = TapeStore::open_with_backend(Arc::clone(&backend), config.clone()).unwrap();
            store.append("keep", &b"1"[..], ExpectedVersion::Any).unwrap();
            store.append("tmp", &b"2"[..], ExpectedVersion::Any).unwrap();
            store.append("keep", &b"3"[..], ExpectedVersion::Any).unwrap();
            assert!(store.read_stream("tmp", 0, 10).is_empty());
        }

        let store = TapeStore::open_with_backend(Arc::clone(&backend), config).unwrap();
        assert_eq!(store.current_version(), 3);
        assert_eq!(store.stream_version("tmp"), 1);
        let versions: Vec<u64> = store.read_all(0, 10).iter().map(|f| f.store_version).collect();
        assert_eq!(versions, vec![1, 3]);

        // Everything is still on disk
        let unfiltered = TapeStore::open_with_backend(Arc::clone(&backend), StoreConfig::new());
        drop(store);
        assert_eq!(unfiltered.unwrap().read_stream("tmp", 0, 10).len(), 1);
    }

    #[test]
    fn concurrent_appends_from_threads() {
        let store = Arc::new(TapeStore::open_in_memory().unwrap());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..50u32 {
                        store
                            .append(&format!("t{t}"), i.to_le_bytes().to_vec(), ExpectedVersion::Any)
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.current_version(), 200);
        let all = store.read_all(0, usize::MAX);
        assert!(all.windows(2).all(|w| w[1].store_version == w[0].store_version + 1));
    }
}
