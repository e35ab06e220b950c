//! Crash and fault injection for TapeStore.
//!
//! [`CrashableBackend`] wraps any [`SegmentBackend`] and interferes with page
//! writes: it can stop after a byte budget (optionally writing a torn prefix
//! first), fail a number of writes with transient errors, fail syncs, or
//! hold writes at a gate so a test can act while an append is mid-I/O.
//! Clones share their fault state, so a test can keep one handle while the
//! store owns another.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tapestore_testkit::crash::CrashableBackend;
//!
//! let backend = CrashableBackend::new(InMemoryBackend::new());
//! let handle = backend.clone();
//! let store = TapeStore::open_with_backend(backend, StoreConfig::default())?;
//! handle.crash_after(600);
//! ```

use parking_lot::{Condvar, Mutex};
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tapestore_storage::{
    CleanupPolicy, InMemoryBackend, SegmentBackend, SegmentInfo, SegmentWriter, StorageError,
    StorageResult,
};

#[derive(Debug)]
struct FaultState {
    crash_after_bytes: AtomicU64,
    bytes_written: AtomicU64,
    tear: AtomicBool,
    crashed: AtomicBool,
    transient_failures: AtomicU32,
    fail_on_sync: AtomicBool,
    fail_on_create: AtomicBool,
    fail_on_delete: AtomicBool,
    gate: Mutex<WriteGate>,
    gate_changed: Condvar,
}

#[derive(Debug, Default)]
struct WriteGate {
    paused: bool,
    waiting: usize,
}

impl Default for FaultState {
    fn default() -> Self {
        Self {
            crash_after_bytes: AtomicU64::new(u64::MAX),
            bytes_written: AtomicU64::new(0),
            tear: AtomicBool::new(true),
            crashed: AtomicBool::new(false),
            transient_failures: AtomicU32::new(0),
            fail_on_sync: AtomicBool::new(false),
            fail_on_create: AtomicBool::new(false),
            fail_on_delete: AtomicBool::new(false),
            gate: Mutex::new(WriteGate::default()),
            gate_changed: Condvar::new(),
        }
    }
}

fn simulated(what: &str) -> StorageError {
    StorageError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("simulated crash during {what}"),
    ))
}

/// A segment backend wrapper that can simulate crashes.
#[derive(Clone)]
pub struct CrashableBackend {
    inner: Arc<dyn SegmentBackend>,
    state: Arc<FaultState>,
}

impl CrashableBackend {
    /// Creates a new crashable backend wrapping an inner backend.
    pub fn new<B: SegmentBackend + 'static>(inner: B) -> Self {
        Self {
            inner: Arc::new(inner),
            state: Arc::new(FaultState::default()),
        }
    }

    /// Wraps a fresh growable in-memory backend.
    pub fn memory() -> (Self, Arc<InMemoryBackend>) {
        let inner = Arc::new(InMemoryBackend::new());
        (Self::new(Arc::clone(&inner)), inner)
    }

    /// Crashes once `bytes` more bytes of page data have been written.
    ///
    /// The write that crosses the budget writes the bytes that still fit
    /// (a torn write) unless [`CrashableBackend::set_tear`] disabled it,
    /// then fails. Every later write fails too.
    pub fn crash_after(&self, bytes: u64) {
        self.state.bytes_written.store(0, Ordering::SeqCst);
        self.state.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Sets whether a crashing write leaves its prefix behind.
    pub fn set_tear(&self, tear: bool) {
        self.state.tear.store(tear, Ordering::SeqCst);
    }

    /// Fails the next `count` page writes with a transient error.
    pub fn fail_transient(&self, count: u32) {
        self.state.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Sets whether sync should fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.state.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Sets whether creating or opening a segment should fail.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state.fail_on_create.store(fail, Ordering::SeqCst);
    }

    /// Sets whether deleting every segment should fail.
    pub fn set_fail_on_delete(&self, fail: bool) {
        self.state.fail_on_delete.store(fail, Ordering::SeqCst);
    }

    /// Holds every page write until [`CrashableBackend::resume_writes`].
    pub fn pause_writes(&self) {
        self.state.gate.lock().paused = true;
    }

    /// Releases writes held by [`CrashableBackend::pause_writes`].
    pub fn resume_writes(&self) {
        self.state.gate.lock().paused = false;
        self.state.gate_changed.notify_all();
    }

    /// Blocks until at least one page write is held at the gate.
    pub fn wait_for_paused_writer(&self) {
        let mut gate = self.state.gate.lock();
        while gate.waiting == 0 {
            self.state.gate_changed.wait(&mut gate);
        }
    }

    /// Resets the crash state and releases held writes.
    pub fn reset(&self) {
        self.state.crash_after_bytes.store(u64::MAX, Ordering::SeqCst);
        self.state.bytes_written.store(0, Ordering::SeqCst);
        self.state.tear.store(true, Ordering::SeqCst);
        self.state.crashed.store(false, Ordering::SeqCst);
        self.state.transient_failures.store(0, Ordering::SeqCst);
        self.state.fail_on_sync.store(false, Ordering::SeqCst);
        self.state.fail_on_create.store(false, Ordering::SeqCst);
        self.state.fail_on_delete.store(false, Ordering::SeqCst);
        self.resume_writes();
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    /// Transient failures not yet consumed.
    pub fn pending_transient_failures(&self) -> u32 {
        self.state.transient_failures.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for CrashableBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashableBackend")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

struct CrashableWriter {
    inner: Box<dyn SegmentWriter>,
    state: Arc<FaultState>,
}

impl SegmentWriter for CrashableWriter {
    fn write_page(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let state = &self.state;
        {
            let mut gate = state.gate.lock();
            if gate.paused {
                gate.waiting += 1;
                state.gate_changed.notify_all();
                while gate.paused {
                    state.gate_changed.wait(&mut gate);
                }
                gate.waiting -= 1;
            }
        }

        if state.crashed.load(Ordering::SeqCst) {
            return Err(simulated("write"));
        }

        let took_failure = state
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took_failure {
            return Err(StorageError::transient("simulated throttling"));
        }

        let len = data.len() as u64;
        let current = state.bytes_written.fetch_add(len, Ordering::SeqCst);
        let threshold = state.crash_after_bytes.load(Ordering::SeqCst);

        if current.saturating_add(len) > threshold {
            state.crashed.store(true, Ordering::SeqCst);
            let partial_len = threshold.saturating_sub(current) as usize;
            if partial_len > 0 && state.tear.load(Ordering::SeqCst) {
                let _ = self.inner.write_page(offset, &data[..partial_len]);
            }
            return Err(simulated("partial write"));
        }

        self.inner.write_page(offset, data)
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.state.fail_on_sync.load(Ordering::SeqCst) {
            self.state.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("sync"));
        }
        self.inner.sync()
    }
}

impl SegmentBackend for CrashableBackend {
    fn create_or_open_for_append(
        &self,
        id: &str,
        capacity: u64,
    ) -> StorageResult<Box<dyn SegmentWriter>> {
        if self.state.fail_on_create.load(Ordering::SeqCst) {
            return Err(simulated("segment creation"));
        }
        Ok(Box::new(CrashableWriter {
            inner: self.inner.create_or_open_for_append(id, capacity)?,
            state: Arc::clone(&self.state),
        }))
    }

    fn list_segments(&self) -> StorageResult<Vec<SegmentInfo>> {
        self.inner.list_segments()
    }

    fn open_for_read(&self, id: &str) -> StorageResult<Box<dyn Read + Send>> {
        self.inner.open_for_read(id)
    }

    fn delete_segment(&self, id: &str) -> StorageResult<()> {
        self.inner.delete_segment(id)
    }

    fn delete_all(&self) -> StorageResult<()> {
        if self.state.fail_on_delete.load(Ordering::SeqCst) {
            return Err(simulated("delete"));
        }
        self.inner.delete_all()
    }

    fn copy_segment(&self, src: &str, dst: &str) -> StorageResult<()> {
        self.inner.copy_segment(src, dst)
    }

    fn truncate_segment(&self, id: &str, len: u64) -> StorageResult<()> {
        self.inner.truncate_segment(id, len)
    }

    fn cleanup_policy(&self) -> CleanupPolicy {
        self.inner.cleanup_policy()
    }
}

/// Appends `len` copies of `byte` to a segment, as a torn write would.
///
/// Creates the segment if it does not exist.
pub fn append_garbage(backend: &InMemoryBackend, id: &str, len: usize, byte: u8) {
    let mut data = backend.segment_data(id).unwrap_or_default();
    data.resize(data.len() + len, byte);
    backend.insert_segment(id, data);
}

/// Overwrites one byte of a segment.
///
/// # Panics
///
/// Panics if the segment does not exist or is too short.
pub fn flip_byte(backend: &InMemoryBackend, id: &str, offset: usize) {
    let mut data = backend.segment_data(id).expect("segment exists");
    data[offset] ^= 0xFF;
    backend.insert_segment(id, data);
}

/// Returns the ids of the `.dat` segments of a backend in log order.
pub fn segment_ids(backend: &dyn SegmentBackend) -> Vec<String> {
    let mut segments = backend.list_segments().unwrap_or_default();
    tapestore_core::sort_segments(&mut segments);
    segments.into_iter().map(|s| s.id).collect()
}
