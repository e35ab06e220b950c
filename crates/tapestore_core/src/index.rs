//! In-memory stream index.
//!
//! The index mirrors every committed frame and is the single authority on
//! version assignment. Appends go through a two-phase port:
//!
//! 1. [`StreamIndex::reserve`] takes the writer lock, checks the expected
//!    version and computes the versions the frame will receive.
//! 2. The caller persists the frame while the [`Reservation`] holds the
//!    writer lock. Readers are not blocked.
//! 3. [`Reservation::commit`] makes the frame visible. Dropping the
//!    reservation instead leaves the index untouched.
//!
//! The writer lock serializes every mutation. The state lock is only held
//! exclusively while a committed frame or a replacement state is installed,
//! so readers take it briefly and clone the requested window.

use crate::config::StreamFilter;
use crate::error::{CoreError, CoreResult};
use crate::frame::DecodedFrame;
use crate::types::{ExpectedVersion, Frame, ReservedVersions, VersionConflict};
use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

#[derive(Debug, Default)]
struct StreamEntry {
    frames: Vec<Frame>,
    version: u64,
}

#[derive(Debug, Default)]
struct IndexState {
    streams: HashMap<Arc<str>, StreamEntry>,
    all: Vec<Frame>,
    store_version: u64,
}

impl IndexState {
    fn key_for(&self, key: &str) -> Arc<str> {
        self.streams
            .get_key_value(key)
            .map_or_else(|| Arc::from(key), |(k, _)| Arc::clone(k))
    }

    fn stream_len(&self, key: &str) -> u64 {
        self.streams.get(key).map_or(0, |entry| entry.version)
    }

    fn push(&mut self, frame: Frame, retained: bool) {
        let entry = self
            .streams
            .entry(Arc::clone(&frame.stream_key))
            .or_default();
        entry.version = frame.stream_version;
        self.store_version = frame.store_version;
        if retained {
            entry.frames.push(frame.clone());
            self.all.push(frame);
        }
    }
}

/// Concurrent index of all frames by stream and by store version.
pub struct StreamIndex {
    state: RwLock<IndexState>,
    writer: Mutex<()>,
    owner: Mutex<Option<ThreadId>>,
    retain: Option<StreamFilter>,
}

impl fmt::Debug for StreamIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamIndex")
            .field("store_version", &self.store_version())
            .field("stream_count", &self.stream_count())
            .field("filtered", &self.retain.is_some())
            .finish()
    }
}

impl Default for StreamIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive right to mutate the index, tagged with the owning thread.
struct WriteGuard<'a> {
    _writer: MutexGuard<'a, ()>,
    owner: &'a Mutex<Option<ThreadId>>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        *self.owner.lock() = None;
    }
}

impl StreamIndex {
    /// Creates an empty index that keeps every stream.
    #[must_use]
    pub fn new() -> Self {
        Self::with_filter(None)
    }

    /// Creates an empty index that keeps only streams accepted by `retain`.
    #[must_use]
    pub fn with_filter(retain: Option<StreamFilter>) -> Self {
        Self {
            state: RwLock::new(IndexState::default()),
            writer: Mutex::new(()),
            owner: Mutex::new(None),
            retain,
        }
    }

    fn lock_write(&self) -> CoreResult<WriteGuard<'_>> {
        let me = thread::current().id();
        if *self.owner.lock() == Some(me) {
            return Err(CoreError::LockReentrancy);
        }
        let writer = self.writer.lock();
        *self.owner.lock() = Some(me);
        Ok(WriteGuard {
            _writer: writer,
            owner: &self.owner,
        })
    }

    fn retains(&self, key: &str) -> bool {
        self.retain.as_ref().map_or(true, |filter| filter(key))
    }

    /// Builds a fresh state from `records` without touching the live one.
    fn replay<I>(&self, records: I) -> (IndexState, u64)
    where
        I: IntoIterator<Item = DecodedFrame>,
    {
        let mut state = IndexState::default();
        let mut loaded = 0;
        for record in records {
            let key = state.key_for(&record.stream_key);
            let stream_version = state.stream_len(&key) + 1;
            let store_version = state.store_version + 1;

            if record.stream_version != stream_version {
                tracing::warn!(
                    stream = %key,
                    stored = record.stream_version,
                    assigned = stream_version,
                    store_version,
                    "stored stream version disagrees with replay order"
                );
            }

            let retained = self.retains(&key);
            state.push(
                Frame {
                    stream_key: key,
                    payload: record.payload,
                    stream_version,
                    store_version,
                },
                retained,
            );
            loaded += 1;
        }
        (state, loaded)
    }

    /// Replays decoded frames in physical order into an empty index.
    ///
    /// Versions are reassigned sequentially; a stored stream version that
    /// disagrees is logged and overridden. Returns the number of frames
    /// replayed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the index already holds frames, or
    /// `LockReentrancy` if called while this thread holds the writer lock.
    pub fn load_history<I>(&self, records: I) -> CoreResult<u64>
    where
        I: IntoIterator<Item = DecodedFrame>,
    {
        let _guard = self.lock_write()?;
        let current = self.store_version();
        if current != 0 {
            return Err(CoreError::invalid_state(format!(
                "cannot load history into a non-empty index at store version {current}"
            )));
        }
        let (state, loaded) = self.replay(records);
        *self.state.write() = state;
        Ok(loaded)
    }

    /// Atomically replaces the index contents with freshly loaded history.
    ///
    /// `load` runs under the writer lock while readers still see the old
    /// state. Only if it succeeds is the replayed state swapped in; on
    /// failure the index is unchanged and the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the error of `load`, or `LockReentrancy`.
    pub fn reload<E, F>(&self, load: F) -> Result<u64, E>
    where
        F: FnOnce() -> Result<Vec<DecodedFrame>, E>,
        E: From<CoreError>,
    {
        let _guard = self.lock_write()?;
        let records = load()?;
        let (state, loaded) = self.replay(records);
        *self.state.write() = state;
        Ok(loaded)
    }

    /// Reserves the next versions of `stream_key`.
    ///
    /// The returned reservation holds the writer lock until it is committed
    /// or dropped, so every other append waits. Reads proceed.
    ///
    /// # Errors
    ///
    /// Returns `LockReentrancy` if this thread already holds the writer lock.
    /// A version mismatch is not an error: it is the inner `Err`.
    pub fn reserve(
        &self,
        stream_key: &str,
        expected: ExpectedVersion,
    ) -> CoreResult<Result<Reservation<'_>, VersionConflict>> {
        let guard = self.lock_write()?;
        let state = self.state.read();
        let current = state.stream_len(stream_key);

        if let ExpectedVersion::Exact(expected) = expected {
            if expected != current {
                return Ok(Err(VersionConflict {
                    stream: stream_key.to_string(),
                    expected,
                    actual: current,
                }));
            }
        }

        let versions = ReservedVersions {
            stream_version: current + 1,
            store_version: state.store_version + 1,
        };
        let key = state.key_for(stream_key);
        drop(state);
        let retained = self.retains(&key);

        Ok(Ok(Reservation {
            _guard: guard,
            state: &self.state,
            key,
            versions,
            retained,
        }))
    }

    /// Appends a frame, running `commit` before it becomes visible.
    ///
    /// `commit` receives the reserved versions and runs while the writer
    /// lock is held. The frame is made visible only if it returns `Ok`; its error
    /// is returned unchanged and the index is left as it was.
    ///
    /// # Errors
    ///
    /// Returns the error of `commit`, or `LockReentrancy`.
    pub fn append<E, F>(
        &self,
        stream_key: &str,
        payload: Bytes,
        expected: ExpectedVersion,
        commit: F,
    ) -> Result<Result<Frame, VersionConflict>, E>
    where
        F: FnOnce(ReservedVersions) -> Result<(), E>,
        E: From<CoreError>,
    {
        let reservation = match self.reserve(stream_key, expected)? {
            Ok(reservation) => reservation,
            Err(conflict) => return Ok(Err(conflict)),
        };
        commit(reservation.versions())?;
        Ok(Ok(reservation.commit(payload)))
    }

    /// Frames of one stream with `stream_version > after`, ascending, at
    /// most `max_count` of them.
    #[must_use]
    pub fn read_stream(&self, stream_key: &str, after: u64, max_count: usize) -> Vec<Frame> {
        let state = self.state.read();
        let Some(entry) = state.streams.get(stream_key) else {
            return Vec::new();
        };

        // Retained streams hold every version, so frame i has version i + 1
        let start = usize::try_from(after).unwrap_or(usize::MAX).min(entry.frames.len());
        entry.frames[start..].iter().take(max_count).cloned().collect()
    }

    /// Frames of all streams with `store_version > after`, ascending, at
    /// most `max_count` of them.
    #[must_use]
    pub fn read_all(&self, after: u64, max_count: usize) -> Vec<Frame> {
        let state = self.state.read();
        // Filtered streams leave gaps, so search rather than index
        let start = state.all.partition_point(|frame| frame.store_version <= after);
        state.all[start..].iter().take(max_count).cloned().collect()
    }

    /// Resets the index if `on_commit` succeeds.
    ///
    /// `on_commit` runs under the writer lock. On failure nothing changes and
    /// its error is returned.
    ///
    /// # Errors
    ///
    /// Returns the error of `on_commit`, or `LockReentrancy`.
    pub fn clear<E, F>(&self, on_commit: F) -> Result<(), E>
    where
        F: FnOnce() -> Result<(), E>,
        E: From<CoreError>,
    {
        let _guard = self.lock_write()?;
        on_commit()?;
        *self.state.write() = IndexState::default();
        Ok(())
    }

    /// Current store version; 0 when empty.
    #[must_use]
    pub fn store_version(&self) -> u64 {
        self.state.read().store_version
    }

    /// Current version of one stream; 0 if it has never been appended to.
    #[must_use]
    pub fn stream_version(&self, stream_key: &str) -> u64 {
        self.state.read().stream_len(stream_key)
    }

    /// Number of known streams, including filtered ones.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.state.read().streams.len()
    }

    /// Every known stream with its current version, sorted by key.
    #[must_use]
    pub fn streams(&self) -> Vec<(String, u64)> {
        let state = self.state.read();
        let mut streams: Vec<_> = state
            .streams
            .iter()
            .map(|(key, entry)| (key.to_string(), entry.version))
            .collect();
        streams.sort();
        streams
    }

    /// True if nothing was ever appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store_version() == 0
    }
}

/// A pending append holding the index writer lock.
///
/// Commit with [`Reservation::commit`]; drop to abort.
pub struct Reservation<'a> {
    _guard: WriteGuard<'a>,
    state: &'a RwLock<IndexState>,
    key: Arc<str>,
    versions: ReservedVersions,
    retained: bool,
}

impl fmt::Debug for Reservation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("stream", &self.key)
            .field("versions", &self.versions)
            .finish()
    }
}

impl Reservation<'_> {
    /// The versions the frame receives on commit.
    #[must_use]
    pub fn versions(&self) -> ReservedVersions {
        self.versions
    }

    /// The stream being appended to.
    #[must_use]
    pub fn stream_key(&self) -> &str {
        &self.key
    }

    /// Makes the frame visible and releases the lock.
    pub fn commit(self, payload: Bytes) -> Frame {
        let frame = Frame {
            stream_key: Arc::clone(&self.key),
            payload,
            stream_version: self.versions.stream_version,
            store_version: self.versions.store_version,
        };
        self.state.write().push(frame.clone(), self.retained);
        frame
    }
}
