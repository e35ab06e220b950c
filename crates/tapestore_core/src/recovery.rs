//! Segment scanning and crash recovery.
//!
//! On open every segment is scanned and classified:
//!
//! | Condition                                                        | Action                         |
//! |------------------------------------------------------------------|--------------------------------|
//! | Empty, or nothing decodes and non-zero bytes are present         | delete or skip (cleanup policy)|
//! | Page-multiple length, at least one page of non-zero bytes after  | back up to `<id>.bak`, then    |
//! | the last valid frame                                             | truncate to the last frame     |
//! | Anything else                                                    | load the valid frames          |
//!
//! Zero bytes after the last frame are padding or unused page-blob capacity
//! and never count as corruption.

use crate::error::{CoreError, CoreResult};
use crate::frame::{scan_reader, DecodedFrame, SegmentScan};
use crate::segment::sort_segments;
use crate::types::CancelFlag;
use parking_lot::Mutex;
use std::io::BufReader;
use std::sync::atomic::{AtomicUsize, Ordering};
use tapestore_storage::{
    CleanupPolicy, RetryPolicy, SegmentBackend, SegmentInfo, BACKUP_SUFFIX,
};

/// How a scanned segment is treated on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentHealth {
    /// Load the valid frames as they are.
    Readable,
    /// Holds no decodable data.
    Invalid,
    /// Ends in a torn write; truncate to `valid_len`.
    Torn {
        /// End of the last valid frame.
        valid_len: u64,
    },
}

/// Classifies a scanned segment.
#[must_use]
pub fn classify(scan: &SegmentScan, page_size: usize) -> SegmentHealth {
    let page_size = page_size as u64;

    if scan.total_len == 0 || (scan.frames.is_empty() && !scan.tail_is_zero) {
        return SegmentHealth::Invalid;
    }

    if !scan.tail_is_zero && scan.total_len % page_size == 0 && scan.tail_len() >= page_size {
        return SegmentHealth::Torn {
            valid_len: scan.valid_len,
        };
    }

    SegmentHealth::Readable
}

/// A segment that was backed up and truncated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairedSegment {
    /// The repaired segment.
    pub id: String,
    /// Where the original bytes were copied.
    pub backup: String,
    /// Length before truncation.
    pub original_len: u64,
    /// Length after truncation.
    pub valid_len: u64,
}

/// What recovery found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Number of segments scanned.
    pub segments_scanned: usize,
    /// Number of frames handed to the index.
    pub frames_loaded: u64,
    /// Invalid segments that were deleted.
    pub deleted: Vec<String>,
    /// Invalid segments that were left in place.
    pub skipped: Vec<String>,
    /// Segments truncated after a torn write.
    pub repaired: Vec<RepairedSegment>,
    /// Segments loaded with a short undecodable tail left in place.
    pub ignored_tails: Vec<String>,
}

impl RecoveryReport {
    /// True if recovery changed or ignored anything.
    #[must_use]
    pub fn had_problems(&self) -> bool {
        !(self.deleted.is_empty()
            && self.skipped.is_empty()
            && self.repaired.is_empty()
            && self.ignored_tails.is_empty())
    }
}

/// Reads and decodes segments with at most `parallelism` worker threads.
///
/// Results are returned in the order of `segments`. Workers check `cancel`
/// before each segment.
///
/// # Errors
///
/// Returns `Cancelled` if the flag was raised, otherwise the first read
/// error in segment order.
pub fn scan_segments(
    backend: &dyn SegmentBackend,
    segments: &[SegmentInfo],
    parallelism: usize,
    retry: &RetryPolicy,
    cancel: &CancelFlag,
) -> CoreResult<Vec<SegmentScan>> {
    let scan_one = |info: &SegmentInfo| -> CoreResult<SegmentScan> {
        let scan = retry.run("scan_segment", || {
            let source = backend.open_for_read(&info.id)?;
            Ok(scan_reader(BufReader::new(source))?)
        })?;
        tracing::debug!(
            segment = %info.id,
            frames = scan.frames.len(),
            valid_len = scan.valid_len,
            total_len = scan.total_len,
            "scanned segment"
        );
        Ok(scan)
    };

    let workers = parallelism.clamp(1, segments.len().max(1));
    let slots: Vec<Mutex<Option<CoreResult<SegmentScan>>>> =
        segments.iter().map(|_| Mutex::new(None)).collect();

    if workers == 1 {
        for (info, slot) in segments.iter().zip(&slots) {
            if cancel.is_cancelled() {
                break;
            }
            *slot.lock() = Some(scan_one(info));
        }
    } else {
        let next = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    let Some(info) = segments.get(i) else {
                        break;
                    };
                    *slots[i].lock() = Some(scan_one(info));
                });
            }
        });
    }

    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }

    slots
        .into_iter()
        .map(|slot| slot.into_inner().unwrap_or(Err(CoreError::Cancelled)))
        .collect()
}

/// Settings for one recovery run.
#[derive(Debug, Clone)]
pub struct RecoveryOptions<'a> {
    /// Page size the segments were written with.
    pub page_size: usize,
    /// Maximum concurrent segment scans.
    pub parallelism: usize,
    /// Treatment of invalid segments.
    pub cleanup_policy: CleanupPolicy,
    /// Retry policy for backend reads and repairs.
    pub retry: &'a RetryPolicy,
    /// Cancellation checked between segments.
    pub cancel: &'a CancelFlag,
}

/// Scans every segment, repairs what needs repair, and returns the frames
/// in log order.
///
/// # Errors
///
/// Returns `Cancelled` if the flag was raised, or a backend error from
/// listing, reading or repairing.
pub fn recover(
    backend: &dyn SegmentBackend,
    options: &RecoveryOptions<'_>,
) -> CoreResult<(Vec<DecodedFrame>, RecoveryReport)> {
    let retry = options.retry;
    let mut segments = retry.run("list_segments", || backend.list_segments())?;
    sort_segments(&mut segments);

    let scans = scan_segments(
        backend,
        &segments,
        options.parallelism,
        retry,
        options.cancel,
    )?;

    let mut report = RecoveryReport {
        segments_scanned: segments.len(),
        ..RecoveryReport::default()
    };
    let mut frames = Vec::new();

    for (info, scan) in segments.into_iter().zip(scans) {
        match classify(&scan, options.page_size) {
            SegmentHealth::Invalid => match options.cleanup_policy {
                CleanupPolicy::Delete => {
                    tracing::warn!(segment = %info.id, len = info.len, "deleting invalid segment");
                    retry.run("delete_segment", || backend.delete_segment(&info.id))?;
                    report.deleted.push(info.id);
                }
                CleanupPolicy::Skip => {
                    tracing::warn!(segment = %info.id, len = info.len, "skipping invalid segment");
                    report.skipped.push(info.id);
                }
            },
            SegmentHealth::Torn { valid_len } => {
                let backup = format!("{}{BACKUP_SUFFIX}", info.id);
                tracing::warn!(
                    segment = %info.id,
                    %backup,
                    valid_len,
                    total_len = scan.total_len,
                    "torn write detected, truncating segment"
                );
                retry.run("copy_segment", || backend.copy_segment(&info.id, &backup))?;
                retry.run("truncate_segment", || {
                    backend.truncate_segment(&info.id, valid_len)
                })?;
                frames.extend(scan.frames);
                report.repaired.push(RepairedSegment {
                    id: info.id,
                    backup,
                    original_len: scan.total_len,
                    valid_len,
                });
            }
            SegmentHealth::Readable => {
                if !scan.tail_is_zero {
                    tracing::warn!(
                        segment = %info.id,
                        valid_len = scan.valid_len,
                        tail_len = scan.tail_len(),
                        "ignoring undecodable tail"
                    );
                    report.ignored_tails.push(info.id);
                }
                frames.extend(scan.frames);
            }
        }
    }

    if options.cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }

    report.frames_loaded = frames.len() as u64;
    tracing::info!(
        segments = report.segments_scanned,
        frames = report.frames_loaded,
        deleted = report.deleted.len(),
        skipped = report.skipped.len(),
        repaired = report.repaired.len(),
        "recovery complete"
    );
    Ok((frames, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode_frame, scan_segment};
    use std::io::{self, Read};
    use std::sync::atomic::AtomicU32;
    use tapestore_storage::{InMemoryBackend, RetryConfig, SegmentWriter, StorageResult};

    /// Segment readers that fail mid-stream a set number of times.
    struct FlakyReads {
        inner: InMemoryBackend,
        failures: AtomicU32,
    }

    struct FlakyReader {
        inner: Box<dyn Read + Send>,
        fail: bool,
    }

    impl Read for FlakyReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
            }
            // Fail on the next call, after some data was delivered
            let len = buf.len().min(16);
            let n = self.inner.read(&mut buf[..len])?;
            self.fail = self.fail || n > 0;
            Ok(n)
        }
    }

    impl SegmentBackend for FlakyReads {
        fn create_or_open_for_append(
            &self,
            id: &str,
            capacity: u64,
        ) -> StorageResult<Box<dyn SegmentWriter>> {
            self.inner.create_or_open_for_append(id, capacity)
        }

        fn list_segments(&self) -> StorageResult<Vec<SegmentInfo>> {
            self.inner.list_segments()
        }

        fn open_for_read(&self, id: &str) -> StorageResult<Box<dyn Read + Send>> {
            let fail = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            let inner = self.inner.open_for_read(id)?;
            if fail {
                Ok(Box::new(FlakyReader { inner, fail: false }))
            } else {
                Ok(inner)
            }
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

    fn segment_with(frames: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        for (i, (key, payload)) in frames.iter().enumerate() {
            buf.extend(encode_frame(key, payload.as_bytes(), i as u64 + 1).unwrap());
        }
        buf
    }

    fn options<'a>(retry: &'a RetryPolicy, cancel: &'a CancelFlag) -> RecoveryOptions<'a> {
        RecoveryOptions {
            page_size: 512,
            parallelism: 4,
            cleanup_policy: CleanupPolicy::Delete,
            retry,
            cancel,
        }
    }

    #[test]
    fn classify_cases() {
        let mut clean = segment_with(&[("a", "1")]);
        clean.resize(512, 0);
        assert_eq!(classify(&scan_segment(&clean), 512), SegmentHealth::Readable);

        assert_eq!(classify(&scan_segment(&[]), 512), SegmentHealth::Invalid);
        assert_eq!(classify(&scan_segment(&[9u8; 700]), 512), SegmentHealth::Invalid);
        assert_eq!(classify(&scan_segment(&[0u8; 512]), 512), SegmentHealth::Readable);

        let mut short_tail = segment_with(&[("a", "1")]);
        short_tail.extend_from_slice(&[0xEE; 20]);
        assert_eq!(classify(&scan_segment(&short_tail), 512), SegmentHealth::Readable);

        let mut torn = segment_with(&[("a", "1")]);
        let valid_len = torn.len() as u64;
        torn.resize(1024, 0);
        torn[600] = 0xEE;
        assert_eq!(
            classify(&scan_segment(&torn), 512),
            SegmentHealth::Torn { valid_len }
        );

        // Garbage without a page-multiple length is left alone
        let mut odd = segment_with(&[("a", "1")]);
        odd.resize(1000, 0xEE);
        assert_eq!(classify(&scan_segment(&odd), 512), SegmentHealth::Readable);
    }

    #[test]
    fn recover_loads_in_log_order() {
        let backend = InMemoryBackend::new();
        backend.insert_segment(
            "00000002-2024-01-01-000001.dat",
            segment_with(&[("b", "3")]),
        );
        backend.insert_segment(
            "00000000-2024-01-01-000000.dat",
            segment_with(&[("a", "1"), ("a", "2")]),
        );

        let retry = RetryPolicy::none();
        let cancel = CancelFlag::new();
        let (frames, report) = recover(&backend, &options(&retry, &cancel)).unwrap();

        let payloads: Vec<&[u8]> = frames.iter().map(|f| &f.payload[..]).collect();
        assert_eq!(payloads, vec![&b"1"[..], b"2", b"3"]);
        assert_eq!(report.segments_scanned, 2);
        assert_eq!(report.frames_loaded, 3);
        assert!(!report.had_problems());
    }

    #[test]
    fn recover_deletes_invalid_segments() {
        let backend = InMemoryBackend::new();
        backend.insert_segment("00000000-a.dat", Vec::new());
        backend.insert_segment("00000001-b.dat", vec![0xAB; 64]);
        backend.insert_segment("00000002-c.dat", segment_with(&[("a", "1")]));

        let retry = RetryPolicy::none();
        let cancel = CancelFlag::new();
        let (frames, report) = recover(&backend, &options(&retry, &cancel)).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(report.deleted, vec!["00000000-a.dat", "00000001-b.dat"]);
        assert_eq!(backend.ids(), vec!["00000002-c.dat"]);
    }

    #[test]
    fn recover_skips_invalid_segments_when_asked() {
        let backend = InMemoryBackend::new();
        backend.insert_segment("00000000-a.dat", vec![0xAB; 64]);

        let retry = RetryPolicy::none();
        let cancel = CancelFlag::new();
        let mut opts = options(&retry, &cancel);
        opts.cleanup_policy = CleanupPolicy::Skip;
        let (_, report) = recover(&backend, &opts).unwrap();

        assert_eq!(report.skipped, vec!["00000000-a.dat"]);
        assert!(backend.segment_data("00000000-a.dat").is_some());
    }

    #[test]
    fn recover_repairs_torn_segment() {
        let backend = InMemoryBackend::new();
        let mut torn = segment_with(&[("a", "1"), ("a", "2")]);
        let valid_len = torn.len();
        torn.resize(1024, 0);
        for b in &mut torn[valid_len..valid_len + 600] {
            *b = 0x5A;
        }
        backend.insert_segment("00000000-a.dat", torn.clone());

        let retry = RetryPolicy::none();
        let cancel = CancelFlag::new();
        let (frames, report) = recover(&backend, &options(&retry, &cancel)).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(
            report.repaired,
            vec![RepairedSegment {
                id: "00000000-a.dat".into(),
                backup: "00000000-a.dat.bak".into(),
                original_len: 1024,
                valid_len: valid_len as u64,
            }]
        );
        assert_eq!(
            backend.segment_data("00000000-a.dat").unwrap().len(),
            valid_len
        );
        assert_eq!(backend.segment_data("00000000-a.dat.bak").unwrap(), torn);
    }

    #[test]
    fn parallel_scan_preserves_order() {
        let backend = InMemoryBackend::new();
        let mut infos = Vec::new();
        for i in 0..20u64 {
            let id = format!("{i:08}-x.dat");
            backend.insert_segment(&id, segment_with(&[("s", format!("{i}").as_str())]));
            infos.push(SegmentInfo { id, len: 0 });
        }

        let scans = scan_segments(&backend, &infos, 3, &RetryPolicy::none(), &CancelFlag::new())
            .unwrap();
        for (i, scan) in scans.iter().enumerate() {
            assert_eq!(&scan.frames[0].payload[..], format!("{i}").as_bytes());
        }
    }

    #[test]
    fn interrupted_scan_is_retried_from_the_start() {
        let backend = FlakyReads {
            inner: InMemoryBackend::new(),
            failures: AtomicU32::new(2),
        };
        backend
            .inner
            .insert_segment("00000000-a.dat", segment_with(&[("a", "first"), ("a", "second")]));
        let infos = backend.list_segments().unwrap();

        let scans = scan_segments(
            &backend,
            &infos,
            1,
            &RetryConfig::immediate(3).policy(),
            &CancelFlag::new(),
        )
        .unwrap();
        assert_eq!(scans[0].frames.len(), 2);
        assert_eq!(backend.failures.load(Ordering::SeqCst), 0);

        backend.failures.store(1, Ordering::SeqCst);
        let result = scan_segments(&backend, &infos, 1, &RetryPolicy::none(), &CancelFlag::new());
        match result {
            Err(CoreError::Storage(e)) => assert!(e.is_transient()),
            other => panic!("expected a transient storage error, got {other:?}"),
        }
    }

    #[test]
    fn scan_missing_segment_fails() {
        let backend = InMemoryBackend::new();
        let infos = vec![SegmentInfo {
            id: "gone.dat".into(),
            len: 0,
        }];
        let result = scan_segments(&backend, &infos, 2, &RetryPolicy::none(), &CancelFlag::new());
        assert!(matches!(result, Err(CoreError::Storage(_))));
    }

    #[test]
    fn cancelled_recovery_fails() {
        let backend = InMemoryBackend::new();
        backend.insert_segment("00000000-a.dat", segment_with(&[("a", "1")]));

        let retry = RetryPolicy::none();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let result = recover(&backend, &options(&retry, &cancel));
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }
}
