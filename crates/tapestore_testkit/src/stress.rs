//! Stress tests for TapeStore.
//!
//! These helpers drive a store under heavy load and concurrent access.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tapestore_core::{AppendOutcome, ExpectedVersion, TapeStore};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Operations rejected by a version check.
    pub conflicts: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, conflicts: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + conflicts + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            conflicts,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Conflicts: {}", self.conflicts);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations per thread.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Size of each payload in bytes.
    pub payload_size: usize,
    /// Number of distinct streams.
    pub stream_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 1_000,
            threads: 4,
            payload_size: 128,
            stream_count: 16,
        }
    }
}

#[derive(Default)]
struct Counters {
    successful: AtomicUsize,
    conflicts: AtomicUsize,
    failed: AtomicUsize,
}

impl Counters {
    fn record(&self, result: &tapestore_core::CoreResult<AppendOutcome>) {
        let counter = match result {
            Ok(AppendOutcome::Committed(_)) => &self.successful,
            Ok(AppendOutcome::Conflict(_)) => &self.conflicts,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(self, start: Instant) -> StressTestResult {
        StressTestResult::new(
            self.successful.into_inner(),
            self.conflicts.into_inner(),
            self.failed.into_inner(),
            start.elapsed(),
        )
    }
}

/// Appends unconditionally from one thread.
pub fn stress_sequential_appends(store: &TapeStore, config: &StressConfig) -> StressTestResult {
    let payload = vec![0xABu8; config.payload_size];
    let counters = Counters::default();
    let start = Instant::now();

    for i in 0..config.operations {
        let key = format!("stream-{}", i % config.stream_count.max(1));
        counters.record(&store.append(&key, payload.clone(), ExpectedVersion::Any));
    }

    counters.finish(start)
}

/// Appends unconditionally from several threads at once.
pub fn stress_concurrent_appends(store: &TapeStore, config: &StressConfig) -> StressTestResult {
    let counters = Counters::default();
    let start = Instant::now();

    thread::scope(|scope| {
        for t in 0..config.threads {
            let counters = &counters;
            scope.spawn(move || {
                let payload = vec![t as u8; config.payload_size];
                for i in 0..config.operations {
                    let key = format!("stream-{}", (t + i) % config.stream_count.max(1));
                    counters.record(&store.append(&key, payload.clone(), ExpectedVersion::Any));
                }
            });
        }
    });

    counters.finish(start)
}

/// Threads race to extend the same stream with exact version checks.
///
/// Each thread reads the stream version and appends expecting it; losers
/// see a conflict and retry. Every frame of the stream must end up with a
/// distinct version.
pub fn stress_optimistic_writers(
    store: &TapeStore,
    stream: &str,
    config: &StressConfig,
) -> StressTestResult {
    let counters = Counters::default();
    let start = Instant::now();

    thread::scope(|scope| {
        for t in 0..config.threads {
            let counters = &counters;
            scope.spawn(move || {
                let mut committed = 0;
                while committed < config.operations {
                    let expected = ExpectedVersion::Exact(store.stream_version(stream));
                    let result = store.append(stream, vec![t as u8], expected);
                    if matches!(result, Ok(AppendOutcome::Committed(_))) {
                        committed += 1;
                    }
                    let failed = result.is_err();
                    counters.record(&result);
                    if failed {
                        break;
                    }
                }
            });
        }
    });

    counters.finish(start)
}

/// Reads while other threads append; returns the number of reads that saw
/// a gap or out-of-order frame.
pub fn stress_readers_during_appends(store: &TapeStore, config: &StressConfig) -> usize {
    let anomalies = AtomicUsize::new(0);
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        scope.spawn(|| {
            stress_concurrent_appends(store, config);
            done.store(true, Ordering::Release);
        });

        for _ in 0..config.threads.max(1) {
            scope.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    let all = store.read_all(0, usize::MAX);
                    let dense = all
                        .iter()
                        .enumerate()
                        .all(|(i, frame)| frame.store_version == i as u64 + 1);
                    if !dense {
                        anomalies.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    anomalies.into_inner()
}
