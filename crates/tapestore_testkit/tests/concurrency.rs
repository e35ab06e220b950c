//! Concurrent writers and readers against one store.

use std::collections::HashSet;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tapestore_core::{AppendOutcome, ExpectedVersion, StoreConfig, TapeStore};
use tapestore_testkit::{
    stress_concurrent_appends, CrashableBackend, stress_optimistic_writers, stress_readers_during_appends,
    StressConfig, TestStore,
};

fn config() -> StressConfig {
    StressConfig {
        operations: 200,
        threads: 8,
        payload_size: 48,
        stream_count: 6,
    }
}

#[test]
fn store_versions_are_dense_and_unique() {
    let store = TestStore::memory_with_config(StoreConfig::new().page_size(128).segment_capacity(4096));
    let result = stress_concurrent_appends(&store, &config());
    assert_eq!(result.successful_ops, 1600);

    let all = store.read_all(0, usize::MAX);
    assert_eq!(all.len(), 1600);
    for (i, frame) in all.iter().enumerate() {
        assert_eq!(frame.store_version, i as u64 + 1);
    }

    for s in 0..6 {
        let key = format!("stream-{s}");
        let frames = store.read_stream(&key, 0, usize::MAX);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.stream_version, i as u64 + 1);
        }
    }

    let store = store.reopen();
    assert_eq!(store.read_all(0, usize::MAX), all);
}

#[test]
fn optimistic_writers_never_share_a_version() {
    let store = TestStore::file();
    let config = StressConfig {
        operations: 30,
        threads: 4,
        ..config()
    };
    let result = stress_optimistic_writers(&store, "counter", &config);

    assert_eq!(result.successful_ops, 120);
    assert_eq!(result.failed_ops, 0);

    let versions: HashSet<u64> = store
        .read_stream("counter", 0, usize::MAX)
        .iter()
        .map(|f| f.stream_version)
        .collect();
    assert_eq!(versions.len(), 120);
}

#[test]
fn readers_never_see_gaps() {
    let store = TestStore::memory();
    assert_eq!(stress_readers_during_appends(&store, &config()), 0);
}

#[test]
fn exactly_one_racer_wins_each_version() {
    let store = Arc::new(TapeStore::open_in_memory().unwrap());

    for round in 0..20u64 {
        let winners: usize = (0..6u8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store.append("race", vec![t], ExpectedVersion::Exact(round))
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| match handle.join().unwrap().unwrap() {
                AppendOutcome::Committed(_) => 1,
                AppendOutcome::Conflict(conflict) => {
                    assert_eq!(conflict.actual, round + 1);
                    0
                }
            })
            .sum();
        assert_eq!(winners, 1, "round {round}");
    }
    assert_eq!(store.stream_version("race"), 20);
}

#[test]
fn reopen_while_reading() {
    let store = Arc::new(TapeStore::open_in_memory().unwrap());
    for i in 0..100u32 {
        store.append("s", i.to_le_bytes().to_vec(), ExpectedVersion::Any).unwrap();
    }

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..50 {
                    let len = store.read_all(0, usize::MAX).len();
                    assert!(len == 100, "partial view of {len} frames");
                }
            });
        }
        scope.spawn(|| {
            for _ in 0..5 {
                store.reopen().unwrap();
            }
        });
    });
}

#[test]
fn reads_do_not_wait_for_append_io() {
    let (backend, _inner) = CrashableBackend::memory();
    let store = Arc::new(TapeStore::open_with_backend(backend.clone(), StoreConfig::default()).unwrap());
    store.append("A", b"1".to_vec(), ExpectedVersion::Any).unwrap();

    backend.pause_writes();
    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.append("B", b"2".to_vec(), ExpectedVersion::Any))
    };
    backend.wait_for_paused_writer();

    let (tx, rx) = mpsc::channel();
    let reader = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            let seen = (
                store.read_stream("A", 0, 10).len(),
                store.read_all(0, 10).len(),
                store.current_version(),
                store.stream_version("B"),
            );
            let _ = tx.send(seen);
        })
    };
    let seen = rx.recv_timeout(Duration::from_secs(5));
    backend.resume_writes();

    assert_eq!(seen, Ok((1, 1, 1, 0)));
    reader.join().unwrap();
    assert!(writer.join().unwrap().unwrap().is_committed());
    assert_eq!(store.current_version(), 2);
    assert_eq!(store.read_stream("B", 0, 10).len(), 1);
}
