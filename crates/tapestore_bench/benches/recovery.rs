//! Startup and segment decoding benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tapestore_bench::{filled_backend, random_data};
use tapestore_core::{encode_frame, scan_segment, StoreConfig, TapeStore};

/// Benchmark decoding one segment image.
fn bench_scan_segment(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan_segment");

    for size in [64, 1024, 16 * 1024].iter() {
        let payload = random_data(*size);
        let mut image = Vec::new();
        for version in 1..=100u64 {
            image.extend(encode_frame("stream", &payload, version).unwrap());
        }

        group.throughput(Throughput::Bytes(image.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &image, |b, image| {
            b.iter(|| black_box(scan_segment(black_box(image))));
        });
    }

    group.finish();
}

/// Benchmark opening a store with many segments.
fn bench_open(c: &mut Criterion) {
    let mut group = c.benchmark_group("open");
    group.sample_size(20);

    let base = StoreConfig::new().segment_capacity(64 * 1024);
    let backend = filled_backend(&base, 20_000, 50, 256);

    for parallelism in [1usize, 4, 8].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(parallelism),
            parallelism,
            |b, &parallelism| {
                b.iter(|| {
                    let config = base.clone().load_parallelism(parallelism);
                    let store = TapeStore::open_with_backend(Arc::clone(&backend), config).unwrap();
                    black_box(store.current_version());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_scan_segment, bench_open);
criterion_main!(benches);
