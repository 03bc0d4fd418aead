//! Parallel reduction benchmark suite for Turnstile.
//!
//! Benchmarks:
//! - Threshold sweep for a fixed-size sum (split overhead vs. granularity)
//! - Sequential baseline against the pooled reducer at several sizes
//! - Bounded channel hand-off throughput at several capacities
//!
//! Run:
//!   cargo bench --bench reduce_benchmark

#![allow(missing_docs)]
#![allow(clippy::semicolon_if_nothing_returned)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;

use turnstile::channel::Message;
use turnstile::{BoundedChannel, Cx, ParallelReducer, WorkerPool};

// =============================================================================
// HELPERS
// =============================================================================

fn one_to(n: u64) -> Arc<[u64]> {
    (1..=n).collect::<Vec<_>>().into()
}

// =============================================================================
// REDUCER BENCHMARKS
// =============================================================================

fn bench_threshold_sweep(c: &mut Criterion) {
    let pool = WorkerPool::with_threads(4).expect("bench pool");
    let data = one_to(1_000_000);
    let cx = Cx::for_request();

    let mut group = c.benchmark_group("reduce/threshold_sweep");
    group.throughput(Throughput::Elements(data.len() as u64));
    for threshold in [10usize, 1_000, 10_000, 100_000] {
        let reducer = ParallelReducer::new(pool.handle(), threshold);
        group.bench_with_input(BenchmarkId::from_parameter(threshold), &threshold, |b, _| {
            b.iter(|| black_box(reducer.sum(&cx, Arc::clone(&data)).expect("sum")))
        });
    }
    group.finish();
}

fn bench_sequential_vs_parallel(c: &mut Criterion) {
    let pool = WorkerPool::with_threads(4).expect("bench pool");
    let reducer = ParallelReducer::new(pool.handle(), 10_000);
    let cx = Cx::for_request();

    let mut group = c.benchmark_group("reduce/sequential_vs_parallel");
    for n in [10_000u64, 100_000, 1_000_000] {
        let data = one_to(n);
        group.throughput(Throughput::Elements(n));
        group.bench_with_input(BenchmarkId::new("sequential", n), &data, |b, data| {
            b.iter(|| black_box(data.iter().sum::<u64>()))
        });
        group.bench_with_input(BenchmarkId::new("parallel", n), &data, |b, data| {
            b.iter(|| black_box(reducer.sum(&cx, Arc::clone(data)).expect("sum")))
        });
    }
    group.finish();
}

// =============================================================================
// CHANNEL BENCHMARKS
// =============================================================================

fn bench_channel_handoff(c: &mut Criterion) {
    const ITEMS: u64 = 10_000;
    let cx = Cx::for_request();

    let mut group = c.benchmark_group("channel/handoff");
    group.throughput(Throughput::Elements(ITEMS));
    for capacity in [1usize, 10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &capacity| {
            b.iter(|| {
                let channel = BoundedChannel::new(capacity);
                thread::scope(|s| {
                    s.spawn(|| {
                        for i in 0..ITEMS {
                            channel.put(&cx, i).expect("put");
                        }
                        channel.put_stop(&cx).expect("stop");
                    });
                    let mut sum = 0u64;
                    while let Message::Data(v) = channel.take(&cx).expect("take") {
                        sum += v;
                    }
                    black_box(sum)
                })
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_threshold_sweep,
    bench_sequential_vs_parallel,
    bench_channel_handoff
);
criterion_main!(benches);
