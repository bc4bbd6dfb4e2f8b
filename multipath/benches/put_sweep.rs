//! Benchmark of one pipelined transfer round per route shape.
//!
//! Each iteration sets up a fresh 4-rank fabric and drives a full round,
//! so figures include setup; relative differences between routes and
//! window sizes are the interesting part.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::thread;

use fabric::{SimFabric, SimFabricConfig};
use multipath::topology::Placement;
use multipath::{run_rank, JobConfig, SweepConfig, ThreadGroup};

const NUM_RANKS: usize = 4;
const PAYLOAD: usize = 1 << 20;

fn run_round(proxies: usize, window: usize) {
    let job = JobConfig {
        sweep: SweepConfig {
            min_window: window,
            max_window: window,
            payload: PAYLOAD,
            iterations: 1,
        },
        placement: Placement::default(),
        num_proxies: proxies,
    };
    let nics = SimFabric::create(NUM_RANKS, &SimFabricConfig::default());
    let groups = ThreadGroup::create(NUM_RANKS);

    let handles: Vec<_> = groups
        .into_iter()
        .zip(nics)
        .map(|(group, nic)| thread::spawn(move || run_rank(&group, &nic, &job)))
        .collect();
    for handle in handles {
        black_box(handle.join().unwrap().unwrap());
    }
}

fn bench_routes(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_round");
    group.throughput(Throughput::Bytes(PAYLOAD as u64));

    group.bench_function("direct", |b| b.iter(|| run_round(0, 256 << 10)));
    group.bench_function("one_proxy", |b| b.iter(|| run_round(1, 256 << 10)));
    group.bench_function("two_proxy", |b| b.iter(|| run_round(2, 256 << 10)));

    group.finish();
}

fn bench_window_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("window_size");
    group.throughput(Throughput::Bytes(PAYLOAD as u64));

    for window_kib in [128usize, 512, 1024] {
        group.bench_function(format!("{}kib", window_kib), |b| {
            b.iter(|| run_round(1, window_kib << 10));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_routes, bench_window_sizes);
criterion_main!(benches);
