//! Buffer cache benchmarks for bcache.
//!
//! Benchmarks for:
//! - Hits on blocks that are already cached
//! - Misses that evict and migrate slots
//! - Skewed access with a small hot set
//! - Many threads on a shared cache

use std::thread;

use bcache_bench::utils::{new_cache, random_blocks, sequential_blocks, skewed_blocks};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// Benchmark acquiring blocks that are all resident.
fn bench_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache/hit");

    for buckets in [1, 13, 31].iter() {
        let (_disk, cache) = new_cache(64, *buckets);
        let blocks = sequential_blocks(64);
        for id in &blocks {
            cache.acquire(*id).unwrap().release();
        }

        group.throughput(Throughput::Elements(blocks.len() as u64));
        group.bench_with_input(BenchmarkId::new("buckets", buckets), buckets, |b, _| {
            b.iter(|| {
                for id in &blocks {
                    let guard = cache.acquire(*id).unwrap();
                    black_box(guard.data()[0]);
                }
            });
        });
    }

    group.finish();
}

/// Benchmark a scan over more blocks than the pool holds, so every access
/// misses.
fn bench_miss(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache/miss");

    for slots in [30, 128, 512].iter() {
        let (_disk, cache) = new_cache(*slots, 13);
        let blocks = sequential_blocks(*slots as u32 * 2);

        group.throughput(Throughput::Elements(blocks.len() as u64));
        group.bench_with_input(BenchmarkId::new("slots", slots), slots, |b, _| {
            b.iter(|| {
                for id in &blocks {
                    let guard = cache.acquire(*id).unwrap();
                    black_box(guard.data()[0]);
                }
            });
        });
    }

    group.finish();
}

/// Benchmark a skewed workload: 90% of accesses hit 16 hot blocks.
fn bench_skewed(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache/skewed");

    let (_disk, cache) = new_cache(30, 13);
    let blocks = skewed_blocks(10_000, 16, 1_000, 90);

    group.throughput(Throughput::Elements(blocks.len() as u64));
    group.bench_function("hot16_of_1000", |b| {
        b.iter(|| {
            for id in &blocks {
                let guard = cache.acquire(*id).unwrap();
                black_box(guard.data()[0]);
            }
        });
    });

    group.finish();
}

/// Benchmark read-modify-commit cycles from several threads.
fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache/contended");

    for threads in [2, 4, 8].iter() {
        let (_disk, cache) = new_cache(64, 13);
        let blocks = random_blocks(2_000, 128);

        group.throughput(Throughput::Elements((blocks.len() * threads) as u64));
        group.bench_with_input(BenchmarkId::new("threads", threads), threads, |b, &threads| {
            b.iter(|| {
                thread::scope(|s| {
                    for _ in 0..threads {
                        s.spawn(|| {
                            for id in &blocks {
                                let mut guard = cache.acquire(*id).unwrap();
                                let next = guard.data()[0].wrapping_add(1);
                                guard.data_mut()[0] = next;
                                guard.commit().unwrap();
                            }
                        });
                    }
                });
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_hit, bench_miss, bench_skewed, bench_contended);
criterion_main!(benches);
