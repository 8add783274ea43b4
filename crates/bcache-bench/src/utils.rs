//! Benchmark utilities and helpers.

use std::sync::Arc;

use bcache_common::types::BlockId;
use bcache_storage::buffer::{BufferCache, BufferCacheConfig};
use bcache_storage::disk::MemDisk;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Block size used by all benchmarks.
pub const BENCH_BLOCK_SIZE: usize = 1024;

/// Builds a cache over a fresh in-memory device.
pub fn new_cache(num_slots: usize, num_buckets: usize) -> (Arc<MemDisk>, BufferCache) {
    let disk = Arc::new(MemDisk::new(BENCH_BLOCK_SIZE));
    let config = BufferCacheConfig::new(num_slots)
        .with_buckets(num_buckets)
        .with_block_size(BENCH_BLOCK_SIZE);
    let cache = BufferCache::new(config, disk.clone()).expect("valid benchmark configuration");
    (disk, cache)
}

/// Generates block ids `0..count` on device 1.
pub fn sequential_blocks(count: u32) -> Vec<BlockId> {
    (0..count).map(|n| BlockId::from_raw(1, n)).collect()
}

/// Generates `count` uniformly random block ids below `range`.
pub fn random_blocks(count: usize, range: u32) -> Vec<BlockId> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count)
        .map(|_| BlockId::from_raw(1, rng.gen_range(0..range)))
        .collect()
}

/// Generates `count` block ids where `hot_percent` of accesses go to the
/// first `hot` blocks and the rest spread over `range`.
pub fn skewed_blocks(count: usize, hot: u32, range: u32, hot_percent: u32) -> Vec<BlockId> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count)
        .map(|_| {
            let n = if rng.gen_ratio(hot_percent, 100) {
                rng.gen_range(0..hot)
            } else {
                rng.gen_range(0..range)
            };
            BlockId::from_raw(1, n)
        })
        .collect()
}
