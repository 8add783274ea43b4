//! Shared helpers for the integration tests.

use std::sync::{Arc, Once};

use bcache_common::types::BlockId;
use bcache_storage::buffer::{BufferCache, BufferCacheConfig};
use bcache_storage::disk::MemDisk;
use tracing_subscriber::EnvFilter;

/// Block size used by the tests.
pub const TEST_BLOCK_SIZE: usize = 64;

static LOGGING: Once = Once::new();

/// Routes cache logs to the test harness. Filter with `RUST_LOG`.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Builds a cache with `slots` slots and `buckets` buckets over a fresh
/// in-memory device.
pub fn new_cache(slots: usize, buckets: usize) -> (Arc<MemDisk>, BufferCache) {
    init_test_logging();
    let disk = Arc::new(MemDisk::new(TEST_BLOCK_SIZE));
    let config = BufferCacheConfig::new(slots)
        .with_buckets(buckets)
        .with_block_size(TEST_BLOCK_SIZE);
    let cache = match BufferCache::new(config, disk.clone()) {
        Ok(cache) => cache,
        Err(e) => panic!("test cache configuration rejected: {e}"),
    };
    (disk, cache)
}

/// Block `n` on device 1.
pub fn block(n: u32) -> BlockId {
    BlockId::from_raw(1, n)
}

/// Deterministic content for `id`, distinct per block.
pub fn pattern(id: BlockId) -> Vec<u8> {
    let seed = id.as_u64();
    (0..TEST_BLOCK_SIZE as u64)
        .map(|i| (seed.wrapping_mul(31).wrapping_add(i) % 251) as u8)
        .collect()
}
