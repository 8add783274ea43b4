//! Buffer cache configuration.

use std::time::Duration;

use bcache_common::constants::{
    DEFAULT_BLOCK_SIZE, DEFAULT_NUM_BUCKETS, DEFAULT_NUM_SLOTS, MAX_BLOCK_SIZE, MAX_NUM_SLOTS,
};
use serde::{Deserialize, Serialize};

/// Configuration for the buffer cache.
///
/// All values are fixed once the cache is built; the pool never grows or
/// shrinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferCacheConfig {
    /// Number of buffer slots in the pool.
    #[serde(default = "default_num_slots")]
    pub num_slots: usize,
    /// Number of hash buckets the slots are filed under.
    #[serde(default = "default_num_buckets")]
    pub num_buckets: usize,
    /// Block payload size in bytes.
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Give up waiting for a slot's exclusive lock after this many
    /// milliseconds. `None` waits forever.
    #[serde(default)]
    pub lock_timeout_ms: Option<u64>,
}

fn default_num_slots() -> usize {
    DEFAULT_NUM_SLOTS
}

fn default_num_buckets() -> usize {
    DEFAULT_NUM_BUCKETS
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

impl BufferCacheConfig {
    /// Creates a new configuration with the specified number of slots.
    pub fn new(num_slots: usize) -> Self {
        Self {
            num_slots,
            num_buckets: DEFAULT_NUM_BUCKETS,
            block_size: DEFAULT_BLOCK_SIZE,
            lock_timeout_ms: None,
        }
    }

    /// Sets the number of buckets.
    pub fn with_buckets(mut self, num_buckets: usize) -> Self {
        self.num_buckets = num_buckets;
        self
    }

    /// Sets the block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the exclusive-lock wait timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Returns the exclusive-lock wait timeout, if one is configured.
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }

    /// Returns the total payload memory held by the pool.
    pub fn memory_usage(&self) -> usize {
        self.num_slots * self.block_size
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.num_slots == 0 {
            return Err("num_slots must be > 0");
        }
        if self.num_slots > MAX_NUM_SLOTS {
            return Err("num_slots exceeds the maximum pool size");
        }
        if self.num_buckets == 0 {
            return Err("num_buckets must be > 0");
        }
        if self.block_size == 0 {
            return Err("block_size must be > 0");
        }
        if self.block_size > MAX_BLOCK_SIZE {
            return Err("block_size exceeds the maximum block size");
        }
        Ok(())
    }
}

impl Default for BufferCacheConfig {
    fn default() -> Self {
        Self::new(DEFAULT_NUM_SLOTS)
    }
}
