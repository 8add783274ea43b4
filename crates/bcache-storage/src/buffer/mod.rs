//! Buffer cache for bcache.
//!
//! The buffer cache keeps a fixed pool of block-sized slots in memory and is
//! the one place where concurrent callers meet when they touch the same disk
//! block:
//!
//! - **Block Caching**: Repeated reads of a block are served from memory
//! - **Sharded Lookup**: Slots are filed under hash buckets, each with its own mutex
//! - **Global LRU**: The least recently freed slot in the whole pool is reused first
//! - **Exclusive Access**: A blocking per-slot lock serializes work on each block
//! - **Pinning**: References that keep a slot resident without locking it
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        BufferCache                               │
//! │  ┌─────────────────────────────────────────────────────────────┐ │
//! │  │                    Bucket Array                              │ │
//! │  │   block_no % num_buckets -> Mutex<[SlotId, ...]>             │ │
//! │  └─────────────────────────────────────────────────────────────┘ │
//! │                              │                                   │
//! │                              ▼                                   │
//! │  ┌─────────────────────────────────────────────────────────────┐ │
//! │  │                    Slot Array                                │ │
//! │  │  ┌─────────┐ ┌─────────┐ ┌─────────┐     ┌─────────┐       │ │
//! │  │  │ Slot 0  │ │ Slot 1  │ │ Slot 2  │ ... │ Slot N  │       │ │
//! │  │  │ ─────── │ │ ─────── │ │ ─────── │     │ ─────── │       │ │
//! │  │  │ block   │ │ block   │ │ block   │     │ block   │       │ │
//! │  │  │ ref|age │ │ ref|age │ │ ref|age │     │ ref|age │       │ │
//! │  │  │ valid   │ │ valid   │ │ valid   │     │ valid   │       │ │
//! │  │  │ sleep   │ │ sleep   │ │ sleep   │     │ sleep   │       │ │
//! │  │  │ data[]  │ │ data[]  │ │ data[]  │     │ data[]  │       │ │
//! │  │  └─────────┘ └─────────┘ └─────────┘     └─────────┘       │ │
//! │  └─────────────────────────────────────────────────────────────┘ │
//! │                              │                                   │
//! │                              ▼                                   │
//! │  ┌─────────────────────────────────────────────────────────────┐ │
//! │  │                    BlockDevice                               │ │
//! │  │             (read_block / write_block)                       │ │
//! │  └─────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use bcache_common::types::BlockId;
//! use bcache_storage::buffer::{BufferCache, BufferCacheConfig};
//! use bcache_storage::disk::MemDisk;
//! use std::sync::Arc;
//!
//! fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let disk = Arc::new(MemDisk::new(1024));
//!     let cache = BufferCache::new(BufferCacheConfig::default(), disk)?;
//!
//!     // Read the block (from the device on a miss) and lock it
//!     let mut guard = cache.acquire(BlockId::from_raw(1, 42))?;
//!     guard.data_mut()[0] = 0xFF;
//!     guard.commit()?;
//!
//!     // Unlocked and unreferenced when the guard is dropped
//!     Ok(())
//! }
//! ```

mod bucket;
mod cache;
mod config;
mod error;
mod guard;
mod recency;
mod sleeplock;
mod slot;

pub use cache::{BufferCache, SlotInfo};
pub use config::BufferCacheConfig;
pub use error::{BufferError, BufferResult};
pub use guard::{BlockGuard, SlotRef};
pub use recency::RecencyClock;
pub use sleeplock::{SleepLock, SleepLockGuard};
pub use slot::{BufferSlot, SlotId, SlotState, MAX_RECENCY};

/// Statistics for buffer cache monitoring.
#[derive(Debug, Clone, Default)]
pub struct BufferCacheStats {
    /// Total number of lookups.
    pub lookups: u64,
    /// Lookups that found the block already bound to a slot.
    pub hits: u64,
    /// Lookups that had to repurpose a slot.
    pub misses: u64,
    /// Misses that displaced a previously cached block.
    pub evictions: u64,
    /// Misses that moved a slot between buckets.
    pub migrations: u64,
    /// Successful device reads.
    pub reads: u64,
    /// Successful device writes.
    pub writes: u64,
    /// Lock waits that gave up.
    pub lock_timeouts: u64,
    /// Current number of referenced slots.
    pub referenced_slots: usize,
}

impl BufferCacheStats {
    /// Returns the cache hit ratio (0.0 to 1.0).
    pub fn hit_ratio(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }
}
