//! Buffer cache implementation.
//!
//! The cache owns a fixed array of slots and a fixed array of buckets. A
//! lookup locks the bucket the block hashes to; a miss scans the whole pool
//! for the least recently freed slot and, if that slot is filed elsewhere,
//! moves it over while holding both bucket mutexes in ascending index
//! order.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bcache_common::types::BlockId;
use tracing::{debug, error, info, trace, warn};

use super::bucket::{Bucket, BucketGuard, BucketList};
use super::config::BufferCacheConfig;
use super::error::{BufferError, BufferResult};
use super::guard::{BlockGuard, SlotRef};
use super::recency::RecencyClock;
use super::slot::{BufferSlot, SlotId, SlotState};
use super::BufferCacheStats;
use crate::disk::BlockDevice;

/// Point-in-time view of one slot, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    /// Slot index.
    pub slot: SlotId,
    /// Block the slot is bound to.
    pub block: Option<BlockId>,
    /// Bucket the slot is filed under.
    pub bucket: usize,
    /// Active references.
    pub refcount: u32,
    /// Recency stamp.
    pub recency: u64,
    /// Whether the payload holds the block's content.
    pub valid: bool,
}

/// A fixed-size cache of disk blocks.
///
/// It provides:
/// - Lookup of cached blocks through sharded hash buckets
/// - Pool-wide least-recently-used replacement of unreferenced slots
/// - Exclusive, blocking access to a block's payload through [`BlockGuard`]
/// - Synchronous reads and writes through a [`BlockDevice`]
///
/// The cache is an ordinary value; share it with `Arc` or a reference.
pub struct BufferCache {
    /// Configuration.
    config: BufferCacheConfig,
    /// Slot array, indexed by `SlotId`.
    slots: Box<[BufferSlot]>,
    /// Bucket array, indexed by `block_no % num_buckets`.
    buckets: Box<[Bucket]>,
    /// Source of recency stamps.
    clock: RecencyClock,
    /// Backing device.
    device: Arc<dyn BlockDevice>,
    lookups: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    migrations: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    lock_timeouts: AtomicU64,
}

impl BufferCache {
    /// Creates a new cache over `device`.
    ///
    /// Slot `i` starts empty in bucket `i % num_buckets`; every slot carries
    /// the same initial recency, so the first evictions go in index order.
    pub fn new(config: BufferCacheConfig, device: Arc<dyn BlockDevice>) -> BufferResult<Self> {
        config.validate().map_err(BufferError::config)?;
        if device.block_size() != config.block_size {
            return Err(BufferError::config(format!(
                "device block size {} does not match configured block size {}",
                device.block_size(),
                config.block_size
            )));
        }

        let num_slots = config.num_slots;
        let num_buckets = config.num_buckets;
        let clock = RecencyClock::new();
        let start = clock.now();

        let slots: Box<[BufferSlot]> = (0..num_slots)
            .map(|i| BufferSlot::new(SlotId::new(i), config.block_size, i % num_buckets, start))
            .collect();

        let per_bucket = num_slots.div_ceil(num_buckets);
        let buckets: Box<[Bucket]> = (0..num_buckets)
            .map(|i| Bucket::new(i, per_bucket))
            .collect();
        for slot in slots.iter() {
            buckets[slot.bucket()].lock().insert(slot.slot_id());
        }

        info!(
            slots = num_slots,
            buckets = num_buckets,
            block_size = config.block_size,
            "buffer cache initialized"
        );

        Ok(Self {
            config,
            slots,
            buckets,
            clock,
            device,
            lookups: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            migrations: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            lock_timeouts: AtomicU64::new(0),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BufferCacheConfig {
        &self.config
    }

    /// Returns the number of slots.
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of buckets.
    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Returns the block size in bytes.
    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    /// Returns the locked block `id` with its device content loaded.
    ///
    /// Blocks while another caller holds the block. If the read fails the
    /// slot stays invalid, the reference is dropped and the error returned.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds a guard for `id`.
    pub fn acquire(&self, id: BlockId) -> BufferResult<BlockGuard<'_>> {
        self.acquire_with(id, self.config.lock_timeout())
    }

    /// Like [`acquire`](Self::acquire), but waits at most `timeout` for the
    /// block's lock.
    pub fn acquire_timeout(&self, id: BlockId, timeout: Duration) -> BufferResult<BlockGuard<'_>> {
        self.acquire_with(id, Some(timeout))
    }

    /// Returns the locked block `id` without reading it.
    ///
    /// The payload is whatever the slot held before unless
    /// [`BlockGuard::is_valid`] says otherwise.
    pub fn get(&self, id: BlockId) -> BufferResult<BlockGuard<'_>> {
        self.get_with(id, self.config.lock_timeout())
    }

    /// Writes the guard's payload to the device.
    pub fn commit(&self, guard: &BlockGuard<'_>) -> BufferResult<()> {
        guard.commit()
    }

    /// Unlocks the guard's slot and drops its reference.
    pub fn release(&self, guard: BlockGuard<'_>) {
        guard.release();
    }

    /// Adds a reference to the slot behind `slot_ref` without locking it.
    ///
    /// A pinned slot cannot be repurposed until it is unpinned.
    pub fn pin(&self, slot_ref: SlotRef) -> BufferResult<()> {
        let slot = self.slot_for(slot_ref)?;
        let _home = self.lock_home(slot);
        if !slot.holds(slot_ref.block) {
            return Err(BufferError::StaleSlot {
                slot: slot_ref.slot,
                expected: slot_ref.block,
            });
        }
        let refcount = slot.retain().ok_or(BufferError::RefcountOverflow {
            slot: slot_ref.slot,
        })?;
        trace!(block = %slot_ref.block, slot = %slot_ref.slot, refcount, "pin");
        Ok(())
    }

    /// Drops a reference taken by [`pin`](Self::pin).
    pub fn unpin(&self, slot_ref: SlotRef) -> BufferResult<()> {
        let slot = self.slot_for(slot_ref)?;
        let _home = self.lock_home(slot);
        if !slot.holds(slot_ref.block) {
            return Err(BufferError::StaleSlot {
                slot: slot_ref.slot,
                expected: slot_ref.block,
            });
        }
        let refcount = slot
            .release_ref(|| self.clock.tick())
            .ok_or(BufferError::NotPinned {
                slot: slot_ref.slot,
            })?;
        trace!(block = %slot_ref.block, slot = %slot_ref.slot, refcount, "unpin");
        Ok(())
    }

    /// Returns true if some slot is bound to `id`. Does not count as a
    /// lookup and does not change recency.
    pub fn contains(&self, id: BlockId) -> bool {
        let list = self.buckets[self.bucket_index(id)].lock();
        self.lookup(&list, id).is_some()
    }

    /// Returns current statistics.
    pub fn stats(&self) -> BufferCacheStats {
        BufferCacheStats {
            lookups: self.lookups.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            migrations: self.migrations.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
            referenced_slots: self.slots.iter().filter(|s| !s.state().is_free()).count(),
        }
    }

    /// Returns a snapshot of every slot. Slots may change while it is taken.
    pub fn slot_info(&self) -> Vec<SlotInfo> {
        self.slots
            .iter()
            .map(|slot| {
                let state = slot.state();
                SlotInfo {
                    slot: slot.slot_id(),
                    block: slot.identity(),
                    bucket: slot.bucket(),
                    refcount: state.refcount(),
                    recency: state.recency(),
                    valid: slot.is_valid(),
                }
            })
            .collect()
    }

    /// Checks the bucket bookkeeping with every bucket locked.
    ///
    /// Each slot must be listed in exactly one bucket, the one it records,
    /// and a bound slot must be filed under the bucket its block hashes to.
    /// No bucket may hold two slots bound to the same block.
    pub fn check_invariants(&self) -> BufferResult<()> {
        let lists: Vec<BucketGuard<'_>> = self.buckets.iter().map(Bucket::lock).collect();
        let mut seen = vec![0usize; self.slots.len()];

        for (bucket, list) in self.buckets.iter().zip(&lists) {
            let index = bucket.index();
            let mut blocks = HashSet::with_capacity(list.len());
            for slot_id in list.iter() {
                let slot = self.slots.get(slot_id.index()).ok_or_else(|| {
                    BufferError::invariant(format!("bucket {index} lists unknown slot {slot_id}"))
                })?;
                seen[slot_id.index()] += 1;

                if slot.bucket() != index {
                    return Err(BufferError::invariant(format!(
                        "slot {slot_id} is listed in bucket {index} but records bucket {}",
                        slot.bucket()
                    )));
                }
                if let Some(block) = slot.identity() {
                    if self.bucket_index(block) != index {
                        return Err(BufferError::invariant(format!(
                            "slot {slot_id} caches block {block} but is filed under bucket {index}"
                        )));
                    }
                    if !blocks.insert(block) {
                        return Err(BufferError::invariant(format!(
                            "block {block} is cached twice in bucket {index}"
                        )));
                    }
                }
            }
        }

        if let Some((slot, count)) = seen.iter().enumerate().find(|&(_, &count)| count != 1) {
            return Err(BufferError::invariant(format!(
                "slot {slot} is listed in {count} buckets"
            )));
        }
        Ok(())
    }

    fn acquire_with(&self, id: BlockId, timeout: Option<Duration>) -> BufferResult<BlockGuard<'_>> {
        let mut guard = self.get_with(id, timeout)?;
        if !guard.is_valid() {
            // On error the guard drops here, which releases the slot.
            guard.fill()?;
        }
        Ok(guard)
    }

    fn get_with(&self, id: BlockId, timeout: Option<Duration>) -> BufferResult<BlockGuard<'_>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let slot = self.bind(id)?;

        // No bucket mutex is held from here on.
        let data = match timeout {
            None => slot.data.lock(),
            Some(timeout) => match slot.data.try_lock_for(timeout) {
                Some(data) => data,
                None => {
                    self.drop_reference(slot);
                    self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
                    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                    warn!(block = %id, slot = %slot.slot_id(), timeout_ms, "lock wait timed out");
                    return Err(BufferError::LockTimeout {
                        block: id,
                        timeout_ms,
                    });
                }
            },
        };

        Ok(BlockGuard::new(self, slot, id, data))
    }

    /// Finds or allocates the slot for `id` and takes a reference on it.
    fn bind(&self, id: BlockId) -> BufferResult<&BufferSlot> {
        let target_index = self.bucket_index(id);
        let target = &self.buckets[target_index];
        let mut target_list = target.lock();

        loop {
            if let Some(slot) = self.lookup(&target_list, id) {
                return self.hit(slot, id);
            }

            let Some(victim) = self.find_victim() else {
                error!(block = %id, slots = self.slots.len(), "buffer cache exhausted");
                return Err(BufferError::NoFreeSlots {
                    num_slots: self.slots.len(),
                });
            };

            let victim_index = victim.bucket();
            if victim_index == target_index {
                // The target mutex owns the victim; re-check what the
                // unlocked scan saw.
                if !victim.state().is_free() {
                    continue;
                }
                self.rebind(victim, id);
                return Ok(victim);
            }

            let source = &self.buckets[victim_index];
            let mut source_list = if victim_index > target_index {
                source.lock()
            } else {
                drop(target_list);
                let source_list = source.lock();
                target_list = target.lock();
                // Someone may have brought `id` in while target was unlocked.
                if let Some(slot) = self.lookup(&target_list, id) {
                    return self.hit(slot, id);
                }
                source_list
            };

            if victim.bucket() != victim_index || !victim.state().is_free() {
                trace!(block = %id, slot = %victim.slot_id(), "victim taken, rescanning");
                continue;
            }

            let removed = source_list.remove(victim.slot_id());
            debug_assert!(removed, "victim missing from its bucket");
            target_list.insert(victim.slot_id());
            victim.set_bucket(target_index);
            self.rebind(victim, id);
            self.migrations.fetch_add(1, Ordering::Relaxed);
            debug!(
                block = %id,
                slot = %victim.slot_id(),
                from = victim_index,
                to = target_index,
                "migrated slot"
            );
            return Ok(victim);
        }
    }

    fn hit<'a>(&self, slot: &'a BufferSlot, id: BlockId) -> BufferResult<&'a BufferSlot> {
        let Some(refcount) = slot.retain() else {
            warn!(block = %id, slot = %slot.slot_id(), "slot reference count at limit");
            return Err(BufferError::RefcountOverflow {
                slot: slot.slot_id(),
            });
        };
        self.hits.fetch_add(1, Ordering::Relaxed);
        trace!(block = %id, slot = %slot.slot_id(), refcount, "cache hit");
        Ok(slot)
    }

    /// Points a free slot at `id`. Caller holds the slot's bucket mutex and,
    /// for a migration, the mutex of the bucket it came from.
    fn rebind(&self, slot: &BufferSlot, id: BlockId) {
        let previous = slot.identity();
        slot.set_identity(id);
        // Refcount zero means no sleep-lock holder can observe this.
        slot.set_valid(false);
        slot.set_state(SlotState::bound(1, self.clock.tick()));

        self.misses.fetch_add(1, Ordering::Relaxed);
        match previous {
            Some(old) => {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(block = %id, evicted = %old, slot = %slot.slot_id(), "cache miss, evicted");
            }
            None => debug!(block = %id, slot = %slot.slot_id(), "cache miss"),
        }
    }

    /// Scans the pool for the free slot with the smallest recency, lowest
    /// index first on ties. Reads are unlocked; the caller re-validates.
    fn find_victim(&self) -> Option<&BufferSlot> {
        self.slots
            .iter()
            .filter_map(|slot| {
                let state = slot.state();
                state.is_free().then_some((state.recency(), slot.slot_id()))
            })
            .min()
            .map(|(_, slot_id)| &self.slots[slot_id.index()])
    }

    fn lookup(&self, list: &BucketList, id: BlockId) -> Option<&BufferSlot> {
        list.iter()
            .map(|slot_id| &self.slots[slot_id.index()])
            .find(|slot| slot.holds(id))
    }

    /// Locks the bucket `slot` is currently filed under.
    fn lock_home(&self, slot: &BufferSlot) -> BucketGuard<'_> {
        loop {
            let index = slot.bucket();
            let list = self.buckets[index].lock();
            if slot.bucket() == index {
                return list;
            }
        }
    }

    fn slot_for(&self, slot_ref: SlotRef) -> BufferResult<&BufferSlot> {
        self.slots
            .get(slot_ref.slot.index())
            .ok_or(BufferError::StaleSlot {
                slot: slot_ref.slot,
                expected: slot_ref.block,
            })
    }

    #[inline]
    fn bucket_index(&self, id: BlockId) -> usize {
        id.block_no().as_u32() as usize % self.buckets.len()
    }

    /// Drops one reference held by a guard. The slot's lock is already
    /// released.
    pub(crate) fn drop_reference(&self, slot: &BufferSlot) {
        let _home = self.lock_home(slot);
        let remaining = slot.release_ref(|| self.clock.tick());
        assert!(
            remaining.is_some(),
            "slot {} released with no references",
            slot.slot_id()
        );
    }

    pub(crate) fn read_slot(&self, id: BlockId, buf: &mut [u8]) -> BufferResult<()> {
        self.device.read_block(id, buf).map_err(|err| {
            error!(block = %id, error = %err, "block read failed");
            BufferError::from(err)
        })?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn write_slot(&self, id: BlockId, buf: &[u8]) -> BufferResult<()> {
        self.device.write_block(id, buf).map_err(|err| {
            error!(block = %id, error = %err, "block write failed");
            BufferError::from(err)
        })?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl fmt::Debug for BufferCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferCache")
            .field("num_slots", &self.slots.len())
            .field("num_buckets", &self.buckets.len())
            .field("block_size", &self.config.block_size)
            .finish_non_exhaustive()
    }
}
