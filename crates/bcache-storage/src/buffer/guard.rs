//! Block guards - exclusive handles to a cached block.
//!
//! A guard is what `acquire` hands out: it holds one reference on the slot
//! and the slot's sleep lock. Releasing it (explicitly or by dropping it)
//! unlocks the slot first and then gives the reference back.

use std::fmt;

use bcache_common::types::BlockId;

use super::cache::BufferCache;
use super::error::BufferResult;
use super::sleeplock::SleepLockGuard;
use super::slot::{BufferSlot, SlotId};

/// Reference to a slot that outlives a guard, used to pin and unpin.
///
/// It remembers which block the slot cached when the ref was taken so a
/// pin cannot silently land on a slot that has since been recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotRef {
    pub(crate) slot: SlotId,
    pub(crate) block: BlockId,
}

impl SlotRef {
    /// Returns the slot ID.
    pub fn slot_id(&self) -> SlotId {
        self.slot
    }

    /// Returns the block the slot was bound to.
    pub fn block_id(&self) -> BlockId {
        self.block
    }
}

/// Exclusive, locked access to one cached block.
///
/// This guard:
/// - Holds the slot's sleep lock, so no other caller can touch the payload
/// - Holds one reference, so the slot cannot be repurposed
/// - Releases both when dropped
pub struct BlockGuard<'a> {
    cache: &'a BufferCache,
    slot: &'a BufferSlot,
    block: BlockId,
    data: Option<SleepLockGuard<'a, Box<[u8]>>>,
}

impl<'a> BlockGuard<'a> {
    pub(crate) fn new(
        cache: &'a BufferCache,
        slot: &'a BufferSlot,
        block: BlockId,
        data: SleepLockGuard<'a, Box<[u8]>>,
    ) -> Self {
        Self {
            cache,
            slot,
            block,
            data: Some(data),
        }
    }

    /// Returns the block this guard gives access to.
    #[inline]
    pub fn block_id(&self) -> BlockId {
        self.block
    }

    /// Returns the slot ID.
    #[inline]
    pub fn slot_id(&self) -> SlotId {
        self.slot.slot_id()
    }

    /// Returns a ref usable with [`BufferCache::pin`] / [`BufferCache::unpin`].
    #[inline]
    pub fn slot_ref(&self) -> SlotRef {
        SlotRef {
            slot: self.slot.slot_id(),
            block: self.block,
        }
    }

    /// Returns true if the payload holds the block's device content.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.slot.is_valid()
    }

    /// Declares that the payload now holds the block's content, e.g. after
    /// the caller overwrote the whole block.
    #[inline]
    pub fn mark_valid(&mut self) {
        self.locked_data();
        self.slot.set_valid(true);
    }

    /// Returns the block payload.
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.locked_data()
    }

    /// Returns the block payload for modification.
    ///
    /// Changes reach the device only through [`commit`](Self::commit).
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.locked_data_mut()
    }

    /// Writes the payload to the device. The guard stays locked.
    pub fn commit(&self) -> BufferResult<()> {
        let data = self.locked_data();
        self.cache.write_slot(self.block, data)
    }

    /// Unlocks the slot and drops this guard's reference.
    pub fn release(mut self) {
        self.release_inner();
    }

    /// Fills the payload from the device and marks it valid.
    pub(crate) fn fill(&mut self) -> BufferResult<()> {
        let block = self.block;
        let cache = self.cache;
        cache.read_slot(block, self.locked_data_mut())?;
        self.slot.set_valid(true);
        Ok(())
    }

    fn locked_data(&self) -> &[u8] {
        let data = self
            .data
            .as_ref()
            .unwrap_or_else(|| panic!("block {}: guard used after release", self.block));
        assert!(
            data.holding(),
            "block {}: slot lock not held by the calling thread",
            self.block
        );
        &data[..]
    }

    fn locked_data_mut(&mut self) -> &mut [u8] {
        let block = self.block;
        let data = self
            .data
            .as_mut()
            .unwrap_or_else(|| panic!("block {block}: guard used after release"));
        assert!(
            data.holding(),
            "block {block}: slot lock not held by the calling thread"
        );
        &mut data[..]
    }

    fn release_inner(&mut self) {
        if let Some(data) = self.data.take() {
            assert!(
                data.holding(),
                "release: block {} not locked by the calling thread",
                self.block
            );
            drop(data);
            self.cache.drop_reference(self.slot);
        }
    }
}

impl Drop for BlockGuard<'_> {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for BlockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockGuard")
            .field("block", &self.block)
            .field("slot", &self.slot.slot_id())
            .field("valid", &self.slot.is_valid())
            .finish()
    }
}
