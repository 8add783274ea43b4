//! Hash buckets - the shards of the slot pool.
//!
//! A bucket lists the slots currently filed under one hash value and owns
//! the mutex that guards that list together with the bookkeeping of every
//! slot on it. The list holds slot indices only; the slots themselves live
//! in the cache's fixed array.

use parking_lot::{Mutex, MutexGuard};

use super::slot::SlotId;

/// Membership list of one bucket.
#[derive(Debug, Default)]
pub(crate) struct BucketList {
    members: Vec<SlotId>,
}

impl BucketList {
    /// Iterates over member slots.
    pub(crate) fn iter(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.members.iter().rev().copied()
    }

    /// Files `slot` under this bucket.
    pub(crate) fn insert(&mut self, slot: SlotId) {
        debug_assert!(!self.members.contains(&slot));
        self.members.push(slot);
    }

    /// Detaches `slot`; returns false if it was not a member.
    pub(crate) fn remove(&mut self, slot: SlotId) -> bool {
        match self.members.iter().position(|&s| s == slot) {
            Some(pos) => {
                self.members.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.members.len()
    }
}

/// One shard of the pool.
#[derive(Debug)]
pub(crate) struct Bucket {
    index: usize,
    list: Mutex<BucketList>,
}

pub(crate) type BucketGuard<'a> = MutexGuard<'a, BucketList>;

impl Bucket {
    pub(crate) fn new(index: usize, capacity: usize) -> Self {
        Self {
            index,
            list: Mutex::new(BucketList {
                members: Vec::with_capacity(capacity),
            }),
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Locks the bucket. Critical sections must stay short: no I/O and no
    /// sleep-lock waits while the guard is alive.
    #[inline]
    pub(crate) fn lock(&self) -> BucketGuard<'_> {
        self.list.lock()
    }
}
