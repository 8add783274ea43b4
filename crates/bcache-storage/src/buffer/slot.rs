//! Buffer slot - one pool entry that caches a single block.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use bcache_common::constants::MAX_SLOT_REFCOUNT;
use bcache_common::types::BlockId;

use super::sleeplock::SleepLock;

/// Slot identifier - index into the cache's slot array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(pub usize);

impl SlotId {
    /// Creates a new slot ID.
    #[inline]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// Returns the raw index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for SlotId {
    fn from(id: usize) -> Self {
        Self::new(id)
    }
}

const REFCOUNT_BITS: u32 = MAX_SLOT_REFCOUNT.count_ones();
const REFCOUNT_MASK: u64 = MAX_SLOT_REFCOUNT as u64;
const BOUND_BIT: u64 = 1 << REFCOUNT_BITS;
const RECENCY_SHIFT: u32 = REFCOUNT_BITS + 1;

/// Largest recency stamp a [`SlotState`] can hold.
pub const MAX_RECENCY: u64 = u64::MAX >> RECENCY_SHIFT;

/// Reference count, bound flag and recency marker of a slot, packed into
/// one word.
///
/// The eviction scan reads slots of buckets it has not locked. Publishing
/// the fields through a single atomic means the scan always sees values
/// that existed together.
///
/// Layout: refcount in the low bits, then one bit set once the slot has
/// been bound to a block, then the recency stamp.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SlotState(u64);

impl SlotState {
    /// Packs a reference count and a recency stamp for an unbound slot.
    #[inline]
    pub fn new(refcount: u32, recency: u64) -> Self {
        debug_assert!(refcount <= MAX_SLOT_REFCOUNT);
        debug_assert!(recency <= MAX_RECENCY);
        Self((recency << RECENCY_SHIFT) | (u64::from(refcount) & REFCOUNT_MASK))
    }

    /// Like [`new`](Self::new), for a slot bound to a block.
    #[inline]
    pub fn bound(refcount: u32, recency: u64) -> Self {
        Self(Self::new(refcount, recency).0 | BOUND_BIT)
    }

    /// Same bound flag, new refcount and recency.
    #[inline]
    fn with(self, refcount: u32, recency: u64) -> Self {
        Self(Self::new(refcount, recency).0 | (self.0 & BOUND_BIT))
    }

    /// Number of active holders.
    #[inline]
    pub fn refcount(self) -> u32 {
        (self.0 & REFCOUNT_MASK) as u32
    }

    /// Stamp recorded when the refcount last dropped to zero.
    #[inline]
    pub fn recency(self) -> u64 {
        self.0 >> RECENCY_SHIFT
    }

    /// Returns true once the slot has cached some block.
    #[inline]
    pub fn is_bound(self) -> bool {
        self.0 & BOUND_BIT != 0
    }

    /// Returns true if nobody references the slot.
    #[inline]
    pub fn is_free(self) -> bool {
        self.refcount() == 0
    }
}

impl fmt::Debug for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotState")
            .field("refcount", &self.refcount())
            .field("bound", &self.is_bound())
            .field("recency", &self.recency())
            .finish()
    }
}

/// A buffer slot holds at most one block in memory.
///
/// Each slot has:
/// - Bookkeeping (identity, refcount, recency) owned by its current bucket;
///   it is written only under that bucket's mutex but may be read anywhere
/// - The index of the bucket it is filed under, changed only while both the
///   old and the new bucket are locked
/// - A validity flag and the payload, both owned by the slot's sleep lock
pub struct BufferSlot {
    slot_id: SlotId,
    identity: AtomicU64,
    state: AtomicU64,
    bucket: AtomicUsize,
    valid: AtomicBool,
    pub(crate) data: SleepLock<Box<[u8]>>,
}

impl BufferSlot {
    /// Creates an empty slot filed under `bucket`.
    pub fn new(slot_id: SlotId, block_size: usize, bucket: usize, recency: u64) -> Self {
        Self {
            slot_id,
            identity: AtomicU64::new(0),
            state: AtomicU64::new(SlotState::new(0, recency).0),
            bucket: AtomicUsize::new(bucket),
            valid: AtomicBool::new(false),
            data: SleepLock::new(vec![0u8; block_size].into_boxed_slice(), "buffer"),
        }
    }

    /// Returns the slot ID.
    #[inline]
    pub fn slot_id(&self) -> SlotId {
        self.slot_id
    }

    /// Returns the block cached in this slot, `None` if it never held one.
    #[inline]
    pub fn identity(&self) -> Option<BlockId> {
        self.state()
            .is_bound()
            .then(|| BlockId::from_u64(self.identity.load(Ordering::Acquire)))
    }

    /// Returns true if this slot is bound to `id`.
    #[inline]
    pub fn holds(&self, id: BlockId) -> bool {
        self.identity() == Some(id)
    }

    /// Stores the identity word. It takes effect once a bound state is
    /// published with [`set_state`](Self::set_state).
    #[inline]
    pub(crate) fn set_identity(&self, id: BlockId) {
        self.identity.store(id.as_u64(), Ordering::Release);
    }

    /// Returns the packed refcount/recency pair.
    #[inline]
    pub fn state(&self) -> SlotState {
        SlotState(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_state(&self, state: SlotState) {
        self.state.store(state.0, Ordering::Release);
    }

    /// Returns the current reference count.
    #[inline]
    pub fn refcount(&self) -> u32 {
        self.state().refcount()
    }

    /// Returns the recency stamp.
    #[inline]
    pub fn recency(&self) -> u64 {
        self.state().recency()
    }

    /// Returns the index of the bucket this slot is filed under.
    #[inline]
    pub fn bucket(&self) -> usize {
        self.bucket.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_bucket(&self, bucket: usize) {
        self.bucket.store(bucket, Ordering::Release);
    }

    /// Returns true if the payload reflects the device content.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::Release);
    }

    /// Adds one reference. Caller holds the slot's bucket mutex.
    ///
    /// Returns `None`, leaving the slot untouched, if the count is already
    /// at `MAX_SLOT_REFCOUNT`.
    pub(crate) fn retain(&self) -> Option<u32> {
        let state = self.state();
        if state.refcount() >= MAX_SLOT_REFCOUNT {
            return None;
        }
        let refcount = state.refcount() + 1;
        self.set_state(state.with(refcount, state.recency()));
        Some(refcount)
    }

    /// Drops one reference, stamping `now()` if it was the last one.
    /// Caller holds the slot's bucket mutex.
    ///
    /// Returns `None` if the slot was not referenced.
    pub(crate) fn release_ref(&self, now: impl FnOnce() -> u64) -> Option<u32> {
        let state = self.state();
        let refcount = state.refcount().checked_sub(1)?;
        let recency = if refcount == 0 { now() } else { state.recency() };
        self.set_state(state.with(refcount, recency));
        Some(refcount)
    }
}

impl fmt::Debug for BufferSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferSlot")
            .field("slot_id", &self.slot_id)
            .field("identity", &self.identity())
            .field("bucket", &self.bucket())
            .field("refcount", &self.refcount())
            .field("recency", &self.recency())
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_creation() {
        let slot = BufferSlot::new(SlotId::new(3), 512, 1, 0);
        assert_eq!(slot.slot_id().index(), 3);
        assert_eq!(slot.identity(), None);
        assert_eq!(slot.bucket(), 1);
        assert_eq!(slot.refcount(), 0);
        assert!(!slot.is_valid());
        assert_eq!(slot.data.lock().len(), 512);
    }

    #[test]
    fn test_state_packing() {
        let state = SlotState::new(MAX_SLOT_REFCOUNT, MAX_RECENCY);
        assert_eq!(state.refcount(), MAX_SLOT_REFCOUNT);
        assert_eq!(state.recency(), MAX_RECENCY);

        assert!(!state.is_bound());

        let state = SlotState::new(0, 17);
        assert!(state.is_free());
        assert_eq!(state.recency(), 17);

        let state = SlotState::bound(MAX_SLOT_REFCOUNT, MAX_RECENCY);
        assert!(state.is_bound());
        assert_eq!(state.refcount(), MAX_SLOT_REFCOUNT);
        assert_eq!(state.recency(), MAX_RECENCY);
    }

    #[test]
    fn test_retain_release() {
        let slot = BufferSlot::new(SlotId::new(0), 64, 0, 5);

        assert_eq!(slot.retain(), Some(1));
        assert_eq!(slot.retain(), Some(2));
        assert_eq!(slot.recency(), 5);

        assert_eq!(slot.release_ref(|| 99), Some(1));
        assert_eq!(slot.recency(), 5, "recency only moves when the slot frees");
        assert_eq!(slot.release_ref(|| 42), Some(0));
        assert_eq!(slot.recency(), 42);

        assert_eq!(slot.release_ref(|| 7), None);
        assert_eq!(slot.refcount(), 0);
        assert_eq!(slot.recency(), 42);
    }

    #[test]
    fn test_retain_at_limit() {
        let slot = BufferSlot::new(SlotId::new(0), 64, 0, 0);
        let id = BlockId::from_raw(2, 3);
        slot.set_identity(id);
        slot.set_state(SlotState::bound(MAX_SLOT_REFCOUNT - 1, 8));

        assert_eq!(slot.retain(), Some(MAX_SLOT_REFCOUNT));
        assert_eq!(slot.retain(), None);
        assert_eq!(slot.refcount(), MAX_SLOT_REFCOUNT);
        assert_eq!(slot.recency(), 8);
        assert!(slot.holds(id), "a refused retain keeps the binding");

        assert_eq!(slot.release_ref(|| 9), Some(MAX_SLOT_REFCOUNT - 1));
        assert!(slot.holds(id));
    }

    #[test]
    fn test_identity() {
        let slot = BufferSlot::new(SlotId::new(0), 64, 0, 0);
        let id = BlockId::from_raw(0, 0);
        assert!(!slot.holds(id), "an empty slot matches no block");

        slot.set_identity(id);
        assert!(!slot.holds(id), "identity needs a bound state");
        slot.set_state(SlotState::bound(1, 0));
        assert!(slot.holds(id));
        assert_eq!(slot.identity(), Some(id));
        assert!(!slot.holds(BlockId::from_raw(1, 0)));
    }

    #[test]
    fn test_every_identity_is_usable() {
        let slot = BufferSlot::new(SlotId::new(0), 64, 0, 0);
        let id = BlockId::from_raw(u32::MAX, u32::MAX);
        assert_eq!(slot.identity(), None);

        slot.set_identity(id);
        slot.set_state(SlotState::bound(0, 1));
        assert_eq!(slot.identity(), Some(id));
        assert!(slot.holds(id));
    }
}
