//! System-wide constants for bcache.
//!
//! Default pool geometry and the limits enforced when validating a
//! configuration.

// =============================================================================
// Block Constants
// =============================================================================

/// Default block size in bytes (1 KB).
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

/// Maximum block size in bytes (64 KB).
pub const MAX_BLOCK_SIZE: usize = 64 * 1024;

// =============================================================================
// Buffer Cache Constants
// =============================================================================

/// Default number of buffer slots in the pool.
///
/// Sized to hold three times the largest number of blocks a single
/// filesystem operation is expected to touch.
pub const DEFAULT_NUM_SLOTS: usize = 30;

/// Default number of hash buckets.
///
/// A prime keeps consecutive block numbers spread across buckets.
pub const DEFAULT_NUM_BUCKETS: usize = 13;

/// Maximum number of buffer slots in one pool.
pub const MAX_NUM_SLOTS: usize = 1 << 20;

/// Maximum number of concurrent holders of a single slot.
///
/// The reference count shares a packed word with the recency marker; this is
/// the largest count its field can represent.
pub const MAX_SLOT_REFCOUNT: u32 = (1 << 20) - 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_constants() {
        assert!(DEFAULT_BLOCK_SIZE > 0);
        assert!(DEFAULT_BLOCK_SIZE <= MAX_BLOCK_SIZE);
        assert!(MAX_BLOCK_SIZE.is_power_of_two());
    }

    #[test]
    fn test_pool_constants() {
        assert!(DEFAULT_NUM_BUCKETS > 0);
        assert!(DEFAULT_NUM_SLOTS >= DEFAULT_NUM_BUCKETS);
        assert!(DEFAULT_NUM_SLOTS <= MAX_NUM_SLOTS);
        assert!(MAX_SLOT_REFCOUNT > 0);
    }
}
