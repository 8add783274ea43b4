//! Logical clock for recency markers.
//!
//! Slots are stamped when their last reference goes away. A shared counter
//! gives every stamp a distinct, strictly increasing value, so two slots
//! freed at "the same time" still order deterministically.

use std::sync::atomic::{AtomicU64, Ordering};

use super::slot::MAX_RECENCY;

/// Monotonic logical clock.
#[derive(Debug, Default)]
pub struct RecencyClock {
    counter: AtomicU64,
}

impl RecencyClock {
    /// Creates a clock reading zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current reading without advancing the clock.
    #[inline]
    pub fn now(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    /// Advances the clock and returns the new, never before issued, reading.
    #[inline]
    pub fn tick(&self) -> u64 {
        let stamp = self.counter.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert!(stamp <= MAX_RECENCY, "recency clock overflow");
        stamp
    }
}
