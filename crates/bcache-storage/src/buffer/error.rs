//! Buffer cache errors.

use bcache_common::types::BlockId;
use thiserror::Error;

use super::slot::SlotId;
use crate::disk::DiskError;

/// Result type for buffer cache operations.
pub type BufferResult<T> = Result<T, BufferError>;

/// Errors that can occur during buffer cache operations.
#[derive(Debug, Error)]
#[allow(missing_docs)] // Fields are documented by variant docs
pub enum BufferError {
    /// Every slot is referenced; nothing can be evicted.
    #[error("no free buffer slots, all {num_slots} slots are referenced")]
    NoFreeSlots { num_slots: usize },

    /// Waiting for a slot's exclusive lock exceeded the configured timeout.
    #[error("timed out after {timeout_ms} ms waiting for the lock of block {block}")]
    LockTimeout { block: BlockId, timeout_ms: u64 },

    /// Unpin of a slot whose reference count is already zero.
    #[error("slot {slot} is not pinned")]
    NotPinned { slot: SlotId },

    /// The slot behind a `SlotRef` has been rebound to another block.
    #[error("slot {slot} no longer caches block {expected}")]
    StaleSlot { slot: SlotId, expected: BlockId },

    /// A slot already carries the largest reference count it can record.
    #[error("slot {slot} reference count is at its limit")]
    RefcountOverflow { slot: SlotId },

    /// Device transfer failed.
    #[error("disk error: {0}")]
    Disk(#[from] DiskError),

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Internal bookkeeping is inconsistent.
    #[error("buffer cache invariant violated: {reason}")]
    InvariantViolation { reason: String },
}

impl BufferError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invariant violation error.
    pub fn invariant(reason: impl Into<String>) -> Self {
        Self::InvariantViolation {
            reason: reason.into(),
        }
    }

    /// Returns true if this is a transient error that can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::LockTimeout { .. } => true,
            Self::Disk(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if this is a fatal error.
    ///
    /// The pool is statically sized, so exhaustion is not something a caller
    /// can wait out; neither is broken bookkeeping.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NoFreeSlots { .. } | Self::InvariantViolation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_fatal() {
        assert!(BufferError::NoFreeSlots { num_slots: 4 }.is_fatal());
        assert!(BufferError::invariant("slot 3 filed twice").is_fatal());
        assert!(!BufferError::config("bad").is_fatal());
    }

    #[test]
    fn test_is_retryable() {
        let timeout = BufferError::LockTimeout {
            block: BlockId::from_raw(0, 1),
            timeout_ms: 10,
        };
        assert!(timeout.is_retryable());
        assert!(!timeout.is_fatal());

        assert!(!BufferError::NoFreeSlots { num_slots: 1 }.is_retryable());
        assert!(!BufferError::NotPinned {
            slot: SlotId::new(0)
        }
        .is_retryable());
    }

    #[test]
    fn test_disk_error_conversion() {
        let err: BufferError = DiskError::size_mismatch(1024, 8).into();
        assert!(matches!(err, BufferError::Disk(_)));
        assert!(err.to_string().starts_with("disk error"));
    }
}
