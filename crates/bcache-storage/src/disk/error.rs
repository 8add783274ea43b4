//! Error types for the block device layer.

use std::io;
use std::path::PathBuf;

use bcache_common::types::{BlockId, DeviceId};
use thiserror::Error;

/// Result type for device operations.
pub type DiskResult<T> = Result<T, DiskError>;

/// Errors that can occur while transferring a block to or from a device.
#[derive(Debug, Error)]
#[allow(missing_docs)] // Fields are documented by variant docs
pub enum DiskError {
    /// Standard I/O error.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// Image file could not be opened.
    #[error("cannot open device image {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    /// No device with this id is attached.
    #[error("unknown device {device}")]
    UnknownDevice { device: DeviceId },

    /// Device is already attached.
    #[error("device {device} is already attached")]
    AlreadyAttached { device: DeviceId },

    /// Block number is past the end of the device.
    #[error("block {block} out of range: device has {num_blocks} blocks")]
    OutOfRange { block: BlockId, num_blocks: u32 },

    /// Buffer length does not match the device block size.
    #[error("buffer size mismatch: block size is {expected}, buffer is {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// Short read/write (less data than expected).
    #[error("short {operation} on block {block}: expected {expected} bytes, got {actual}")]
    ShortIo {
        operation: &'static str,
        block: BlockId,
        expected: usize,
        actual: usize,
    },

    /// Failure injected by a test device.
    #[error("injected {operation} failure on block {block}")]
    Injected {
        operation: &'static str,
        block: BlockId,
    },
}

impl DiskError {
    /// Creates an UnknownDevice error.
    pub fn unknown_device(device: DeviceId) -> Self {
        Self::UnknownDevice { device }
    }

    /// Creates a SizeMismatch error.
    pub fn size_mismatch(expected: usize, actual: usize) -> Self {
        Self::SizeMismatch { expected, actual }
    }

    /// Creates a ShortIo error for reads.
    pub fn short_read(block: BlockId, expected: usize, actual: usize) -> Self {
        Self::ShortIo {
            operation: "read",
            block,
            expected,
            actual,
        }
    }

    /// Returns true if retrying the same transfer could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io { source } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            Self::Injected { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DiskError::OutOfRange {
            block: BlockId::from_raw(1, 64),
            num_blocks: 64,
        };
        assert_eq!(
            err.to_string(),
            "block 1:64 out of range: device has 64 blocks"
        );

        let err = DiskError::short_read(BlockId::from_raw(0, 2), 1024, 10);
        assert!(err.to_string().contains("short read"));
    }

    #[test]
    fn test_is_retryable() {
        let err: DiskError = io::Error::new(io::ErrorKind::Interrupted, "eintr").into();
        assert!(err.is_retryable());

        let err: DiskError = io::Error::new(io::ErrorKind::PermissionDenied, "nope").into();
        assert!(!err.is_retryable());

        assert!(!DiskError::unknown_device(DeviceId::new(3)).is_retryable());
    }
}
