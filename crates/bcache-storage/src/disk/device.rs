//! Block device trait.

use bcache_common::types::BlockId;

use super::error::DiskResult;

/// Trait for synchronous block devices.
///
/// This is the only interface the buffer cache uses to reach storage. Both
/// calls block until the transfer has finished and are issued only while
/// the caller holds the exclusive lock of the slot whose payload is passed
/// in, so an implementation never sees two concurrent transfers into the
/// same buffer.
///
/// Buffers are always exactly one block long.
pub trait BlockDevice: Send + Sync {
    /// Returns the block size in bytes.
    fn block_size(&self) -> usize;

    /// Reads the block `id` into `buf`.
    fn read_block(&self, id: BlockId, buf: &mut [u8]) -> DiskResult<()>;

    /// Writes `buf` to the block `id`.
    fn write_block(&self, id: BlockId, buf: &[u8]) -> DiskResult<()>;

    /// Flushes any device-level write buffering.
    fn sync(&self) -> DiskResult<()> {
        Ok(())
    }
}

impl<D: BlockDevice + ?Sized> BlockDevice for std::sync::Arc<D> {
    fn block_size(&self) -> usize {
        (**self).block_size()
    }

    fn read_block(&self, id: BlockId, buf: &mut [u8]) -> DiskResult<()> {
        (**self).read_block(id, buf)
    }

    fn write_block(&self, id: BlockId, buf: &[u8]) -> DiskResult<()> {
        (**self).write_block(id, buf)
    }

    fn sync(&self) -> DiskResult<()> {
        (**self).sync()
    }
}

/// Counters a device keeps about the transfers it served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    /// Completed block reads.
    pub reads: u64,
    /// Completed block writes.
    pub writes: u64,
}
