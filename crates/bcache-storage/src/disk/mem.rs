//! In-memory block device.
//!
//! Blocks live in a hash map keyed by [`BlockId`]; blocks that were never
//! written read back as zeros. The device counts every transfer, can simulate
//! per-transfer latency, and can be told to fail reads or writes, which makes
//! it the backend of choice for tests and for the stress tool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bcache_common::types::BlockId;
use parking_lot::RwLock;

use super::device::{BlockDevice, DeviceStats};
use super::error::{DiskError, DiskResult};

#[derive(Debug)]
struct MemBlock {
    data: Box<[u8]>,
    reads: u64,
    writes: u64,
}

impl MemBlock {
    fn zeroed(block_size: usize) -> Self {
        Self {
            data: vec![0u8; block_size].into_boxed_slice(),
            reads: 0,
            writes: 0,
        }
    }
}

/// In-memory block device.
#[derive(Debug)]
pub struct MemDisk {
    block_size: usize,
    blocks: RwLock<HashMap<BlockId, MemBlock>>,
    latency: Option<Duration>,
    reads: AtomicU64,
    writes: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemDisk {
    /// Creates an empty device with the given block size.
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            blocks: RwLock::new(HashMap::new()),
            latency: None,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Makes every transfer sleep for `latency` before completing.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Stores `data` as the content of `id` without counting a write.
    ///
    /// Shorter data is zero-padded.
    pub fn preload(&self, id: BlockId, data: &[u8]) {
        let mut block = MemBlock::zeroed(self.block_size);
        let len = data.len().min(self.block_size);
        block.data[..len].copy_from_slice(&data[..len]);
        self.blocks.write().insert(id, block);
    }

    /// Returns a copy of the stored content of `id`, if it was ever written
    /// or read.
    pub fn snapshot(&self, id: BlockId) -> Option<Vec<u8>> {
        self.blocks.read().get(&id).map(|b| b.data.to_vec())
    }

    /// Makes subsequent reads fail (or succeed again).
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Release);
    }

    /// Makes subsequent writes fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    /// Returns the transfer counters.
    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }

    /// Returns how many times `id` was read from this device.
    pub fn reads_of(&self, id: BlockId) -> u64 {
        self.blocks.read().get(&id).map_or(0, |b| b.reads)
    }

    /// Returns how many times `id` was written to this device.
    pub fn writes_of(&self, id: BlockId) -> u64 {
        self.blocks.read().get(&id).map_or(0, |b| b.writes)
    }

    fn check_len(&self, len: usize) -> DiskResult<()> {
        if len != self.block_size {
            return Err(DiskError::size_mismatch(self.block_size, len));
        }
        Ok(())
    }

    fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
    }
}

impl BlockDevice for MemDisk {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read_block(&self, id: BlockId, buf: &mut [u8]) -> DiskResult<()> {
        self.check_len(buf.len())?;
        if self.fail_reads.load(Ordering::Acquire) {
            return Err(DiskError::Injected {
                operation: "read",
                block: id,
            });
        }
        self.simulate_latency();

        let mut blocks = self.blocks.write();
        let block = blocks
            .entry(id)
            .or_insert_with(|| MemBlock::zeroed(self.block_size));
        buf.copy_from_slice(&block.data);
        block.reads += 1;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_block(&self, id: BlockId, buf: &[u8]) -> DiskResult<()> {
        self.check_len(buf.len())?;
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(DiskError::Injected {
                operation: "write",
                block: id,
            });
        }
        self.simulate_latency();

        let mut blocks = self.blocks.write();
        let block = blocks
            .entry(id)
            .or_insert_with(|| MemBlock::zeroed(self.block_size));
        block.data.copy_from_slice(buf);
        block.writes += 1;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwritten_block_reads_zeros() {
        let disk = MemDisk::new(512);
        let mut buf = vec![0xAAu8; 512];
        disk.read_block(BlockId::from_raw(0, 9), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(disk.stats(), DeviceStats { reads: 1, writes: 0 });
    }

    #[test]
    fn test_write_then_read() {
        let disk = MemDisk::new(512);
        let id = BlockId::from_raw(1, 3);

        let data = vec![7u8; 512];
        disk.write_block(id, &data).unwrap();

        let mut buf = vec![0u8; 512];
        disk.read_block(id, &mut buf).unwrap();
        assert_eq!(buf, data);
        assert_eq!(disk.reads_of(id), 1);
        assert_eq!(disk.writes_of(id), 1);
    }

    #[test]
    fn test_preload_is_not_counted() {
        let disk = MemDisk::new(512);
        let id = BlockId::from_raw(0, 1);
        disk.preload(id, b"hello");

        let snap = disk.snapshot(id).unwrap();
        assert_eq!(&snap[..5], b"hello");
        assert!(snap[5..].iter().all(|&b| b == 0));
        assert_eq!(disk.stats(), DeviceStats::default());
    }

    #[test]
    fn test_size_mismatch() {
        let disk = MemDisk::new(512);
        let mut buf = vec![0u8; 100];
        let err = disk
            .read_block(BlockId::from_raw(0, 0), &mut buf)
            .unwrap_err();
        assert!(matches!(
            err,
            DiskError::SizeMismatch {
                expected: 512,
                actual: 100
            }
        ));
    }

    #[test]
    fn test_fault_injection() {
        let disk = MemDisk::new(512);
        let id = BlockId::from_raw(0, 0);
        let mut buf = vec![0u8; 512];

        disk.set_fail_reads(true);
        assert!(disk.read_block(id, &mut buf).is_err());
        disk.set_fail_reads(false);
        assert!(disk.read_block(id, &mut buf).is_ok());

        disk.set_fail_writes(true);
        let err = disk.write_block(id, &buf).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(disk.stats().writes, 0);
    }
}
