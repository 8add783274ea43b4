//! File-backed block device.
//!
//! Each attached device is one image file holding `num_blocks` consecutive
//! blocks. Transfers seek to `block_no * block_size` and move exactly one
//! block under the image's mutex.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bcache_common::types::{BlockId, DeviceId};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::device::{BlockDevice, DeviceStats};
use super::error::{DiskError, DiskResult};

/// One attached image file.
struct DeviceImage {
    file: Mutex<File>,
    path: PathBuf,
    num_blocks: u32,
}

/// Block device backed by image files, one per device id.
pub struct FileDisk {
    block_size: usize,
    devices: RwLock<HashMap<DeviceId, DeviceImage>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl FileDisk {
    /// Creates a disk with no devices attached.
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            devices: RwLock::new(HashMap::new()),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Attaches `path` as `device`, creating the image if needed.
    ///
    /// The image is extended with zeros to hold `num_blocks` blocks; an
    /// existing larger image keeps its size and content.
    pub fn attach(
        &self,
        device: DeviceId,
        path: impl AsRef<Path>,
        num_blocks: u32,
    ) -> DiskResult<()> {
        let path = path.as_ref().to_path_buf();
        let mut devices = self.devices.write();
        if devices.contains_key(&device) {
            return Err(DiskError::AlreadyAttached { device });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| DiskError::Open {
                path: path.clone(),
                source,
            })?;

        let wanted = u64::from(num_blocks) * self.block_size as u64;
        if file.metadata()?.len() < wanted {
            file.set_len(wanted)?;
        }

        debug!(%device, path = %path.display(), num_blocks, "attached device image");
        devices.insert(
            device,
            DeviceImage {
                file: Mutex::new(file),
                path,
                num_blocks,
            },
        );
        Ok(())
    }

    /// Returns the image path of `device`.
    pub fn path_of(&self, device: DeviceId) -> Option<PathBuf> {
        self.devices.read().get(&device).map(|d| d.path.clone())
    }

    /// Returns the transfer counters.
    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }

    /// Runs `f` on the image file for `id` positioned at the block's offset.
    fn with_block<T>(
        &self,
        id: BlockId,
        buf_len: usize,
        f: impl FnOnce(&mut File) -> std::io::Result<T>,
    ) -> DiskResult<T> {
        if buf_len != self.block_size {
            return Err(DiskError::size_mismatch(self.block_size, buf_len));
        }

        let devices = self.devices.read();
        let image = devices
            .get(&id.device())
            .ok_or_else(|| DiskError::unknown_device(id.device()))?;
        if id.block_no().as_u32() >= image.num_blocks {
            return Err(DiskError::OutOfRange {
                block: id,
                num_blocks: image.num_blocks,
            });
        }

        let mut file = image.file.lock();
        file.seek(SeekFrom::Start(id.block_no().byte_offset(self.block_size)))?;
        Ok(f(&mut *file)?)
    }
}

impl BlockDevice for FileDisk {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read_block(&self, id: BlockId, buf: &mut [u8]) -> DiskResult<()> {
        let expected = buf.len();
        let n = self.with_block(id, expected, |file| {
            let mut total = 0;
            while total < buf.len() {
                let n = file.read(&mut buf[total..])?;
                if n == 0 {
                    break;
                }
                total += n;
            }
            Ok(total)
        })?;
        if n != expected {
            return Err(DiskError::short_read(id, expected, n));
        }
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_block(&self, id: BlockId, buf: &[u8]) -> DiskResult<()> {
        self.with_block(id, buf.len(), |file| file.write_all(buf))?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn sync(&self) -> DiskResult<()> {
        for image in self.devices.read().values() {
            image.file.lock().sync_data()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for FileDisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDisk")
            .field("block_size", &self.block_size)
            .field("devices", &self.devices.read().len())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_attach_sizes_image() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dev0.img");

        let disk = FileDisk::new(1024);
        disk.attach(DeviceId::new(0), &path, 16).unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 16 * 1024);
        assert_eq!(disk.path_of(DeviceId::new(0)), Some(path));
    }

    #[test]
    fn test_attach_twice_fails() {
        let dir = tempdir().unwrap();
        let disk = FileDisk::new(1024);
        disk.attach(DeviceId::new(0), dir.path().join("a.img"), 4)
            .unwrap();
        let err = disk
            .attach(DeviceId::new(0), dir.path().join("b.img"), 4)
            .unwrap_err();
        assert!(matches!(err, DiskError::AlreadyAttached { .. }));
    }

    #[test]
    fn test_write_read_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dev1.img");
        let id = BlockId::from_raw(1, 5);

        {
            let disk = FileDisk::new(1024);
            disk.attach(DeviceId::new(1), &path, 8).unwrap();
            disk.write_block(id, &[0x5Au8; 1024]).unwrap();
            disk.sync().unwrap();
            assert_eq!(disk.stats().writes, 1);
        }

        let disk = FileDisk::new(1024);
        disk.attach(DeviceId::new(1), &path, 8).unwrap();
        let mut buf = vec![0u8; 1024];
        disk.read_block(id, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0x5A));

        disk.read_block(BlockId::from_raw(1, 4), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(disk.stats().reads, 2);
    }

    #[test]
    fn test_out_of_range_and_unknown_device() {
        let dir = tempdir().unwrap();
        let disk = FileDisk::new(1024);
        disk.attach(DeviceId::new(0), dir.path().join("dev0.img"), 2)
            .unwrap();

        let mut buf = vec![0u8; 1024];
        let err = disk
            .read_block(BlockId::from_raw(0, 2), &mut buf)
            .unwrap_err();
        assert!(matches!(err, DiskError::OutOfRange { num_blocks: 2, .. }));

        let err = disk
            .write_block(BlockId::from_raw(9, 0), &buf)
            .unwrap_err();
        assert!(matches!(err, DiskError::UnknownDevice { .. }));
    }
}
