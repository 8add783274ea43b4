//! Buffer cache over image files.

use std::sync::Arc;
use std::thread;

use bcache_common::types::{BlockId, DeviceId};
use bcache_storage::buffer::{BufferCache, BufferCacheConfig, BufferError};
use bcache_storage::disk::{BlockDevice, DiskError, FileDisk};
use bcache_test::utils::{init_test_logging, pattern, TEST_BLOCK_SIZE};
use tempfile::{tempdir, TempDir};

const BLOCKS_PER_DEVICE: u32 = 32;

fn open(dir: &TempDir, devices: u32, slots: usize) -> (Arc<FileDisk>, BufferCache) {
    init_test_logging();
    let disk = Arc::new(FileDisk::new(TEST_BLOCK_SIZE));
    for n in 1..=devices {
        disk.attach(
            DeviceId::new(n),
            dir.path().join(format!("dev{n}.img")),
            BLOCKS_PER_DEVICE,
        )
        .unwrap();
    }
    let config = BufferCacheConfig::new(slots)
        .with_buckets(5)
        .with_block_size(TEST_BLOCK_SIZE);
    let cache = BufferCache::new(config, disk.clone()).unwrap();
    (disk, cache)
}

#[test]
fn test_contents_survive_reopen() {
    let dir = tempdir().unwrap();
    let ids: Vec<BlockId> = (0..BLOCKS_PER_DEVICE)
        .flat_map(|b| [BlockId::from_raw(1, b), BlockId::from_raw(2, b)])
        .collect();

    {
        let (disk, cache) = open(&dir, 2, 8);
        for &id in &ids {
            let mut guard = cache.acquire(id).unwrap();
            guard.data_mut().copy_from_slice(&pattern(id));
            guard.commit().unwrap();
        }
        disk.sync().unwrap();
        assert_eq!(disk.stats().writes, ids.len() as u64);
    }

    let (disk, cache) = open(&dir, 2, 8);
    for &id in &ids {
        let guard = cache.acquire(id).unwrap();
        assert_eq!(guard.data(), &pattern(id)[..], "block {id}");
    }
    assert_eq!(disk.stats().reads, ids.len() as u64);
}

#[test]
fn test_concurrent_writers_on_images() {
    let dir = tempdir().unwrap();
    let (_disk, cache) = open(&dir, 2, 6);

    thread::scope(|s| {
        for device in 1..=2u32 {
            for half in 0..2u32 {
                let cache = &cache;
                s.spawn(move || {
                    for b in (half..BLOCKS_PER_DEVICE).step_by(2) {
                        let id = BlockId::from_raw(device, b);
                        let mut guard = cache.acquire(id).unwrap();
                        guard.data_mut().copy_from_slice(&pattern(id));
                        guard.commit().unwrap();
                    }
                });
            }
        }
    });
    cache.check_invariants().unwrap();

    drop(cache);
    let (_disk, cache) = open(&dir, 2, 6);
    for device in 1..=2u32 {
        for b in 0..BLOCKS_PER_DEVICE {
            let id = BlockId::from_raw(device, b);
            assert_eq!(cache.acquire(id).unwrap().data(), &pattern(id)[..]);
        }
    }
}

#[test]
fn test_out_of_range_block() {
    let dir = tempdir().unwrap();
    let (_disk, cache) = open(&dir, 1, 4);

    let id = BlockId::from_raw(1, BLOCKS_PER_DEVICE);
    let err = cache.acquire(id).unwrap_err();
    assert!(matches!(
        err,
        BufferError::Disk(DiskError::OutOfRange { num_blocks: BLOCKS_PER_DEVICE, .. })
    ));
    assert!(!err.is_retryable());
    assert_eq!(cache.stats().referenced_slots, 0);
    cache.check_invariants().unwrap();
}

#[test]
fn test_unknown_device() {
    let dir = tempdir().unwrap();
    let (_disk, cache) = open(&dir, 1, 4);

    let err = cache.acquire(BlockId::from_raw(9, 0)).unwrap_err();
    assert!(matches!(
        err,
        BufferError::Disk(DiskError::UnknownDevice { .. })
    ));

    // The cache is still usable.
    let id = BlockId::from_raw(1, 0);
    assert!(cache.acquire(id).unwrap().is_valid());
}
