//! Concurrent acquire/modify/commit/release workload.
//!
//! Every block carries a little-endian `u64` counter in its first eight
//! bytes. Writer operations bump the counter under the block's lock and
//! commit it; readers and the final pass check that each counter equals its
//! starting value plus the number of bumps the workers recorded for it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use bcache_common::types::BlockId;
use bcache_storage::buffer::{BlockGuard, BufferCache};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::config::StressConfig;

/// Outcome of a run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Operations that only read their block.
    pub read_ops: u64,
    /// Operations that bumped and committed their block.
    pub write_ops: u64,
    /// Wall time of the concurrent phase.
    pub elapsed: Duration,
    /// Blocks whose counter disagreed with the recorded bumps.
    pub mismatches: u64,
}

impl RunReport {
    /// Operations per second over the concurrent phase.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            (self.read_ops + self.write_ops) as f64 / secs
        }
    }
}

/// Maps a workload block index onto a device/block pair. Devices are
/// numbered from 1.
pub fn block_at(config: &StressConfig, index: u64) -> BlockId {
    let per_device = u64::from(config.blocks_per_device);
    let device = (index / per_device) as u32 + 1;
    let block = (index % per_device) as u32;
    BlockId::from_raw(device, block)
}

fn counter(guard: &BlockGuard<'_>) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&guard.data()[..8]);
    u64::from_le_bytes(bytes)
}

/// Runs the workload and verifies the result.
pub fn run(cache: &BufferCache, config: &StressConfig) -> Result<RunReport> {
    let total = config.total_blocks();
    let expected = baseline(cache, config)?;
    let read_ops = AtomicU64::new(0);
    let write_ops = AtomicU64::new(0);

    info!(
        threads = config.threads,
        ops_per_thread = config.ops_per_thread,
        blocks = total,
        "starting workload"
    );

    let start = Instant::now();
    thread::scope(|s| -> Result<()> {
        let workers: Vec<_> = (0..config.threads)
            .map(|worker| {
                let expected = &expected;
                let read_ops = &read_ops;
                let write_ops = &write_ops;
                s.spawn(move || -> Result<()> {
                    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(worker as u64));
                    for _ in 0..config.ops_per_thread {
                        let index = rng.gen_range(0..total);
                        let id = block_at(config, index);
                        let mut guard = cache.acquire(id)?;

                        if rng.gen_range(0..100u8) < config.read_percent {
                            // Bumps happen under the lock, so a locked reader
                            // sees exactly the recorded count.
                            let seen = counter(&guard);
                            let want = expected[index as usize].load(Ordering::Relaxed);
                            if seen != want {
                                bail!("block {id}: counter {seen}, expected {want}");
                            }
                            read_ops.fetch_add(1, Ordering::Relaxed);
                        } else {
                            let next = counter(&guard) + 1;
                            guard.data_mut()[..8].copy_from_slice(&next.to_le_bytes());
                            guard.commit()?;
                            expected[index as usize].fetch_add(1, Ordering::Relaxed);
                            write_ops.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    debug!(worker, "worker finished");
                    Ok(())
                })
            })
            .collect();

        for worker in workers {
            worker
                .join()
                .map_err(|_| anyhow!("worker thread panicked"))??;
        }
        Ok(())
    })?;
    let elapsed = start.elapsed();

    cache.check_invariants()?;
    let mismatches = verify(cache, config, &expected)?;

    Ok(RunReport {
        read_ops: read_ops.into_inner(),
        write_ops: write_ops.into_inner(),
        elapsed,
        mismatches,
    })
}

/// Reads the starting counter of every block. Image files may carry
/// counts from an earlier run.
fn baseline(cache: &BufferCache, config: &StressConfig) -> Result<Vec<AtomicU64>> {
    (0..config.total_blocks())
        .map(|index| {
            let guard = cache.acquire(block_at(config, index))?;
            Ok(AtomicU64::new(counter(&guard)))
        })
        .collect()
}

/// Re-reads every block and compares its counter with the recorded bumps.
fn verify(cache: &BufferCache, config: &StressConfig, expected: &[AtomicU64]) -> Result<u64> {
    let mut mismatches = 0;
    for (index, want) in expected.iter().enumerate() {
        let id = block_at(config, index as u64);
        let want = want.load(Ordering::Relaxed);
        let got = counter(&cache.acquire(id)?);
        if got != want {
            warn!(block = %id, expected = want, actual = got, "block counter mismatch");
            mismatches += 1;
        }
    }
    if cache.stats().referenced_slots != 0 {
        bail!("slots still referenced after the run");
    }
    Ok(mismatches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcache_storage::buffer::BufferCacheConfig;
    use bcache_common::types::DeviceId;
    use bcache_storage::disk::{FileDisk, MemDisk};
    use std::sync::Arc;

    fn small_config() -> StressConfig {
        StressConfig {
            threads: 4,
            ops_per_thread: 500,
            devices: 2,
            blocks_per_device: 10,
            cache: BufferCacheConfig::new(6).with_buckets(3).with_block_size(64),
            ..StressConfig::default()
        }
    }

    #[test]
    fn test_block_at() {
        let config = small_config();
        assert_eq!(block_at(&config, 0), BlockId::from_raw(1, 0));
        assert_eq!(block_at(&config, 9), BlockId::from_raw(1, 9));
        assert_eq!(block_at(&config, 10), BlockId::from_raw(2, 0));
    }

    #[test]
    fn test_run_verifies() {
        let config = small_config();
        let disk = Arc::new(MemDisk::new(64));
        let cache = BufferCache::new(config.cache.clone(), disk.clone()).unwrap();

        let report = run(&cache, &config).unwrap();
        assert_eq!(report.read_ops + report.write_ops, 2000);
        assert_eq!(report.mismatches, 0);
        assert_eq!(disk.stats().writes, report.write_ops);
    }

    #[test]
    fn test_rerun_on_existing_images() {
        let dir = tempfile::tempdir().unwrap();
        let config = StressConfig {
            ops_per_thread: 200,
            read_percent: 20,
            ..small_config()
        };

        for _ in 0..2 {
            let disk = FileDisk::new(64);
            for n in 1..=config.devices {
                disk.attach(DeviceId::new(n), dir.path().join(format!("dev{n}.img")), 10)
                    .unwrap();
            }
            let cache = BufferCache::new(config.cache.clone(), Arc::new(disk)).unwrap();
            let report = run(&cache, &config).unwrap();
            assert_eq!(report.mismatches, 0);
        }
    }
}
