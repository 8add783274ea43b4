//! Configuration file support for the stress tool.
//!
//! Loads and saves run configuration from TOML files.

use std::path::{Path, PathBuf};

use anyhow::{ensure, Result};
use bcache_storage::buffer::BufferCacheConfig;
use serde::{Deserialize, Serialize};

/// Stress run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressConfig {
    /// Number of worker threads.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Operations per worker thread.
    #[serde(default = "default_ops_per_thread")]
    pub ops_per_thread: usize,

    /// Number of devices the workload spreads over.
    #[serde(default = "default_devices")]
    pub devices: u32,

    /// Blocks per device.
    #[serde(default = "default_blocks_per_device")]
    pub blocks_per_device: u32,

    /// Percentage of operations that only read the block.
    #[serde(default = "default_read_percent")]
    pub read_percent: u8,

    /// Directory for device image files. In-memory devices when unset.
    #[serde(default)]
    pub image_dir: Option<PathBuf>,

    /// Simulated latency of in-memory device transfers, in microseconds.
    #[serde(default)]
    pub disk_latency_us: u64,

    /// Seed for the workload generators.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Buffer cache geometry.
    #[serde(default)]
    pub cache: BufferCacheConfig,
}

fn default_threads() -> usize {
    4
}

fn default_ops_per_thread() -> usize {
    10_000
}

fn default_devices() -> u32 {
    2
}

fn default_blocks_per_device() -> u32 {
    64
}

fn default_read_percent() -> u8 {
    50
}

fn default_seed() -> u64 {
    42
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            ops_per_thread: default_ops_per_thread(),
            devices: default_devices(),
            blocks_per_device: default_blocks_per_device(),
            read_percent: default_read_percent(),
            image_dir: None,
            disk_latency_us: 0,
            seed: default_seed(),
            cache: BufferCacheConfig::default(),
        }
    }
}

impl StressConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Serializes configuration to TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Total number of distinct blocks the workload touches.
    pub fn total_blocks(&self) -> u64 {
        u64::from(self.devices) * u64::from(self.blocks_per_device)
    }

    /// Checks the run parameters and the cache geometry.
    pub fn validate(&self) -> Result<()> {
        self.cache
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid cache configuration: {e}"))?;
        ensure!(self.threads > 0, "threads must be > 0");
        ensure!(self.total_blocks() > 0, "workload must touch at least one block");
        ensure!(self.read_percent <= 100, "read_percent must be <= 100");
        ensure!(
            self.threads <= self.cache.num_slots,
            "threads ({}) must not exceed cache slots ({})",
            self.threads,
            self.cache.num_slots
        );
        ensure!(
            self.cache.block_size >= 8,
            "block_size must hold the 8-byte block counter"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StressConfig::default();
        assert_eq!(config.threads, 4);
        assert_eq!(config.total_blocks(), 128);
        assert!(config.image_dir.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = StressConfig::default();
        config.cache.num_slots = 8;
        config.seed = 7;

        let text = config.to_toml().unwrap();
        let parsed: StressConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.cache.num_slots, 8);
        assert_eq!(parsed.seed, 7);
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stress.toml");
        std::fs::write(&path, "threads = 2\n\n[cache]\nnum_buckets = 7\n").unwrap();

        let config = StressConfig::from_file(&path).unwrap();
        assert_eq!(config.threads, 2);
        assert_eq!(config.cache.num_buckets, 7);
        assert_eq!(config.cache.num_slots, 30);
        assert_eq!(config.ops_per_thread, 10_000);
    }

    #[test]
    fn test_validate_rejects_more_threads_than_slots() {
        let mut config = StressConfig::default();
        config.cache.num_slots = 2;
        config.threads = 3;
        assert!(config.validate().is_err());
    }
}
