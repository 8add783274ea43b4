//! bcache stress tool
//!
//! Drives a buffer cache with many threads doing acquire/modify/commit/
//! release on random blocks, then checks that no update was lost and that
//! the cache bookkeeping is intact.
//!
//! # Usage
//!
//! ```bash
//! # Default run against in-memory devices
//! bcache
//!
//! # Small pool, heavy contention
//! bcache --slots 8 --buckets 3 --threads 8 --blocks-per-device 16
//!
//! # Device images on disk
//! bcache --image-dir /tmp/bcache-images
//!
//! # Use configuration file
//! bcache --config stress.toml
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bcache_common::types::DeviceId;
use bcache_storage::buffer::BufferCache;
use bcache_storage::disk::{BlockDevice, FileDisk, MemDisk};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod workload;

use config::StressConfig;

/// bcache stress tool
#[derive(Parser, Debug)]
#[command(
    name = "bcache",
    version,
    about = "Stress test for the bcache buffer cache",
    long_about = "Runs a concurrent acquire/modify/commit/release workload against a \
                  sharded buffer cache\nand verifies every block afterwards."
)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of cache slots
    #[arg(long, env = "BCACHE_SLOTS")]
    slots: Option<usize>,

    /// Number of hash buckets
    #[arg(long, env = "BCACHE_BUCKETS")]
    buckets: Option<usize>,

    /// Block size in bytes
    #[arg(long, env = "BCACHE_BLOCK_SIZE")]
    block_size: Option<usize>,

    /// Give up waiting for a block lock after this many milliseconds
    #[arg(long, value_name = "MS")]
    lock_timeout_ms: Option<u64>,

    /// Number of worker threads
    #[arg(short = 't', long, env = "BCACHE_THREADS")]
    threads: Option<usize>,

    /// Operations per worker thread
    #[arg(short = 'n', long)]
    ops: Option<usize>,

    /// Number of devices
    #[arg(long)]
    devices: Option<u32>,

    /// Blocks per device
    #[arg(long)]
    blocks_per_device: Option<u32>,

    /// Percentage of read-only operations
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    read_percent: Option<u8>,

    /// Keep device images in this directory instead of memory
    #[arg(short = 'd', long, value_name = "DIR", env = "BCACHE_IMAGE_DIR")]
    image_dir: Option<PathBuf>,

    /// Simulated in-memory device latency in microseconds
    #[arg(long, value_name = "US")]
    disk_latency_us: Option<u64>,

    /// Workload seed
    #[arg(long)]
    seed: Option<u64>,

    /// Enable verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", env = "BCACHE_LOG_LEVEL")]
    log_level: String,

    /// Print configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<bool> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;
    if args.print_config {
        println!("{}", config.to_toml()?);
        return Ok(true);
    }
    config.validate()?;

    let device = open_device(&config)?;
    let cache = BufferCache::new(config.cache.clone(), Arc::clone(&device))
        .context("Failed to create buffer cache")?;

    let report = workload::run(&cache, &config)?;
    device.sync().context("Failed to sync device")?;
    let stats = cache.stats();

    info!("Run finished:");
    info!("  Operations: {} read, {} write", report.read_ops, report.write_ops);
    info!("  Elapsed: {:.3} s", report.elapsed.as_secs_f64());
    info!("  Throughput: {:.0} ops/s", report.throughput());
    info!("  Lookups: {} ({:.1}% hits)", stats.lookups, stats.hit_ratio() * 100.0);
    info!("  Evictions: {}, migrations: {}", stats.evictions, stats.migrations);
    info!("  Device reads: {}, writes: {}", stats.reads, stats.writes);
    info!("  Lock timeouts: {}", stats.lock_timeouts);

    if report.mismatches > 0 {
        error!("{} blocks lost updates", report.mismatches);
        return Ok(false);
    }
    info!("All {} blocks verified", config.total_blocks());
    Ok(true)
}

fn init_logging(args: &Args) {
    let level = if args.verbose {
        "debug"
    } else {
        args.log_level.as_str()
    };

    let filter = EnvFilter::try_new(format!(
        "bcache={level},bcache_cli={level},bcache_storage={level}"
    ))
    .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn load_config(args: &Args) -> Result<StressConfig> {
    // Start with defaults
    let mut config = if let Some(path) = &args.config {
        StressConfig::from_file(path).context("Failed to load config file")?
    } else {
        StressConfig::default()
    };

    // Flags override the file
    if let Some(slots) = args.slots {
        config.cache.num_slots = slots;
    }
    if let Some(buckets) = args.buckets {
        config.cache.num_buckets = buckets;
    }
    if let Some(block_size) = args.block_size {
        config.cache.block_size = block_size;
    }
    if let Some(ms) = args.lock_timeout_ms {
        config.cache.lock_timeout_ms = Some(ms);
    }
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    if let Some(ops) = args.ops {
        config.ops_per_thread = ops;
    }
    if let Some(devices) = args.devices {
        config.devices = devices;
    }
    if let Some(blocks) = args.blocks_per_device {
        config.blocks_per_device = blocks;
    }
    if let Some(percent) = args.read_percent {
        config.read_percent = percent;
    }
    if let Some(dir) = &args.image_dir {
        config.image_dir = Some(dir.clone());
    }
    if let Some(latency) = args.disk_latency_us {
        config.disk_latency_us = latency;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    Ok(config)
}

fn open_device(config: &StressConfig) -> Result<Arc<dyn BlockDevice>> {
    let block_size = config.cache.block_size;

    if let Some(dir) = &config.image_dir {
        info!("Image directory: {}", dir.display());
        std::fs::create_dir_all(dir).context("Failed to create image directory")?;

        let disk = FileDisk::new(block_size);
        for n in 1..=config.devices {
            let path = dir.join(format!("dev{n}.img"));
            disk.attach(DeviceId::new(n), &path, config.blocks_per_device)
                .with_context(|| format!("Failed to attach {}", path.display()))?;
        }
        return Ok(Arc::new(disk));
    }

    info!("Using in-memory devices");
    let mut disk = MemDisk::new(block_size);
    if config.disk_latency_us > 0 {
        disk = disk.with_latency(Duration::from_micros(config.disk_latency_us));
    }
    Ok(Arc::new(disk))
}
