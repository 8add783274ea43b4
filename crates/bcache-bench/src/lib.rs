//! bcache Performance Benchmarks
//!
//! This crate contains benchmarks for the buffer cache:
//! - Hit path (block already cached)
//! - Miss path (eviction and cross-bucket migration)
//! - Contended access from many threads
//!
//! Run benchmarks with:
//! ```bash
//! cargo bench -p bcache-bench
//! ```

pub mod utils;
