//! # bcache-storage
//!
//! Buffer cache and block device layer for bcache.
//!
//! This crate sits between a filesystem and a block device:
//! - A fixed pool of buffer slots sharded across hash buckets
//! - Global least-recently-used eviction across all buckets
//! - A blocking per-slot lock that serializes access to each block
//! - Synchronous device adapters (in-memory and file-backed)

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Buffer cache
pub mod buffer;

/// Block device adapters
pub mod disk;
