//! # bcache-test
//!
//! Integration tests for bcache.
//!
//! This crate contains:
//! - Multi-threaded tests of the buffer cache
//! - Behavioral scenarios (LRU order, recycling, pinning)
//! - File-backed device tests

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Test utilities and helpers
pub mod utils;
