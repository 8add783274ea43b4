//! # bcache-common
//!
//! Common types and constants for bcache.
//!
//! This crate provides the foundational types shared by the buffer cache,
//! its device adapters and the tools built on top of them:
//!
//! - **Types**: Block identifiers (`DeviceId`, `BlockNo`, `BlockId`)
//! - **Constants**: Default pool geometry and limits
//!
//! ## Example
//!
//! ```rust
//! use bcache_common::types::{BlockId, BlockNo, DeviceId};
//!
//! let id = BlockId::new(DeviceId::new(1), BlockNo::new(42));
//! assert_eq!(id.block_no().as_u32(), 42);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod constants;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::*;
pub use types::{BlockId, BlockNo, DeviceId};
