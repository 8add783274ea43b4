//! Block device layer for bcache.
//!
//! The buffer cache reaches storage only through the [`BlockDevice`] trait:
//! one synchronous call to read a block and one to write it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           BlockDevice Trait             │
//! │   (block_size, read_block, write_block) │
//! └─────────────────────────────────────────┘
//!              │                   │
//!              ▼                   ▼
//! ┌─────────────────────┐  ┌─────────────────────┐
//! │   MemDisk           │  │   FileDisk          │
//! │   (hash map,        │  │   (one image file   │
//! │    fault injection) │  │    per device)      │
//! └─────────────────────┘  └─────────────────────┘
//! ```

mod device;
mod error;
mod file;
mod mem;

pub use device::{BlockDevice, DeviceStats};
pub use error::{DiskError, DiskResult};
pub use file::FileDisk;
pub use mem::MemDisk;
