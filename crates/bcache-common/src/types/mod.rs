//! Type definitions for bcache.
//!
//! This module contains the identifier types used across the cache.

mod ids;

pub use ids::{BlockId, BlockNo, DeviceId};
