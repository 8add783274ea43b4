//! Core identifier types for bcache.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing a device number from being passed where a block number is
//! expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Device identifier - selects one backing block device.
///
/// # Example
///
/// ```rust
/// use bcache_common::types::DeviceId;
///
/// let dev = DeviceId::new(1);
/// assert_eq!(dev.as_u32(), 1);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct DeviceId(u32);

impl DeviceId {
    /// Creates a new `DeviceId` from a raw u32 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for DeviceId {
    #[inline]
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

/// Block number - addresses one fixed-size block on a device.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BlockNo(u32);

impl BlockNo {
    /// Creates a new `BlockNo` from a raw u32 value.
    #[inline]
    #[must_use]
    pub const fn new(no: u32) -> Self {
        Self(no)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the next block number.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the byte offset of this block on a device with the given
    /// block size.
    #[inline]
    #[must_use]
    pub const fn byte_offset(self, block_size: usize) -> u64 {
        self.0 as u64 * block_size as u64
    }
}

impl fmt::Debug for BlockNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockNo({})", self.0)
    }
}

impl fmt::Display for BlockNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for BlockNo {
    #[inline]
    fn from(no: u32) -> Self {
        Self::new(no)
    }
}

impl From<BlockNo> for u32 {
    #[inline]
    fn from(no: BlockNo) -> Self {
        no.0
    }
}

/// Block identifier - the (device, block number) pair a buffer slot caches.
///
/// The pair packs losslessly into a single `u64`, which lets a slot publish
/// its identity through one atomic word.
///
/// # Example
///
/// ```rust
/// use bcache_common::types::{BlockId, BlockNo, DeviceId};
///
/// let id = BlockId::new(DeviceId::new(2), BlockNo::new(7));
/// assert_eq!(BlockId::from_u64(id.as_u64()), id);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct BlockId {
    device: DeviceId,
    block_no: BlockNo,
}

impl BlockId {
    /// Creates a new block identifier.
    #[inline]
    #[must_use]
    pub const fn new(device: DeviceId, block_no: BlockNo) -> Self {
        Self { device, block_no }
    }

    /// Shorthand for `BlockId::new(DeviceId::new(dev), BlockNo::new(block))`.
    #[inline]
    #[must_use]
    pub const fn from_raw(dev: u32, block: u32) -> Self {
        Self::new(DeviceId::new(dev), BlockNo::new(block))
    }

    /// Returns the device.
    #[inline]
    #[must_use]
    pub const fn device(self) -> DeviceId {
        self.device
    }

    /// Returns the block number.
    #[inline]
    #[must_use]
    pub const fn block_no(self) -> BlockNo {
        self.block_no
    }

    /// Packs the identifier into a u64 (device in the high half).
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        ((self.device.0 as u64) << 32) | self.block_no.0 as u64
    }

    /// Unpacks an identifier produced by [`BlockId::as_u64`].
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_u64(raw: u64) -> Self {
        Self::from_raw((raw >> 32) as u32, raw as u32)
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({}:{})", self.device.0, self.block_no.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device.0, self.block_no.0)
    }
}
