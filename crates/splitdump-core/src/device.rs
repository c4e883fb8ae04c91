//! Block device capability consumed by the engine
//!
//! The engine never talks to hardware directly. Anything that can read and
//! write runs of fixed-size blocks in a hardware area (boot partitions or the
//! general purpose area) implements [`BlockDevice`].

use crate::region::Region;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of one device block in bytes
pub const SECTOR_SIZE: u32 = 512;

/// Hardware area an LBA refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Area {
    /// First boot partition
    Boot0,
    /// Second boot partition
    Boot1,
    /// General purpose area holding the GPT and user partitions
    UserData,
}

impl Area {
    /// Boot area by index (0 or 1)
    pub fn boot(index: u8) -> Option<Self> {
        match index {
            0 => Some(Area::Boot0),
            1 => Some(Area::Boot1),
            _ => None,
        }
    }
}

impl std::fmt::Display for Area {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Area::Boot0 => write!(f, "BOOT0"),
            Area::Boot1 => write!(f, "BOOT1"),
            Area::UserData => write!(f, "GPP"),
        }
    }
}

/// A failed block read or write, as reported by the driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DeviceFault(pub String);

impl From<std::io::Error> for DeviceFault {
    fn from(err: std::io::Error) -> Self {
        DeviceFault(err.to_string())
    }
}

/// Block-addressed storage the engine reads from (dump) or writes to (restore)
pub trait BlockDevice {
    /// Bytes per block
    fn block_size(&self) -> u32 {
        SECTOR_SIZE
    }

    /// Number of blocks in a hardware area (0 if absent)
    fn area_sectors(&self, area: Area) -> u64;

    /// Read `count` blocks starting at `lba` into `buf`
    ///
    /// `buf` is exactly `count * block_size()` bytes.
    fn read_blocks(
        &mut self,
        area: Area,
        lba: u32,
        count: u32,
        buf: &mut [u8],
    ) -> Result<(), DeviceFault>;

    /// Write `count` blocks starting at `lba` from `buf`
    fn write_blocks(&mut self, area: Area, lba: u32, count: u32, buf: &[u8])
        -> Result<(), DeviceFault>;

    /// Flush any cached writes
    fn sync(&mut self) -> Result<(), DeviceFault> {
        Ok(())
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for &mut T {
    fn block_size(&self) -> u32 {
        (**self).block_size()
    }

    fn area_sectors(&self, area: Area) -> u64 {
        (**self).area_sectors(area)
    }

    fn read_blocks(
        &mut self,
        area: Area,
        lba: u32,
        count: u32,
        buf: &mut [u8],
    ) -> Result<(), DeviceFault> {
        (**self).read_blocks(area, lba, count, buf)
    }

    fn write_blocks(
        &mut self,
        area: Area,
        lba: u32,
        count: u32,
        buf: &[u8],
    ) -> Result<(), DeviceFault> {
        (**self).write_blocks(area, lba, count, buf)
    }

    fn sync(&mut self) -> Result<(), DeviceFault> {
        (**self).sync()
    }
}

/// Partition-table enumeration for a device
///
/// Produced once per session; the engine only ever reads the returned list.
pub trait RegionSource {
    /// Named partitions of the general purpose area, in table order
    fn partitions(&mut self) -> crate::Result<Vec<Region>>;
}
