//! Named sector ranges on the source device

use crate::device::{Area, BlockDevice};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// File name used for a whole-device dump
pub const RAW_REGION_NAME: &str = "rawnand.bin";

/// A contiguous, inclusive LBA range inside one hardware area
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Name used for display and as the backup file name
    pub name: String,
    /// Hardware area the LBAs refer to
    pub area: Area,
    /// First LBA
    pub lba_start: u32,
    /// Last LBA (inclusive)
    pub lba_end: u32,
}

impl Region {
    /// Create a region, rejecting `lba_end < lba_start`
    pub fn new(name: impl Into<String>, area: Area, lba_start: u32, lba_end: u32) -> Result<Self> {
        let name = name.into();
        if lba_end < lba_start {
            return Err(Error::InvalidRegion(format!(
                "{}: end LBA {:#010X} precedes start LBA {:#010X}",
                name, lba_end, lba_start
            )));
        }
        Ok(Self {
            name,
            area,
            lba_start,
            lba_end,
        })
    }

    /// Create a region from a start LBA and a sector count
    pub fn from_range(
        name: impl Into<String>,
        area: Area,
        lba_start: u32,
        sectors: u64,
    ) -> Result<Self> {
        let name = name.into();
        if sectors == 0 {
            return Err(Error::InvalidRegion(format!("{}: empty range", name)));
        }
        let lba_end = u64::from(lba_start) + sectors - 1;
        let lba_end = u32::try_from(lba_end).map_err(|_| {
            Error::InvalidRegion(format!("{}: range exceeds 32-bit LBA space", name))
        })?;
        Self::new(name, area, lba_start, lba_end)
    }

    /// Boot partition `index` (BOOT0 / BOOT1), covering the whole area
    pub fn boot(index: u8, sectors: u64) -> Result<Self> {
        let area = Area::boot(index)
            .ok_or_else(|| Error::InvalidRegion(format!("no boot partition {}", index)))?;
        Self::from_range(format!("BOOT{}", index), area, 0, sectors)
    }

    /// The entire general purpose area
    pub fn raw(sectors: u64) -> Result<Self> {
        Self::from_range(RAW_REGION_NAME, Area::UserData, 0, sectors)
    }

    /// Number of sectors in the region
    pub fn sector_count(&self) -> u64 {
        u64::from(self.lba_end) - u64::from(self.lba_start) + 1
    }

    /// Size of the region in bytes
    pub fn byte_len(&self, block_size: u32) -> u64 {
        self.sector_count() * u64::from(block_size)
    }

    /// LBA `sectors` past the start, if it stays inside the region
    pub fn lba_at(&self, sectors: u64) -> Option<u32> {
        if sectors >= self.sector_count() {
            return None;
        }
        u32::try_from(u64::from(self.lba_start) + sectors).ok()
    }

    /// Integer completion percentage with `lba` as the current position
    pub fn percent_at(&self, lba: u32) -> u8 {
        let done = u64::from(lba.saturating_sub(self.lba_start));
        let span = u64::from(self.lba_end - self.lba_start);
        if span == 0 {
            return if done > 0 { 100 } else { 0 };
        }
        (done * 100 / span).min(100) as u8
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {:#010X} - {:#010X}",
            self.name, self.area, self.lba_start, self.lba_end
        )
    }
}

/// Which regions the caller asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionSelector {
    /// Both boot partitions
    Boot,
    /// Every partition of the GPT
    AllPartitions,
    /// Every GPT partition except USER
    SystemPartitions,
    /// One GPT partition by name (case-insensitive)
    Partition(String),
    /// The whole general purpose area
    Raw,
}

/// Name of the user data partition, handled apart from the system ones
pub const USER_PARTITION_NAME: &str = "USER";

impl std::str::FromStr for RegionSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "" => Err(Error::InvalidConfig("empty region selector".to_string())),
            "boot" => Ok(RegionSelector::Boot),
            "all" | "gpt" => Ok(RegionSelector::AllPartitions),
            "system" => Ok(RegionSelector::SystemPartitions),
            "raw" | "rawnand" | "rawnand.bin" => Ok(RegionSelector::Raw),
            _ => Ok(RegionSelector::Partition(s.to_string())),
        }
    }
}

impl RegionSelector {
    /// Resolve the selector against a device and its partition list
    pub fn resolve<D: BlockDevice + ?Sized>(
        &self,
        device: &D,
        partitions: &[Region],
    ) -> Result<Vec<Region>> {
        match self {
            RegionSelector::Boot => (0..2)
                .map(|i| {
                    let area = Area::boot(i).unwrap_or(Area::Boot0);
                    Region::boot(i, device.area_sectors(area))
                })
                .collect(),
            RegionSelector::AllPartitions => Ok(partitions.to_vec()),
            RegionSelector::SystemPartitions => Ok(partitions
                .iter()
                .filter(|p| p.name != USER_PARTITION_NAME)
                .cloned()
                .collect()),
            RegionSelector::Partition(name) => partitions
                .iter()
                .find(|p| p.name.eq_ignore_ascii_case(name))
                .cloned()
                .map(|p| vec![p])
                .ok_or_else(|| Error::InvalidRegion(format!("no partition named {}", name))),
            RegionSelector::Raw => Ok(vec![Region::raw(device.area_sectors(Area::UserData))?]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemDevice;

    #[test]
    fn test_region_rejects_inverted_bounds() {
        assert!(Region::new("bad", Area::UserData, 10, 9).is_err());
        assert!(Region::new("one", Area::UserData, 10, 10).is_ok());
    }

    #[test]
    fn test_region_sector_count() {
        let region = Region::new("r", Area::UserData, 0, 2047).unwrap();
        assert_eq!(region.sector_count(), 2048);
        assert_eq!(region.byte_len(512), 1024 * 1024);

        let full = Region::new("full", Area::UserData, 0, u32::MAX).unwrap();
        assert_eq!(full.sector_count(), 1u64 << 32);
    }

    #[test]
    fn test_from_range_overflow() {
        assert!(Region::from_range("r", Area::UserData, u32::MAX, 2).is_err());
        assert!(Region::from_range("r", Area::UserData, 0, 0).is_err());
        let r = Region::from_range("r", Area::UserData, 0x4000, 0x8000).unwrap();
        assert_eq!(r.lba_end, 0xBFFF);
    }

    #[test]
    fn test_lba_at() {
        let region = Region::new("r", Area::UserData, 100, 199).unwrap();
        assert_eq!(region.lba_at(0), Some(100));
        assert_eq!(region.lba_at(99), Some(199));
        assert_eq!(region.lba_at(100), None);
    }

    #[test]
    fn test_percent_at() {
        let region = Region::new("r", Area::UserData, 100, 300).unwrap();
        assert_eq!(region.percent_at(100), 0);
        assert_eq!(region.percent_at(200), 50);
        assert_eq!(region.percent_at(300), 100);
        assert_eq!(region.percent_at(50), 0);

        let single = Region::new("s", Area::UserData, 7, 7).unwrap();
        assert_eq!(single.percent_at(7), 0);
        assert_eq!(single.percent_at(8), 100);
    }

    #[test]
    fn test_percent_large_region_no_overflow() {
        let region = Region::new("big", Area::UserData, 0, u32::MAX).unwrap();
        assert_eq!(region.percent_at(u32::MAX / 2), 49);
    }

    #[test]
    fn test_boot_and_raw_regions() {
        let boot = Region::boot(1, 8192).unwrap();
        assert_eq!(boot.name, "BOOT1");
        assert_eq!(boot.area, Area::Boot1);
        assert_eq!(boot.lba_end, 8191);
        assert!(Region::boot(2, 8192).is_err());

        let raw = Region::raw(4096).unwrap();
        assert_eq!(raw.name, RAW_REGION_NAME);
        assert_eq!(raw.area, Area::UserData);
    }

    #[test]
    fn test_selector_parse() {
        assert_eq!("boot".parse::<RegionSelector>().unwrap(), RegionSelector::Boot);
        assert_eq!("RAW".parse::<RegionSelector>().unwrap(), RegionSelector::Raw);
        assert_eq!(
            "PRODINFO".parse::<RegionSelector>().unwrap(),
            RegionSelector::Partition("PRODINFO".to_string())
        );
        assert!("".parse::<RegionSelector>().is_err());
    }

    #[test]
    fn test_selector_resolve() {
        let device = MemDevice::new(4096).with_boot_sectors(8192);
        let partitions = vec![
            Region::new("SYSTEM", Area::UserData, 34, 1023).unwrap(),
            Region::new("USER", Area::UserData, 1024, 4061).unwrap(),
        ];

        let boot = RegionSelector::Boot.resolve(&device, &partitions).unwrap();
        assert_eq!(boot.len(), 2);
        assert_eq!(boot[0].sector_count(), 8192);

        let system = RegionSelector::SystemPartitions
            .resolve(&device, &partitions)
            .unwrap();
        assert_eq!(system.len(), 1);
        assert_eq!(system[0].name, "SYSTEM");

        let user = RegionSelector::Partition("user".into())
            .resolve(&device, &partitions)
            .unwrap();
        assert_eq!(user[0].lba_start, 1024);

        let raw = RegionSelector::Raw.resolve(&device, &partitions).unwrap();
        assert_eq!(raw[0].sector_count(), 4096);

        assert!(RegionSelector::Partition("NOPE".into())
            .resolve(&device, &partitions)
            .is_err());
    }
}
