//! Partition table enumeration of the user area

use bootsector::{list_partitions, Attributes, Options};
use splitdump_core::{Area, BlockDevice, Error, Region, RegionSource};
use tracing::{debug, info};

/// Bytes read from the start of the user area for table inspection
///
/// GPT needs LBA 0-33 (34 sectors * 512 = 17,408 bytes); 64 KiB also covers
/// 4K-sector layouts.
pub const PARTITION_HEADER_SIZE: usize = 64 * 1024;

/// Display name for partition `index`, preferring its GPT label
pub fn region_name(index: usize, label: Option<&str>) -> String {
    match label.map(str::trim).filter(|l| !l.is_empty()) {
        Some(label) => label.to_string(),
        None => format!("PART{}", index + 1),
    }
}

/// [`RegionSource`] reading GPT or MBR tables through a [`BlockDevice`]
#[derive(Debug)]
pub struct TableRegionSource<D> {
    device: D,
}

impl<D: BlockDevice> TableRegionSource<D> {
    /// Enumerate partitions of `device`
    pub fn new(device: D) -> Self {
        Self { device }
    }

    /// Give back the device
    pub fn into_inner(self) -> D {
        self.device
    }
}

impl<D: BlockDevice> RegionSource for TableRegionSource<D> {
    fn partitions(&mut self) -> splitdump_core::Result<Vec<Region>> {
        let block = self.device.block_size();
        let available = self.device.area_sectors(Area::UserData);
        let sectors = (PARTITION_HEADER_SIZE as u64 / u64::from(block)).min(available) as u32;
        if sectors == 0 {
            return Ok(Vec::new());
        }

        let mut header = vec![0u8; sectors as usize * block as usize];
        self.device
            .read_blocks(Area::UserData, 0, sectors, &mut header)
            .map_err(|fault| Error::DeviceFault {
                lba: 0,
                count: sectors,
                reason: fault.0,
            })?;

        let regions = regions_from_header(&header, block)?;
        info!(count = regions.len(), "Enumerated partitions");
        Ok(regions)
    }
}

fn regions_from_header(header: &[u8], block: u32) -> splitdump_core::Result<Vec<Region>> {
    let Ok(partitions) = list_partitions(header, &Options::default()) else {
        debug!("No partition table found");
        return Ok(Vec::new());
    };

    let block = u64::from(block);
    partitions
        .iter()
        .enumerate()
        .map(|(index, partition)| {
            let label = match &partition.attributes {
                Attributes::GPT { name, .. } => Some(name.as_str()),
                _ => None,
            };
            let name = region_name(index, label);
            let start = u32::try_from(partition.first_byte / block).map_err(|_| {
                Error::InvalidRegion(format!("{} starts beyond the 32-bit LBA range", name))
            })?;
            let region = Region::from_range(name, Area::UserData, start, partition.len / block)?;
            debug!(region = %region, "Found partition");
            Ok(region)
        })
        .collect()
}
