//! Block device backed by image files or device nodes, one per hardware area

use crate::{device_size, PlatformError, Result};
use splitdump_core::{Area, BlockDevice, DeviceFault, SECTOR_SIZE};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Where each hardware area lives on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaPaths {
    /// General purpose (user data) area
    pub user: PathBuf,
    /// First boot partition
    pub boot0: Option<PathBuf>,
    /// Second boot partition
    pub boot1: Option<PathBuf>,
}

impl AreaPaths {
    /// Only a user area
    pub fn new(user: impl Into<PathBuf>) -> Self {
        Self {
            user: user.into(),
            boot0: None,
            boot1: None,
        }
    }

    /// Set the first boot partition
    pub fn boot0(mut self, path: impl Into<PathBuf>) -> Self {
        self.boot0 = Some(path.into());
        self
    }

    /// Set the second boot partition
    pub fn boot1(mut self, path: impl Into<PathBuf>) -> Self {
        self.boot1 = Some(path.into());
        self
    }

    /// Paths for an MMC device node, picking up `<node>boot0`/`<node>boot1`
    /// when they exist
    pub fn for_mmc_node(node: impl AsRef<Path>) -> Self {
        let node = node.as_ref();
        let sibling = |suffix: &str| {
            let mut name = node.as_os_str().to_owned();
            name.push(suffix);
            Some(PathBuf::from(name)).filter(|p| p.exists())
        };
        Self {
            user: node.to_path_buf(),
            boot0: sibling("boot0"),
            boot1: sibling("boot1"),
        }
    }

    /// Path for `area`, if configured
    pub fn path(&self, area: Area) -> Option<&Path> {
        match area {
            Area::UserData => Some(&self.user),
            Area::Boot0 => self.boot0.as_deref(),
            Area::Boot1 => self.boot1.as_deref(),
        }
    }
}

#[derive(Debug)]
struct AreaFile {
    file: File,
    path: PathBuf,
    sectors: u64,
}

/// [`BlockDevice`] over host files
#[derive(Debug)]
pub struct ImageDevice {
    areas: HashMap<Area, AreaFile>,
    writable: bool,
}

impl ImageDevice {
    /// Open every configured area; `writable` is needed for restores
    pub fn open(paths: &AreaPaths, writable: bool) -> Result<Self> {
        let mut areas = HashMap::new();
        for area in [Area::UserData, Area::Boot0, Area::Boot1] {
            let Some(path) = paths.path(area) else {
                continue;
            };
            let file = open_area(path, writable)?;
            let size = device_size(&file)?;
            if size % u64::from(SECTOR_SIZE) != 0 {
                warn!(
                    path = %path.display(),
                    size,
                    "Size is not a whole number of sectors, ignoring the tail"
                );
            }
            let sectors = size / u64::from(SECTOR_SIZE);
            debug!(%area, path = %path.display(), sectors, "Opened area");
            areas.insert(
                area,
                AreaFile {
                    file,
                    path: path.to_path_buf(),
                    sectors,
                },
            );
        }

        if areas.get(&Area::UserData).is_none_or(|a| a.sectors == 0) {
            return Err(PlatformError::InvalidDevice(format!(
                "{} holds no sectors",
                paths.user.display()
            )));
        }
        Ok(Self { areas, writable })
    }

    /// Host path backing `area`
    pub fn path(&self, area: Area) -> Option<&Path> {
        self.areas.get(&area).map(|a| a.path.as_path())
    }

    /// Whether the device was opened for writing
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    fn locate(&mut self, area: Area, lba: u32, count: u32, len: usize) -> std::result::Result<&mut File, DeviceFault> {
        let entry = self
            .areas
            .get_mut(&area)
            .ok_or_else(|| DeviceFault(format!("{} is not available", area)))?;
        let end = u64::from(lba) + u64::from(count);
        if end > entry.sectors {
            return Err(DeviceFault(format!(
                "{} blocks @ {:#X} beyond end of {} ({} sectors)",
                count, lba, area, entry.sectors
            )));
        }
        if len as u64 != u64::from(count) * u64::from(SECTOR_SIZE) {
            return Err(DeviceFault(format!("buffer of {} bytes for {} blocks", len, count)));
        }
        entry
            .file
            .seek(SeekFrom::Start(u64::from(lba) * u64::from(SECTOR_SIZE)))?;
        Ok(&mut entry.file)
    }
}

fn open_area(path: &Path, writable: bool) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(writable)
        .open(path)
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PlatformError::NotFound(path.display().to_string())
            } else if e.kind() == std::io::ErrorKind::PermissionDenied {
                PlatformError::PermissionDenied(format!(
                    "Cannot open {}: {}. Try running with sudo.",
                    path.display(),
                    e
                ))
            } else if e.raw_os_error() == Some(16) {
                // EBUSY
                PlatformError::DeviceBusy(format!("{} is busy", path.display()))
            } else {
                PlatformError::Io(e)
            }
        })
}

impl BlockDevice for ImageDevice {
    fn area_sectors(&self, area: Area) -> u64 {
        self.areas.get(&area).map_or(0, |a| a.sectors)
    }

    fn read_blocks(
        &mut self,
        area: Area,
        lba: u32,
        count: u32,
        buf: &mut [u8],
    ) -> std::result::Result<(), DeviceFault> {
        let file = self.locate(area, lba, count, buf.len())?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_blocks(
        &mut self,
        area: Area,
        lba: u32,
        count: u32,
        buf: &[u8],
    ) -> std::result::Result<(), DeviceFault> {
        if !self.writable {
            return Err(DeviceFault("device opened read-only".to_string()));
        }
        let file = self.locate(area, lba, count, buf.len())?;
        file.write_all(buf)?;
        Ok(())
    }

    fn sync(&mut self) -> std::result::Result<(), DeviceFault> {
        if !self.writable {
            return Ok(());
        }
        for area in self.areas.values() {
            area.file.sync_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use splitdump_core::testing::pattern;
    use tempfile::TempDir;

    fn image(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_open_and_read() {
        let dir = TempDir::new().unwrap();
        let data = pattern(64 * 512);
        let user = image(&dir, "user.img", &data);
        let boot0 = image(&dir, "boot0.img", &[0xB0; 8 * 512]);

        let mut device = ImageDevice::open(&AreaPaths::new(&user).boot0(&boot0), false).unwrap();
        assert_eq!(device.area_sectors(Area::UserData), 64);
        assert_eq!(device.area_sectors(Area::Boot0), 8);
        assert_eq!(device.area_sectors(Area::Boot1), 0);
        assert_eq!(device.path(Area::Boot0), Some(boot0.as_path()));

        let mut buf = vec![0u8; 2 * 512];
        device.read_blocks(Area::UserData, 10, 2, &mut buf).unwrap();
        assert_eq!(buf, data[10 * 512..12 * 512]);

        device.read_blocks(Area::Boot0, 7, 1, &mut buf[..512]).unwrap();
        assert!(buf[..512].iter().all(|b| *b == 0xB0));
    }

    #[test]
    fn test_out_of_range_is_fault() {
        let dir = TempDir::new().unwrap();
        let user = image(&dir, "user.img", &[0; 8 * 512]);
        let mut device = ImageDevice::open(&AreaPaths::new(&user), false).unwrap();
        let mut buf = vec![0u8; 2 * 512];
        assert!(device.read_blocks(Area::UserData, 7, 2, &mut buf).is_err());
        assert!(device.read_blocks(Area::Boot1, 0, 2, &mut buf).is_err());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let user = image(&dir, "user.img", &[0; 8 * 512]);
        let mut device = ImageDevice::open(&AreaPaths::new(&user), false).unwrap();
        assert!(!device.is_writable());
        assert!(device.write_blocks(Area::UserData, 0, 1, &[1; 512]).is_err());
    }

    #[test]
    fn test_write_and_sync() {
        let dir = TempDir::new().unwrap();
        let user = image(&dir, "user.img", &[0; 8 * 512]);
        let mut device = ImageDevice::open(&AreaPaths::new(&user), true).unwrap();
        device.write_blocks(Area::UserData, 3, 1, &[0x5A; 512]).unwrap();
        device.sync().unwrap();
        drop(device);

        let data = std::fs::read(&user).unwrap();
        assert!(data[3 * 512..4 * 512].iter().all(|b| *b == 0x5A));
        assert!(data[..3 * 512].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_missing_and_empty_images() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.img");
        assert!(matches!(
            ImageDevice::open(&AreaPaths::new(&missing), false),
            Err(PlatformError::NotFound(_))
        ));

        let empty = image(&dir, "empty.img", &[]);
        assert!(matches!(
            ImageDevice::open(&AreaPaths::new(&empty), false),
            Err(PlatformError::InvalidDevice(_))
        ));
    }

    #[test]
    fn test_mmc_node_siblings() {
        let dir = TempDir::new().unwrap();
        let node = image(&dir, "mmcblk0", &[0; 512]);
        image(&dir, "mmcblk0boot0", &[0; 512]);

        let paths = AreaPaths::for_mmc_node(&node);
        assert_eq!(paths.user, node);
        assert_eq!(paths.boot0, Some(dir.path().join("mmcblk0boot0")));
        assert_eq!(paths.boot1, None);
    }
}
