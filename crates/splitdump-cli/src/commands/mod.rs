//! CLI command implementations and the arguments they share

pub mod check_log;
pub mod config;
pub mod dump;
pub mod list;
pub mod restore;
pub mod verify;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use splitdump_core::{parse_size, EngineConfig, FsKind, Region, RegionSelector, RegionSource, Settings};
use splitdump_platform::{AreaPaths, DirVolume, ImageDevice, TableRegionSource};
use std::path::{Path, PathBuf};

/// Source (dump) or target (restore) device
#[derive(Args, Debug, Clone)]
pub struct DeviceArgs {
    /// User area device node or image (e.g., /dev/mmcblk0, rawnand.img)
    #[arg(short, long, value_name = "PATH")]
    pub device: PathBuf,

    /// First boot partition (defaults to <DEVICE>boot0 when it exists)
    #[arg(long, value_name = "PATH")]
    pub boot0: Option<PathBuf>,

    /// Second boot partition (defaults to <DEVICE>boot1 when it exists)
    #[arg(long, value_name = "PATH")]
    pub boot1: Option<PathBuf>,
}

impl DeviceArgs {
    /// Host paths of every hardware area
    pub fn area_paths(&self) -> AreaPaths {
        let mut paths = AreaPaths::for_mmc_node(&self.device);
        if let Some(boot0) = &self.boot0 {
            paths = paths.boot0(boot0);
        }
        if let Some(boot1) = &self.boot1 {
            paths = paths.boot1(boot1);
        }
        paths
    }

    /// Open the device, read-only unless `writable`
    pub fn open(&self, writable: bool) -> Result<ImageDevice> {
        if !splitdump_platform::has_elevated_privileges() && self.device.starts_with("/dev") {
            tracing::warn!("Not running with elevated privileges; the device may not open");
        }
        ImageDevice::open(&self.area_paths(), writable)
            .with_context(|| format!("Failed to open device {}", self.device.display()))
    }
}

/// Filesystem class override for the destination
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsArg {
    /// Files are capped at 4 GiB - 1
    Fat32,
    /// No per-file cap (exFAT, NTFS, ext4, ...)
    Large,
}

impl From<FsArg> for FsKind {
    fn from(arg: FsArg) -> Self {
        match arg {
            FsArg::Fat32 => FsKind::SmallFileLimited,
            FsArg::Large => FsKind::LargeFileCapable,
        }
    }
}

/// Directory on the removable medium holding the backups
#[derive(Args, Debug, Clone)]
pub struct DestinationArgs {
    /// Directory on the destination medium
    #[arg(short = 'o', long = "dest", value_name = "DIR")]
    pub dest: PathBuf,

    /// Subdirectory of the destination for the backup files
    #[arg(long, value_name = "DIR")]
    pub prefix: Option<PathBuf>,

    /// Use at most this much of the destination (e.g., 4G, 512M)
    #[arg(long, value_name = "SIZE")]
    pub quota: Option<String>,

    /// Treat the destination as this filesystem instead of detecting it
    #[arg(long, value_enum)]
    pub fs: Option<FsArg>,
}

impl DestinationArgs {
    /// Open the destination volume
    pub fn open(&self) -> Result<DirVolume> {
        let mut volume = DirVolume::open(&self.dest)
            .with_context(|| format!("Cannot use destination {}", self.dest.display()))?;
        if let Some(quota) = &self.quota {
            volume = volume.with_quota(parse_size(quota).context("Invalid --quota")?);
        }
        if let Some(fs) = self.fs {
            volume = volume.with_kind(fs.into());
        }
        Ok(volume)
    }

    /// Backup path of `region`, relative to the destination
    pub fn base_for(&self, region: &Region) -> PathBuf {
        match &self.prefix {
            Some(prefix) => prefix.join(&region.name),
            None => PathBuf::from(&region.name),
        }
    }
}

/// What to transfer and how
#[derive(Args, Debug, Clone)]
pub struct TransferArgs {
    /// Regions: boot, raw, all, system or a partition name
    #[arg(short, long, default_value = "raw")]
    pub region: String,

    /// Verification: off, sparse, full, full-log
    #[arg(long, value_name = "MODE")]
    pub verify: Option<String>,

    /// Chunk size for each device command (e.g., 4M, 512K)
    #[arg(long, value_name = "SIZE")]
    pub chunk_size: Option<String>,

    /// Fixed part size instead of one derived from the destination
    #[arg(long, value_name = "SIZE")]
    pub part_size: Option<String>,

    /// Part file index format: padded, compact
    #[arg(long, value_name = "STYLE")]
    pub naming: Option<String>,

    /// Use this configuration file instead of the default
    #[arg(long, env = "SPLITDUMP_CONFIG", value_name = "FILE")]
    pub config_file: Option<PathBuf>,
}

impl TransferArgs {
    /// Stored settings with command line overrides applied
    pub fn settings(&self) -> Settings {
        let path = self.config_file.clone().or_else(Settings::config_path);
        let mut settings = Settings::load_from_path(path);
        if let Some(verify) = &self.verify {
            settings.transfer.verification = verify.clone();
        }
        if let Some(chunk_size) = &self.chunk_size {
            settings.transfer.chunk_size = chunk_size.clone();
        }
        if let Some(part_size) = &self.part_size {
            settings.transfer.part_size = Some(part_size.clone());
        }
        if let Some(naming) = &self.naming {
            settings.transfer.naming = naming.clone();
        }
        settings
    }

    /// Engine configuration from settings and overrides
    pub fn engine_config(&self) -> Result<EngineConfig> {
        self.settings()
            .engine_config()
            .context("Invalid transfer settings")
    }

    /// Parsed region selector
    pub fn selector(&self) -> Result<RegionSelector> {
        self.region
            .parse()
            .with_context(|| format!("Invalid region '{}'", self.region))
    }
}

/// Resolve `selector` on `device`, reading the partition table when needed
pub fn resolve_regions(
    device: ImageDevice,
    selector: &RegionSelector,
) -> Result<(ImageDevice, Vec<Region>)> {
    let (device, partitions) = match selector {
        RegionSelector::Boot | RegionSelector::Raw => (device, Vec::new()),
        _ => read_partitions(device)?,
    };

    let regions = selector
        .resolve(&device, &partitions)
        .context("Cannot resolve region")?;
    if regions.is_empty() {
        anyhow::bail!("No regions match '{:?}'", selector);
    }
    Ok((device, regions))
}

/// Partition table of the user area, giving the device back
pub fn read_partitions(device: ImageDevice) -> Result<(ImageDevice, Vec<Region>)> {
    let mut source = TableRegionSource::new(device);
    let partitions = source
        .partitions()
        .context("Failed to read the partition table")?;
    Ok((source.into_inner(), partitions))
}

/// Human readable byte count
pub fn format_bytes(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Display form of a backup path
pub fn display_base(dest: &Path, base: &Path) -> String {
    dest.join(base).display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer_args() -> TransferArgs {
        TransferArgs {
            region: "raw".to_string(),
            verify: None,
            chunk_size: None,
            part_size: None,
            naming: None,
            config_file: Some(PathBuf::from("/nonexistent/splitdump.toml")),
        }
    }

    #[test]
    fn test_fs_arg_conversion() {
        assert_eq!(FsKind::from(FsArg::Fat32), FsKind::SmallFileLimited);
        assert_eq!(FsKind::from(FsArg::Large), FsKind::LargeFileCapable);
    }

    #[test]
    fn test_overrides_win_over_settings() {
        let mut args = transfer_args();
        args.verify = Some("full".to_string());
        args.chunk_size = Some("64K".to_string());
        args.part_size = Some("1M".to_string());
        args.naming = Some("compact".to_string());

        let config = args.engine_config().unwrap();
        assert_eq!(config.verify_mode, splitdump_core::VerifyMode::Full);
        assert_eq!(config.chunk_sectors, 128);
        assert_eq!(config.part_size, Some(1024 * 1024));
        assert_eq!(config.naming, splitdump_core::PartNaming::Compact);
    }

    #[test]
    fn test_invalid_override_is_error() {
        let mut args = transfer_args();
        args.verify = Some("sometimes".to_string());
        assert!(args.engine_config().is_err());
    }

    #[test]
    fn test_selector_parse() {
        let mut args = transfer_args();
        assert_eq!(args.selector().unwrap(), RegionSelector::Raw);
        args.region = "SYSTEM".to_string();
        assert_eq!(args.selector().unwrap(), RegionSelector::SystemPartitions);
        args.region = "PRODINFO".to_string();
        assert_eq!(
            args.selector().unwrap(),
            RegionSelector::Partition("PRODINFO".to_string())
        );
    }

    #[test]
    fn test_base_for_prefix() {
        let dest = DestinationArgs {
            dest: PathBuf::from("/media/sd"),
            prefix: Some(PathBuf::from("backup")),
            quota: None,
            fs: None,
        };
        let region = Region::raw(2048).unwrap();
        assert_eq!(dest.base_for(&region), PathBuf::from("backup/rawnand.bin"));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert!(format_bytes(4 * 1024 * 1024).contains("MiB"));
    }
}
