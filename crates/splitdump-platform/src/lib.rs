//! # Splitdump Platform
//!
//! Concrete devices and destination volumes for the splitdump engine.
//!
//! - [`ImageDevice`]: a block device backed by one file or device node per
//!   hardware area (e.g. `/dev/mmcblk0`, `/dev/mmcblk0boot0`)
//! - [`DirVolume`]: a destination volume rooted at a host directory, with
//!   free space and filesystem type probed from the OS
//! - [`TableRegionSource`]: partition enumeration with `bootsector`
//!
//! ## Safety
//!
//! Restoring writes raw sectors and can destroy data. Devices are opened
//! read-only unless write access is requested explicitly.

#![warn(missing_docs)]
#![warn(clippy::all)]

use splitdump_core::FsKind;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

mod device;
mod table;
mod volume;

pub use device::{AreaPaths, ImageDevice};
pub use table::{region_name, TableRegionSource, PARTITION_HEADER_SIZE};
pub use volume::DirVolume;

/// Platform-specific errors
#[derive(Error, Debug)]
pub enum PlatformError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Device access denied (need elevated privileges)
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Device is busy or locked
    #[error("Device busy: {0}")]
    DeviceBusy(String),

    /// Device or directory not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not supported on this platform
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Device size is not usable
    #[error("Invalid device: {0}")]
    InvalidDevice(String),
}

/// Result type for platform operations
pub type Result<T> = std::result::Result<T, PlatformError>;

/// Free and total bytes of a mounted filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSpace {
    /// Bytes available to the current user
    pub free: u64,
    /// Capacity in bytes
    pub total: u64,
}

/// Map a filesystem type name to the class the planner understands
///
/// FAT variants cannot hold files of 4 GiB or more.
pub fn fs_kind_from_name(name: &str) -> FsKind {
    match name.to_ascii_lowercase().as_str() {
        "vfat" | "fat" | "fat12" | "fat16" | "fat32" | "msdos" | "msdosfs" => {
            FsKind::SmallFileLimited
        }
        _ => FsKind::LargeFileCapable,
    }
}

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod linux;
        use linux as sys;
    } else if #[cfg(target_os = "macos")] {
        mod macos;
        use macos as sys;
    } else if #[cfg(target_os = "windows")] {
        mod windows;
        use windows as sys;
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))] {
        /// Size in bytes of an open device node or image file
        pub fn device_size(file: &File) -> Result<u64> {
            sys::device_size(file)
        }

        /// Free and total space of the filesystem holding `path`
        pub fn disk_space(path: &Path) -> Result<DiskSpace> {
            sys::disk_space(path)
        }

        /// Filesystem type name of the filesystem holding `path`
        pub fn filesystem_name(path: &Path) -> Result<String> {
            sys::filesystem_name(path)
        }

        /// Check if running with elevated privileges
        pub fn has_elevated_privileges() -> bool {
            sys::has_elevated_privileges()
        }
    } else {
        /// Size of a file (metadata only on this platform)
        pub fn device_size(file: &File) -> Result<u64> {
            Ok(file.metadata()?.len())
        }

        /// Disk space (unsupported platform)
        pub fn disk_space(_path: &Path) -> Result<DiskSpace> {
            Err(PlatformError::NotSupported("Platform not supported".to_string()))
        }

        /// Filesystem type (unsupported platform)
        pub fn filesystem_name(_path: &Path) -> Result<String> {
            Err(PlatformError::NotSupported("Platform not supported".to_string()))
        }

        /// Check privileges (unsupported platform)
        pub fn has_elevated_privileges() -> bool {
            false
        }
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
