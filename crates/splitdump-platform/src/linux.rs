//! Linux platform implementation
//!
//! Block device sizes come from `BLKGETSIZE64`; volume data from
//! `statvfs`/`statfs`.

use crate::{DiskSpace, PlatformError, Result};
use std::ffi::CString;
use std::fs::File;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

const MSDOS_SUPER_MAGIC: i64 = 0x4d44;
const EXFAT_SUPER_MAGIC: i64 = 0x2011_BAB0;
const EXT4_SUPER_MAGIC: i64 = 0xEF53;
const NTFS_SB_MAGIC: i64 = 0x5346_544E;
const TMPFS_MAGIC: i64 = 0x0102_1994;
const BTRFS_SUPER_MAGIC: i64 = 0x9123_683E;
const XFS_SUPER_MAGIC: i64 = 0x5846_5342;

fn c_path(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| PlatformError::NotFound(format!("{} contains a NUL byte", path.display())))
}

/// Get device size using ioctl, falling back to the file length
pub(crate) fn device_size(file: &File) -> Result<u64> {
    let fd = file.as_raw_fd();

    // Cast via u32 to handle the sign bit correctly on platforms where Ioctl is i32
    const BLKGETSIZE64: libc::Ioctl = 0x80081272u32 as libc::Ioctl;

    let mut size: u64 = 0;
    // SAFETY: ioctl with BLKGETSIZE64 writes a u64 to the provided pointer.
    // We pass a valid mutable reference to a u64, and fd is valid.
    #[allow(unsafe_code)]
    let result = unsafe { libc::ioctl(fd, BLKGETSIZE64, &mut size) };
    if result == 0 && size > 0 {
        return Ok(size);
    }

    Ok(file.metadata()?.len())
}

pub(crate) fn disk_space(path: &Path) -> Result<DiskSpace> {
    let c_path = c_path(path)?;
    // SAFETY: statvfs only writes into the zeroed struct we own; the path is
    // a valid NUL-terminated string for the duration of the call.
    #[allow(unsafe_code)]
    let stat = unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return Err(PlatformError::Io(std::io::Error::last_os_error()));
        }
        stat
    };

    #[allow(clippy::unnecessary_cast)]
    let fragment = stat.f_frsize as u64;
    #[allow(clippy::unnecessary_cast)]
    Ok(DiskSpace {
        free: stat.f_bavail as u64 * fragment,
        total: stat.f_blocks as u64 * fragment,
    })
}

pub(crate) fn filesystem_name(path: &Path) -> Result<String> {
    let c_path = c_path(path)?;
    // SAFETY: as for statvfs above.
    #[allow(unsafe_code)]
    let stat = unsafe {
        let mut stat: libc::statfs = std::mem::zeroed();
        if libc::statfs(c_path.as_ptr(), &mut stat) != 0 {
            return Err(PlatformError::Io(std::io::Error::last_os_error()));
        }
        stat
    };

    #[allow(clippy::unnecessary_cast)]
    let magic = stat.f_type as i64;
    Ok(match magic {
        MSDOS_SUPER_MAGIC => "vfat".to_string(),
        EXFAT_SUPER_MAGIC => "exfat".to_string(),
        EXT4_SUPER_MAGIC => "ext4".to_string(),
        NTFS_SB_MAGIC => "ntfs".to_string(),
        TMPFS_MAGIC => "tmpfs".to_string(),
        BTRFS_SUPER_MAGIC => "btrfs".to_string(),
        XFS_SUPER_MAGIC => "xfs".to_string(),
        other => format!("{:#x}", other),
    })
}

pub(crate) fn has_elevated_privileges() -> bool {
    // SAFETY: geteuid() is a simple syscall that returns the effective user ID.
    // It has no preconditions and cannot cause undefined behavior.
    #[allow(unsafe_code)]
    unsafe {
        libc::geteuid() == 0
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filesystem_name_of_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let name = filesystem_name(dir.path()).unwrap();
        assert!(!name.is_empty());
    }

    #[test]
    fn test_missing_path_is_error() {
        assert!(disk_space(Path::new("/nonexistent/splitdump/dir")).is_err());
        assert!(filesystem_name(Path::new("/nonexistent/splitdump/dir")).is_err());
    }

    #[test]
    fn test_device_size_falls_back_to_length() {
        let file = tempfile::tempfile().unwrap();
        file.set_len(1 << 20).unwrap();
        assert_eq!(device_size(&file).unwrap(), 1 << 20);
    }
}
