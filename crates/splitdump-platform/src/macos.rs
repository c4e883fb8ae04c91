//! macOS platform implementation
//!
//! Disk sizes come from `DKIOCGETBLOCKCOUNT`/`DKIOCGETBLOCKSIZE`; volume data
//! from `statvfs`/`statfs`.

use crate::{DiskSpace, PlatformError, Result};
use std::ffi::{CStr, CString};
use std::fs::File;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

fn c_path(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| PlatformError::NotFound(format!("{} contains a NUL byte", path.display())))
}

pub(crate) fn device_size(file: &File) -> Result<u64> {
    let fd = file.as_raw_fd();

    const DKIOCGETBLOCKCOUNT: libc::c_ulong = 0x40086419;
    const DKIOCGETBLOCKSIZE: libc::c_ulong = 0x40046418;

    let mut block_count: u64 = 0;
    let mut block_size: u32 = 0;

    // SAFETY: both ioctls write a single integer into the provided pointer.
    #[allow(unsafe_code)]
    let (result1, result2) = unsafe {
        (
            libc::ioctl(fd, DKIOCGETBLOCKCOUNT, &mut block_count),
            libc::ioctl(fd, DKIOCGETBLOCKSIZE, &mut block_size),
        )
    };

    if result1 == 0 && result2 == 0 && block_count > 0 && block_size > 0 {
        return Ok(block_count * u64::from(block_size));
    }

    Ok(file.metadata()?.len())
}

pub(crate) fn disk_space(path: &Path) -> Result<DiskSpace> {
    let c_path = c_path(path)?;
    // SAFETY: statvfs only writes into the zeroed struct we own.
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
    // SAFETY: statfs only writes into the zeroed struct we own.
    #[allow(unsafe_code)]
    let stat = unsafe {
        let mut stat: libc::statfs = std::mem::zeroed();
        if libc::statfs(c_path.as_ptr(), &mut stat) != 0 {
            return Err(PlatformError::Io(std::io::Error::last_os_error()));
        }
        stat
    };

    // SAFETY: f_fstypename is NUL-terminated by the kernel.
    #[allow(unsafe_code)]
    let name = unsafe { CStr::from_ptr(stat.f_fstypename.as_ptr()) };
    Ok(name.to_string_lossy().into_owned())
}

pub(crate) fn has_elevated_privileges() -> bool {
    // SAFETY: geteuid() has no preconditions.
    #[allow(unsafe_code)]
    unsafe {
        libc::geteuid() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filesystem_name_of_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!filesystem_name(dir.path()).unwrap().is_empty());
    }
}
