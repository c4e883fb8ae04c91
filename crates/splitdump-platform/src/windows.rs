//! Windows platform implementation
//!
//! Disk sizes come from `IOCTL_DISK_GET_LENGTH_INFO`; volume data from
//! `GetDiskFreeSpaceExW`/`GetVolumeInformationW`.

use crate::{DiskSpace, PlatformError, Result};
use std::ffi::OsStr;
use std::fs::File;
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::AsRawHandle;
use std::path::Path;
use std::ptr;
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
use windows_sys::Win32::Storage::FileSystem::{
    GetDiskFreeSpaceExW, GetVolumeInformationW, GetVolumePathNameW,
};
use windows_sys::Win32::System::Ioctl::{GET_LENGTH_INFORMATION, IOCTL_DISK_GET_LENGTH_INFO};
use windows_sys::Win32::System::IO::DeviceIoControl;

fn wide(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(std::iter::once(0)).collect()
}

fn from_wide(buf: &[u16]) -> String {
    let len = buf.iter().position(|c| *c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

pub(crate) fn device_size(file: &File) -> Result<u64> {
    let handle = file.as_raw_handle() as HANDLE;
    let mut length_info: GET_LENGTH_INFORMATION = GET_LENGTH_INFORMATION { Length: 0 };
    let mut bytes_returned: u32 = 0;

    // SAFETY: the output buffer is a GET_LENGTH_INFORMATION we own, sized
    // correctly, and the handle stays valid for the lifetime of `file`.
    #[allow(unsafe_code)]
    let result = unsafe {
        DeviceIoControl(
            handle,
            IOCTL_DISK_GET_LENGTH_INFO,
            ptr::null(),
            0,
            &mut length_info as *mut _ as *mut _,
            std::mem::size_of::<GET_LENGTH_INFORMATION>() as u32,
            &mut bytes_returned,
            ptr::null_mut(),
        )
    };

    if result != 0 && length_info.Length > 0 {
        return Ok(length_info.Length as u64);
    }

    Ok(file.metadata()?.len())
}

pub(crate) fn disk_space(path: &Path) -> Result<DiskSpace> {
    let path = wide(path.as_os_str());
    let mut free: u64 = 0;
    let mut total: u64 = 0;
    let mut total_free: u64 = 0;

    // SAFETY: path is NUL-terminated and the out pointers are valid u64s.
    #[allow(unsafe_code)]
    let result =
        unsafe { GetDiskFreeSpaceExW(path.as_ptr(), &mut free, &mut total, &mut total_free) };
    if result == 0 {
        return Err(PlatformError::Io(std::io::Error::last_os_error()));
    }
    Ok(DiskSpace { free, total })
}

pub(crate) fn filesystem_name(path: &Path) -> Result<String> {
    let path = wide(path.as_os_str());
    let mut root = [0u16; 261];
    let mut fs_name = [0u16; 64];

    // SAFETY: every buffer is owned here and passed with its true length.
    #[allow(unsafe_code)]
    let ok = unsafe {
        GetVolumePathNameW(path.as_ptr(), root.as_mut_ptr(), root.len() as u32) != 0
            && GetVolumeInformationW(
                root.as_ptr(),
                ptr::null_mut(),
                0,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                fs_name.as_mut_ptr(),
                fs_name.len() as u32,
            ) != 0
    };
    if !ok {
        return Err(PlatformError::Io(std::io::Error::last_os_error()));
    }
    Ok(from_wide(&fs_name))
}

pub(crate) fn has_elevated_privileges() -> bool {
    use windows_sys::Win32::Security::{
        GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY,
    };
    use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    // SAFETY: the token handle is closed before returning and the elevation
    // struct is owned here.
    #[allow(unsafe_code)]
    unsafe {
        let mut token: HANDLE = 0;
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) == 0 {
            return false;
        }

        let mut elevation: TOKEN_ELEVATION = std::mem::zeroed();
        let mut size: u32 = 0;

        let result = GetTokenInformation(
            token,
            TokenElevation,
            &mut elevation as *mut _ as *mut _,
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut size,
        );

        CloseHandle(token);

        result != 0 && elevation.TokenIsElevated != 0
    }
}
