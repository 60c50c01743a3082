//! Native reparse point resolution.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::windows::fs::OpenOptionsExt;
use std::os::windows::io::AsRawHandle;
use std::path::{Path, PathBuf};
use std::ptr;

use windows_sys::Win32::Foundation::{
    ERROR_INSUFFICIENT_BUFFER, ERROR_MORE_DATA, ERROR_NOT_A_REPARSE_POINT, HANDLE,
};
use windows_sys::Win32::Storage::FileSystem::{
    GetFinalPathNameByHandleW, FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_OPEN_REPARSE_POINT,
    FILE_NAME_NORMALIZED, FILE_READ_ATTRIBUTES, FILE_SHARE_DELETE, FILE_SHARE_READ,
    FILE_SHARE_WRITE,
};
use windows_sys::Win32::System::Ioctl::FSCTL_GET_REPARSE_POINT;
use windows_sys::Win32::System::IO::DeviceIoControl;

use super::reparse::{self, MAX_REPARSE_BUFFER};
use crate::error::{FilesError, Result};

const INITIAL_REPARSE_BUFFER: usize = 1024;
const INITIAL_PATH_BUFFER: usize = 512;

pub(super) fn resolve_target(path: &Path) -> Result<Option<PathBuf>> {
    // Backup semantics lets the same call open directories; the reparse flag
    // keeps the handle on the link itself.
    let file = match OpenOptions::new()
        .access_mode(FILE_READ_ATTRIBUTES)
        .share_mode(FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE)
        .custom_flags(FILE_FLAG_OPEN_REPARSE_POINT | FILE_FLAG_BACKUP_SEMANTICS)
        .open(path)
    {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(FilesError::from_io(e, path)),
    };

    if let Some(target) = read_reparse_target(&file, path)? {
        return Ok(Some(PathBuf::from(target)));
    }

    final_path(&file, path).map(Some)
}

/// Query reparse data, growing the buffer up to [`MAX_REPARSE_BUFFER`].
fn read_reparse_target(file: &File, path: &Path) -> Result<Option<String>> {
    let handle = file.as_raw_handle() as HANDLE;
    let mut size = INITIAL_REPARSE_BUFFER;

    loop {
        let mut buffer = vec![0u8; size];
        let mut returned = 0u32;

        // SAFETY: `handle` stays open while `file` is borrowed, and the
        // output pointer is valid for `size` bytes of `buffer`.
        let ok = unsafe {
            DeviceIoControl(
                handle,
                FSCTL_GET_REPARSE_POINT,
                ptr::null(),
                0,
                buffer.as_mut_ptr().cast(),
                size as u32,
                &mut returned,
                ptr::null_mut(),
            )
        };

        if ok != 0 {
            buffer.truncate(returned as usize);
            let data = reparse::decode(&buffer)?;
            return Ok(data.map(|d| d.target()));
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error().map(|code| code as u32) {
            Some(ERROR_NOT_A_REPARSE_POINT) => return Ok(None),
            Some(ERROR_MORE_DATA) | Some(ERROR_INSUFFICIENT_BUFFER) => {
                if size >= MAX_REPARSE_BUFFER {
                    return Err(FilesError::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "reparse data for {} exceeds {} bytes",
                            path.display(),
                            MAX_REPARSE_BUFFER
                        ),
                    )));
                }
                size = (size * 2).min(MAX_REPARSE_BUFFER);
            }
            _ => return Err(FilesError::from_io(err, path)),
        }
    }
}

/// Final path of the handle with any extended-length prefix removed.
fn final_path(file: &File, path: &Path) -> Result<PathBuf> {
    let handle = file.as_raw_handle() as HANDLE;
    let mut buffer = vec![0u16; INITIAL_PATH_BUFFER];

    loop {
        // SAFETY: `handle` stays open while `file` is borrowed, and the
        // length passed is the capacity of `buffer` in UTF-16 units.
        let len = unsafe {
            GetFinalPathNameByHandleW(
                handle,
                buffer.as_mut_ptr(),
                buffer.len() as u32,
                FILE_NAME_NORMALIZED,
            )
        } as usize;

        if len == 0 {
            return Err(FilesError::from_io(io::Error::last_os_error(), path));
        }

        // Too small: `len` is the required size including the terminator.
        if len >= buffer.len() {
            buffer.resize(len + 1, 0);
            continue;
        }

        let full = String::from_utf16_lossy(&buffer[..len]);
        return Ok(PathBuf::from(reparse::strip_extended_prefix(&full)));
    }
}
