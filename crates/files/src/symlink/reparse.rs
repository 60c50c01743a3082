//! Reparse point buffer decoding.
//!
//! Layout of the buffer returned by `FSCTL_GET_REPARSE_POINT`:
//!
//! ```text
//! offset  size  field
//!      0     4  ReparseTag
//!      4     2  ReparseDataLength
//!      6     2  Reserved
//!      8     2  SubstituteNameOffset
//!     10     2  SubstituteNameLength
//!     12     2  PrintNameOffset
//!     14     2  PrintNameLength
//!     16     4  Flags              (symbolic links only)
//! 16 / 20     -  PathBuffer         (UTF-16LE)
//! ```
//!
//! Mount points (junctions) have no `Flags` field, so their path buffer
//! starts four bytes earlier than a symbolic link's. Name offsets are
//! relative to the start of the path buffer.
//!
//! The decoder is plain byte parsing and builds on every platform.

use std::io;

/// Reparse tag of a symbolic link.
pub const IO_REPARSE_TAG_SYMLINK: u32 = 0xA000_000C;

/// Reparse tag of a mount point (junction).
pub const IO_REPARSE_TAG_MOUNT_POINT: u32 = 0xA000_0003;

/// Largest reparse buffer we are willing to query.
pub const MAX_REPARSE_BUFFER: usize = 16 * 1024;

const SYMLINK_PATH_BUFFER_OFFSET: usize = 20;
const MOUNT_POINT_PATH_BUFFER_OFFSET: usize = 16;

/// Kind of a decoded reparse point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReparseKind {
    /// Symbolic link.
    Symlink,
    /// Mount point / directory junction.
    MountPoint,
}

/// Names carried by a symlink or junction reparse point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReparseData {
    /// Which layout the buffer used.
    pub kind: ReparseKind,
    /// NT-namespace target (e.g. `\??\C:\target`).
    pub substitute_name: String,
    /// User facing target (e.g. `C:\target`).
    pub print_name: String,
}

impl ReparseData {
    /// The target to report for this reparse point.
    ///
    /// Prefers the print name; some tools leave it empty, in which case the
    /// substitute name is used without its `\??\` prefix.
    pub fn target(&self) -> String {
        if !self.print_name.is_empty() {
            return self.print_name.clone();
        }

        self.substitute_name
            .strip_prefix(r"\??\")
            .unwrap_or(&self.substitute_name)
            .to_string()
    }
}

/// Decode a reparse buffer.
///
/// Returns `Ok(None)` for tags other than symlink and mount point so the
/// caller can fall back to the final path of the handle.
pub fn decode(buffer: &[u8]) -> io::Result<Option<ReparseData>> {
    let tag = read_u32(buffer, 0)?;

    let (kind, path_buffer_offset) = match tag {
        IO_REPARSE_TAG_SYMLINK => (ReparseKind::Symlink, SYMLINK_PATH_BUFFER_OFFSET),
        IO_REPARSE_TAG_MOUNT_POINT => (ReparseKind::MountPoint, MOUNT_POINT_PATH_BUFFER_OFFSET),
        _ => return Ok(None),
    };

    let substitute_offset = read_u16(buffer, 8)? as usize;
    let substitute_length = read_u16(buffer, 10)? as usize;
    let print_offset = read_u16(buffer, 12)? as usize;
    let print_length = read_u16(buffer, 14)? as usize;

    let substitute_name = read_utf16(
        buffer,
        path_buffer_offset + substitute_offset,
        substitute_length,
    )?;
    let print_name = read_utf16(buffer, path_buffer_offset + print_offset, print_length)?;

    Ok(Some(ReparseData {
        kind,
        substitute_name,
        print_name,
    }))
}

/// Strip an extended-length prefix from a path string.
///
/// `\\?\UNC\server\share` becomes `\\server\share` and `\\?\C:\dir`
/// becomes `C:\dir`. Anything else is returned unchanged.
pub fn strip_extended_prefix(path: &str) -> String {
    if let Some(rest) = path.strip_prefix(r"\\?\UNC\") {
        return format!(r"\\{rest}");
    }

    path.strip_prefix(r"\\?\").unwrap_or(path).to_string()
}

fn truncated(what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("reparse buffer truncated reading {what}"),
    )
}

fn read_u16(buffer: &[u8], offset: usize) -> io::Result<u16> {
    buffer
        .get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| truncated("header"))
}

fn read_u32(buffer: &[u8], offset: usize) -> io::Result<u32> {
    buffer
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| truncated("tag"))
}

fn read_utf16(buffer: &[u8], offset: usize, length: usize) -> io::Result<String> {
    if length % 2 != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "reparse name length is not a whole number of UTF-16 units",
        ));
    }

    let bytes = buffer
        .get(offset..offset + length)
        .ok_or_else(|| truncated("name"))?;

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok(String::from_utf16_lossy(&units))
}
