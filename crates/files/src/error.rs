//! Error types for the files crate.
//!
//! The variants form the taxonomy the HTTP layer renders into responses.
//! Policy denial (`Forbidden`) and host permission denial (`Unauthorized`)
//! are deliberately separate kinds.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Why a configured policy refused an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForbiddenReason {
    /// No claim covers the requested access.
    Denied,
    /// Write was requested on a location that only grants read.
    ReadOnly,
}

impl fmt::Display for ForbiddenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForbiddenReason::Denied => f.write_str("access denied"),
            ForbiddenReason::ReadOnly => f.write_str("read-only location"),
        }
    }
}

/// Files error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum FilesError {
    /// Unrooted or malformed path, invalid file name, missing parameter.
    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument {
        /// The offending parameter.
        name: String,
        /// Human readable explanation.
        reason: String,
    },

    /// A configured location denies the requested access.
    #[error("forbidden: {path} ({reason})")]
    Forbidden {
        /// The path that was refused.
        path: PathBuf,
        /// Whether the location is read-only or denies access entirely.
        reason: ForbiddenReason,
    },

    /// The host denied access at the permission layer.
    #[error("unauthorized: {0}")]
    Unauthorized(PathBuf),

    /// The target is in use elsewhere.
    #[error("locked: {0}")]
    Locked(PathBuf),

    /// An expected entry does not exist.
    #[error("not found: {0}")]
    NotFound(PathBuf),

    /// The operation is not valid for the given arguments.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A background transfer failed and its original error was already
    /// handed to another awaiter.
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// Unclassified IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for files operations.
pub type Result<T> = std::result::Result<T, FilesError>;

#[cfg(windows)]
const ERROR_SHARING_VIOLATION: i32 = 32;
#[cfg(windows)]
const ERROR_LOCK_VIOLATION: i32 = 33;

impl FilesError {
    /// Shorthand for an [`FilesError::InvalidArgument`].
    pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        FilesError::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Reclassify a native IO error raised while operating on `path`.
    ///
    /// Only sharing violations, permission denials and missing entries are
    /// translated; every other error is kept as [`FilesError::Io`].
    pub fn from_io(err: io::Error, path: &Path) -> Self {
        if is_sharing_violation(&err) {
            return FilesError::Locked(path.to_path_buf());
        }

        match err.kind() {
            io::ErrorKind::PermissionDenied => FilesError::Unauthorized(path.to_path_buf()),
            io::ErrorKind::NotFound => FilesError::NotFound(path.to_path_buf()),
            _ => FilesError::Io(err),
        }
    }

    /// Returns true for the policy-level refusal kind.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, FilesError::Forbidden { .. })
    }
}

// A background task panicked or was aborted.
impl From<tokio::task::JoinError> for FilesError {
    fn from(err: tokio::task::JoinError) -> Self {
        FilesError::Io(io::Error::other(err))
    }
}

fn is_sharing_violation(err: &io::Error) -> bool {
    #[cfg(windows)]
    {
        if matches!(
            err.raw_os_error(),
            Some(ERROR_SHARING_VIOLATION) | Some(ERROR_LOCK_VIOLATION)
        ) {
            return true;
        }
    }

    matches!(
        err.kind(),
        io::ErrorKind::ResourceBusy | io::ErrorKind::ExecutableFileBusy
    )
}
