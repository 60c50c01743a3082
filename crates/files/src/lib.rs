//! Policy-enforced file operations for the WebAdmin management API.
//!
//! All physical I/O goes through [`FileProvider`], which checks every path
//! against the configured [`Location`]s before touching the filesystem.
//! [`TransferEngine`] builds crash-safe copy and move on top of it: files
//! are staged next to their destination and renamed into place, so a
//! destination is never observed half-written.
//!
//! # Modules
//!
//! - [`path`]: path expansion, normalization and temp names
//! - [`access`]: claims, locations and prefix matching
//! - [`symlink`]: link and junction target resolution
//! - [`metadata`]: read-only entry views
//! - [`provider`]: the enforcing gateway
//! - [`transfer`]: safe single-file and tree transfers

pub mod access;
pub mod error;
pub mod metadata;
pub mod path;
pub mod provider;
pub mod symlink;
pub mod transfer;

pub use access::{AccessControl, Claim, FileAccess, Location};
pub use error::{FilesError, ForbiddenReason, Result};
pub use metadata::{FileAttributes, FileMetadata, FileType};
pub use provider::{FileProvider, SearchOption};
pub use symlink::{NativeSymlinkResolver, NoopSymlinkResolver, SymlinkResolver};
pub use transfer::{TransferEngine, TransferKind, TransferOperation, TransferStatus};
