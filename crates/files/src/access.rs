//! Location-based access control.
//!
//! A [`Location`] grants a set of claims over a path prefix. Locations are
//! evaluated in declaration order and the first matching prefix decides,
//! so a broad rule declared early shadows more specific rules after it.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::path;

/// A named permission granted over a path prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Claim {
    /// Read files, list directories.
    Read,
    /// Create, modify, move and delete entries.
    Write,
}

impl Claim {
    /// The configuration name of the claim.
    pub fn as_str(&self) -> &'static str {
        match self {
            Claim::Read => "read",
            Claim::Write => "write",
        }
    }
}

/// Access requested by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAccess {
    /// Requires the `read` claim.
    Read,
    /// Requires the `write` claim.
    Write,
    /// Requires both claims.
    ReadWrite,
}

impl FileAccess {
    /// Check if this access needs the read claim.
    pub fn needs_read(&self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    /// Check if this access needs the write claim.
    pub fn needs_write(&self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    /// Check whether `claims` cover this access.
    pub fn is_granted_by(&self, claims: &[Claim]) -> bool {
        (!self.needs_read() || claims.contains(&Claim::Read))
            && (!self.needs_write() || claims.contains(&Claim::Write))
    }
}

/// Configured policy entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Path prefix, may contain environment variable references.
    pub path: String,
    /// Claims granted under the prefix.
    #[serde(default)]
    pub claims: Vec<Claim>,
}

impl Location {
    /// Create a new location.
    pub fn new(path: impl Into<String>, claims: Vec<Claim>) -> Self {
        Self {
            path: path.into(),
            claims,
        }
    }

    /// Create a read-only location.
    pub fn read_only(path: impl Into<String>) -> Self {
        Self::new(path, vec![Claim::Read])
    }

    /// Create a read-write location.
    pub fn read_write(path: impl Into<String>) -> Self {
        Self::new(path, vec![Claim::Read, Claim::Write])
    }
}

/// A location whose prefix has been expanded and normalized.
#[derive(Debug, Clone)]
struct ResolvedLocation {
    prefix: PathBuf,
    claims: Vec<Claim>,
}

/// Immutable, ordered set of locations.
#[derive(Debug, Clone, Default)]
pub struct AccessControl {
    locations: Vec<ResolvedLocation>,
}

impl AccessControl {
    /// Build the access control from configured locations.
    ///
    /// Locations whose prefix does not expand to a rooted path are skipped.
    pub fn new(locations: impl IntoIterator<Item = Location>) -> Self {
        let locations = locations
            .into_iter()
            .filter_map(|location| match path::full_path(&location.path) {
                Ok(prefix) => {
                    let mut claims = location.claims;
                    claims.sort();
                    claims.dedup();
                    Some(ResolvedLocation { prefix, claims })
                }
                Err(e) => {
                    tracing::warn!(
                        path = %location.path,
                        error = %e,
                        "Skipping location with unusable path"
                    );
                    None
                }
            })
            .collect::<Vec<_>>();

        tracing::debug!("Loaded {} file locations", locations.len());
        Self { locations }
    }

    /// An access control with no locations: everything is denied.
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// Number of usable locations.
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    /// Whether no locations are configured.
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Get the claims granted for `path`.
    ///
    /// Returns `None` when `path` is not a full path or no location matches.
    pub fn get_claims(&self, path: &Path) -> Option<&[Claim]> {
        if !path::is_full_path(path) {
            return None;
        }

        let target = segments(path);

        self.locations
            .iter()
            .find(|location| {
                let prefix = segments(&location.prefix);
                prefix.len() <= target.len()
                    && prefix
                        .iter()
                        .zip(target.iter())
                        .all(|(a, b)| path::eq_ignore_case(a, b))
            })
            .map(|location| location.claims.as_slice())
    }

    /// Check whether `access` is granted on `path`.
    pub fn is_allowed(&self, path: &Path, access: FileAccess) -> bool {
        self.get_claims(path)
            .map(|claims| access.is_granted_by(claims))
            .unwrap_or(false)
    }
}

fn segments(path: &Path) -> Vec<&OsStr> {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| c.as_os_str())
        .collect()
}
