//! Symlink and junction target resolution.
//!
//! Resolution is a platform capability exposed through [`SymlinkResolver`].
//! [`NativeSymlinkResolver`] decodes reparse points on Windows and reads
//! symbolic links elsewhere; [`NoopSymlinkResolver`] reports no targets.

pub mod reparse;

#[cfg(windows)]
mod windows;

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Resolve the target of a filesystem entry.
pub trait SymlinkResolver: Send + Sync {
    /// Returns the target of the entry at `path`.
    ///
    /// A missing entry yields `Ok(None)`. For links the displayed target is
    /// returned; for ordinary entries the final path the OS reports.
    fn resolve_target(&self, path: &Path) -> Result<Option<PathBuf>>;
}

/// Resolver backed by the host OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeSymlinkResolver;

impl NativeSymlinkResolver {
    /// Create a native resolver.
    pub fn new() -> Self {
        Self
    }
}

impl SymlinkResolver for NativeSymlinkResolver {
    #[cfg(windows)]
    fn resolve_target(&self, path: &Path) -> Result<Option<PathBuf>> {
        windows::resolve_target(path)
    }

    #[cfg(not(windows))]
    fn resolve_target(&self, path: &Path) -> Result<Option<PathBuf>> {
        use std::fs;
        use std::io;

        use crate::error::FilesError;

        let metadata = match fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(FilesError::from_io(e, path)),
        };

        if metadata.file_type().is_symlink() {
            let target = fs::read_link(path).map_err(|e| FilesError::from_io(e, path))?;
            if target.is_absolute() {
                return Ok(Some(target));
            }
            // Relative links are relative to the directory holding the link.
            let base = path.parent().unwrap_or(path);
            return Ok(Some(crate::path::normalize(&base.join(target))));
        }

        match fs::canonicalize(path) {
            Ok(canonical) => Ok(Some(canonical)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FilesError::from_io(e, path)),
        }
    }
}

/// Resolver for hosts without links: never reports a target.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSymlinkResolver;

impl SymlinkResolver for NoopSymlinkResolver {
    fn resolve_target(&self, _path: &Path) -> Result<Option<PathBuf>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_entry_has_no_target() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = NativeSymlinkResolver::new();

        let target = resolver
            .resolve_target(&temp_dir.path().join("missing"))
            .unwrap();
        assert!(target.is_none());
    }

    #[test]
    fn test_regular_file_resolves_to_final_path() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("index.html");
        fs::write(&file, "<html/>").unwrap();

        let resolver = NativeSymlinkResolver::new();
        let target = resolver.resolve_target(&file).unwrap().unwrap();
        assert_eq!(target, fs::canonicalize(&file).unwrap());
    }

    #[test]
    #[cfg(unix)]
    fn test_symlink_resolves_to_link_text() {
        use std::os::unix::fs::symlink;

        let temp_dir = TempDir::new().unwrap();
        let real = temp_dir.path().join("real");
        fs::create_dir(&real).unwrap();
        let link = temp_dir.path().join("link");
        symlink(&real, &link).unwrap();

        let resolver = NativeSymlinkResolver::new();
        assert_eq!(resolver.resolve_target(&link).unwrap(), Some(real));
    }

    #[test]
    #[cfg(unix)]
    fn test_dangling_symlink_still_resolves() {
        use std::os::unix::fs::symlink;

        let temp_dir = TempDir::new().unwrap();
        let link = temp_dir.path().join("dangling");
        symlink("gone/elsewhere", &link).unwrap();

        let resolver = NativeSymlinkResolver::new();
        assert_eq!(
            resolver.resolve_target(&link).unwrap(),
            Some(temp_dir.path().join("gone").join("elsewhere"))
        );
    }

    #[test]
    fn test_noop_resolver() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = NoopSymlinkResolver;
        assert!(resolver.resolve_target(temp_dir.path()).unwrap().is_none());
    }
}
