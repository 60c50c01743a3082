//! Policy-enforcing gateway for all file I/O.
//!
//! Every public operation normalizes its paths and checks the configured
//! locations before touching the filesystem. Native errors are translated
//! into the [`FilesError`] taxonomy on the way out.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use filetime::FileTime;
use globset::GlobBuilder;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use walkdir::WalkDir;

use crate::access::{AccessControl, Claim, FileAccess};
use crate::error::{FilesError, ForbiddenReason, Result};
use crate::metadata::{FileMetadata, FileType, MetadataContext};
use crate::path;
use crate::symlink::{NativeSymlinkResolver, SymlinkResolver};

/// Depth of a directory enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchOption {
    /// Only direct children.
    #[default]
    TopDirectoryOnly,
    /// All descendants.
    AllDirectories,
}

/// The single enforcement point for file access.
pub struct FileProvider {
    context: Arc<MetadataContext>,
    /// Destinations whose incoming rename fails, for crash-path tests.
    #[cfg(test)]
    pub(crate) rename_faults: std::sync::Mutex<Vec<PathBuf>>,
}

impl FileProvider {
    /// Create a provider using the native symlink resolver.
    pub fn new(access: AccessControl) -> Self {
        Self::with_resolver(access, Arc::new(NativeSymlinkResolver::new()))
    }

    /// Create a provider with an explicit symlink resolver.
    pub fn with_resolver(access: AccessControl, resolver: Arc<dyn SymlinkResolver>) -> Self {
        Self {
            context: Arc::new(MetadataContext {
                access: Arc::new(access),
                resolver,
            }),
            #[cfg(test)]
            rename_faults: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Claims granted on `path`; empty when nothing matches.
    pub fn get_claims(&self, path: &Path) -> Vec<Claim> {
        path::full_path(path)
            .ok()
            .and_then(|full| self.context.access.get_claims(&full).map(|c| c.to_vec()))
            .unwrap_or_default()
    }

    /// Check whether `access` is granted on `path`.
    pub fn is_access_allowed(&self, path: &Path, access: FileAccess) -> bool {
        match path::full_path(path) {
            Ok(full) => self.context.access.is_allowed(&full, access),
            Err(_) => false,
        }
    }

    /// Fail unless `access` is granted on `path`.
    ///
    /// Returns the normalized full path on success.
    pub fn ensure_access(&self, path: &Path, access: FileAccess) -> Result<PathBuf> {
        let full = path::full_path(path)?;

        match self.context.access.get_claims(&full) {
            Some(claims) if access.is_granted_by(claims) => Ok(full),
            Some(claims)
                if access.needs_write()
                    && claims.contains(&Claim::Read)
                    && !claims.contains(&Claim::Write) =>
            {
                Err(FilesError::Forbidden {
                    path: full,
                    reason: ForbiddenReason::ReadOnly,
                })
            }
            _ => Err(FilesError::Forbidden {
                path: full,
                reason: ForbiddenReason::Denied,
            }),
        }
    }

    /// Metadata for a file.
    ///
    /// Allowed when the path or its parent is readable, so a destination
    /// can be probed before it is created.
    pub fn get_file(&self, path: &Path) -> Result<FileMetadata> {
        self.get_entry(path, FileType::File)
    }

    /// Metadata for a directory. Same access rule as [`Self::get_file`].
    pub fn get_directory(&self, path: &Path) -> Result<FileMetadata> {
        self.get_entry(path, FileType::Directory)
    }

    fn get_entry(&self, path: &Path, file_type: FileType) -> Result<FileMetadata> {
        let full = path::full_path(path)?;

        let readable = self.context.access.is_allowed(&full, FileAccess::Read)
            || full
                .parent()
                .map(|parent| self.context.access.is_allowed(parent, FileAccess::Read))
                .unwrap_or(false);

        if !readable {
            return Err(FilesError::Forbidden {
                path: full,
                reason: ForbiddenReason::Denied,
            });
        }

        FileMetadata::load(full, file_type, self.context.clone())
    }

    /// Whether anything exists at `path`. Requires read.
    pub fn exists(&self, path: &Path) -> Result<bool> {
        let full = self.ensure_access(path, FileAccess::Read)?;
        match fs::symlink_metadata(&full) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(FilesError::from_io(e, &full)),
        }
    }

    /// Files under `path` whose names match `pattern`.
    pub fn get_files(
        &self,
        path: &Path,
        pattern: &str,
        option: SearchOption,
    ) -> Result<Vec<FileMetadata>> {
        self.enumerate(path, pattern, option, FileType::File)
    }

    /// Directories under `path` whose names match `pattern`.
    pub fn get_directories(
        &self,
        path: &Path,
        pattern: &str,
        option: SearchOption,
    ) -> Result<Vec<FileMetadata>> {
        self.enumerate(path, pattern, option, FileType::Directory)
    }

    fn enumerate(
        &self,
        path: &Path,
        pattern: &str,
        option: SearchOption,
        file_type: FileType,
    ) -> Result<Vec<FileMetadata>> {
        let dir = self.ensure_access(path, FileAccess::Read)?;

        match fs::metadata(&dir) {
            Ok(m) if m.is_dir() => {}
            Ok(_) => {
                return Err(FilesError::invalid_argument(
                    "path",
                    format!("{} is not a directory", dir.display()),
                ))
            }
            Err(e) => return Err(FilesError::from_io(e, &dir)),
        }

        // "*.*" historically means "everything", dotted or not.
        let pattern = match pattern {
            "" | "*.*" => "*",
            other => other,
        };
        let matcher = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .literal_separator(true)
            .build()
            .map_err(|e| FilesError::invalid_argument("pattern", e.to_string()))?
            .compile_matcher();

        let max_depth = match option {
            SearchOption::TopDirectoryOnly => 1,
            SearchOption::AllDirectories => usize::MAX,
        };

        let mut results = Vec::new();
        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let missing = e
                        .io_error()
                        .map(|io| io.kind() == io::ErrorKind::NotFound)
                        .unwrap_or(false);
                    if missing {
                        // Removed while we were walking.
                        continue;
                    }
                    return Err(walk_error(e, &dir));
                }
            };

            // File links are listed by what they point at. Directory links
            // are not walked, so they are not reported as directories.
            let is_wanted = match file_type {
                FileType::File => entry.path().is_file(),
                FileType::Directory => entry.file_type().is_dir(),
            };
            if !is_wanted || !matcher.is_match(entry.file_name()) {
                continue;
            }

            results.push(FileMetadata::load(
                entry.into_path(),
                file_type,
                self.context.clone(),
            )?);
        }

        Ok(results)
    }

    /// First symbolic link or junction at or below `path`. Requires read.
    pub(crate) fn find_link(&self, path: &Path) -> Result<Option<PathBuf>> {
        let dir = self.ensure_access(path, FileAccess::Read)?;

        let root = fs::symlink_metadata(&dir).map_err(|e| FilesError::from_io(e, &dir))?;
        if root.file_type().is_symlink() {
            return Ok(Some(dir));
        }

        for entry in WalkDir::new(&dir).min_depth(1).follow_links(false) {
            let entry = entry.map_err(|e| walk_error(e, &dir))?;
            if entry.path_is_symlink() {
                return Ok(Some(entry.into_path()));
            }
        }

        Ok(None)
    }

    /// Open a file for reading.
    pub async fn open_read(&self, path: &Path) -> Result<tokio::fs::File> {
        let full = self.ensure_access(path, FileAccess::Read)?;
        tokio::fs::File::open(&full)
            .await
            .map_err(|e| FilesError::from_io(e, &full))
    }

    /// Open a file for writing, creating or truncating it.
    pub async fn open_write(&self, path: &Path) -> Result<tokio::fs::File> {
        let full = self.ensure_access(path, FileAccess::Write)?;
        tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&full)
            .await
            .map_err(|e| FilesError::from_io(e, &full))
    }

    /// Copy a file's bytes and its timestamps.
    pub async fn copy(&self, source: &Path, destination: &Path) -> Result<()> {
        let source = self.ensure_access(source, FileAccess::Read)?;
        let destination = self.ensure_access(destination, FileAccess::ReadWrite)?;

        let metadata = match tokio::fs::metadata(&source).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => {
                return Err(FilesError::invalid_argument(
                    "source",
                    format!("{} is not a file", source.display()),
                ))
            }
            Err(e) => return Err(FilesError::from_io(e, &source)),
        };

        if is_same_file(&source, &metadata, &destination) {
            return Err(FilesError::InvalidOperation(format!(
                "cannot copy {} onto itself",
                source.display()
            )));
        }

        debug!(source = ?source, destination = ?destination, "Copying file");

        let mut reader = tokio::fs::File::open(&source)
            .await
            .map_err(|e| FilesError::from_io(e, &source))?;
        let mut writer = tokio::fs::File::create(&destination)
            .await
            .map_err(|e| FilesError::from_io(e, &destination))?;

        tokio::io::copy(&mut reader, &mut writer)
            .await
            .map_err(|e| FilesError::from_io(e, &destination))?;
        writer
            .flush()
            .await
            .map_err(|e| FilesError::from_io(e, &destination))?;
        writer
            .sync_all()
            .await
            .map_err(|e| FilesError::from_io(e, &destination))?;
        drop(writer);

        apply_times(
            destination,
            metadata.accessed().ok(),
            metadata.modified().ok(),
            metadata.created().ok(),
        )
        .await
    }

    /// Rename a file or directory.
    ///
    /// This is a plain rename; moving across volumes fails with the host
    /// error instead of falling back to copy and delete.
    pub async fn move_path(&self, source: &Path, destination: &Path) -> Result<()> {
        let source = self.ensure_access(source, FileAccess::Write)?;
        let destination = self.ensure_access(destination, FileAccess::Write)?;

        #[cfg(test)]
        self.check_rename_fault(&destination)?;

        debug!(source = ?source, destination = ?destination, "Moving entry");

        tokio::fs::rename(&source, &destination)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => FilesError::NotFound(source.clone()),
                _ => FilesError::from_io(e, &source),
            })
    }

    /// Delete a file, or a directory and everything below it.
    pub async fn delete(&self, path: &Path) -> Result<()> {
        let full = self.ensure_access(path, FileAccess::Write)?;

        let metadata = tokio::fs::symlink_metadata(&full)
            .await
            .map_err(|e| FilesError::from_io(e, &full))?;

        debug!(path = ?full, "Deleting entry");

        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&full).await
        } else if is_directory_link(&metadata) {
            tokio::fs::remove_dir(&full).await
        } else {
            tokio::fs::remove_file(&full).await
        };

        result.map_err(|e| FilesError::from_io(e, &full))
    }

    /// Create an empty file if it does not exist yet.
    pub async fn create_file(&self, path: &Path) -> Result<FileMetadata> {
        let full = self.ensure_access(path, FileAccess::Write)?;
        validate_name(&full)?;

        debug!(path = ?full, "Creating file");

        tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&full)
            .await
            .map_err(|e| FilesError::from_io(e, &full))?;

        FileMetadata::load(full, FileType::File, self.context.clone())
    }

    /// Create a directory and any missing parents.
    pub async fn create_directory(&self, path: &Path) -> Result<FileMetadata> {
        let full = self.ensure_access(path, FileAccess::Write)?;
        validate_name(&full)?;

        debug!(path = ?full, "Creating directory");

        tokio::fs::create_dir_all(&full)
            .await
            .map_err(|e| FilesError::from_io(e, &full))?;

        FileMetadata::load(full, FileType::Directory, self.context.clone())
    }

    /// Set the supplied timestamps, leaving the others untouched.
    pub async fn set_file_time(
        &self,
        path: &Path,
        accessed: Option<SystemTime>,
        modified: Option<SystemTime>,
        created: Option<SystemTime>,
    ) -> Result<()> {
        let full = self.ensure_access(path, FileAccess::Write)?;

        tokio::fs::symlink_metadata(&full)
            .await
            .map_err(|e| FilesError::from_io(e, &full))?;

        apply_times(full, accessed, modified, created).await
    }

    #[cfg(test)]
    fn check_rename_fault(&self, destination: &Path) -> Result<()> {
        let mut faults = self
            .rename_faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Each injected fault fires once.
        if let Some(index) = faults.iter().position(|p| p == destination) {
            faults.remove(index);
            return Err(FilesError::Io(io::Error::other("injected rename failure")));
        }
        Ok(())
    }
}

/// Whether `destination` names the same file as `source`.
#[cfg(unix)]
fn is_same_file(source: &Path, metadata: &fs::Metadata, destination: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    source == destination
        || fs::metadata(destination)
            .map(|other| other.dev() == metadata.dev() && other.ino() == metadata.ino())
            .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_same_file(source: &Path, _metadata: &fs::Metadata, destination: &Path) -> bool {
    path::paths_eq_ignore_case(source, destination)
}

fn validate_name(path: &Path) -> Result<()> {
    match path.file_name() {
        Some(name) if !path::is_valid_file_name(&name.to_string_lossy()) => {
            Err(FilesError::invalid_argument(
                "name",
                format!("'{}' is not a valid file name", name.to_string_lossy()),
            ))
        }
        _ => Ok(()),
    }
}

#[cfg(windows)]
fn is_directory_link(metadata: &fs::Metadata) -> bool {
    use std::os::windows::fs::FileTypeExt;
    metadata.file_type().is_symlink_dir()
}

#[cfg(not(windows))]
fn is_directory_link(_metadata: &fs::Metadata) -> bool {
    false
}

fn walk_error(err: walkdir::Error, root: &Path) -> FilesError {
    let path = err.path().unwrap_or(root).to_path_buf();
    match err.into_io_error() {
        Some(io_err) => FilesError::from_io(io_err, &path),
        None => FilesError::Io(io::Error::other(format!(
            "filesystem loop detected under {}",
            path.display()
        ))),
    }
}

async fn apply_times(
    path: PathBuf,
    accessed: Option<SystemTime>,
    modified: Option<SystemTime>,
    created: Option<SystemTime>,
) -> Result<()> {
    tokio::task::spawn_blocking(move || apply_times_blocking(&path, accessed, modified, created))
        .await?
}

fn apply_times_blocking(
    path: &Path,
    accessed: Option<SystemTime>,
    modified: Option<SystemTime>,
    created: Option<SystemTime>,
) -> Result<()> {
    let result = match (accessed, modified) {
        (Some(a), Some(m)) => filetime::set_file_times(
            path,
            FileTime::from_system_time(a),
            FileTime::from_system_time(m),
        ),
        (Some(a), None) => filetime::set_file_atime(path, FileTime::from_system_time(a)),
        (None, Some(m)) => filetime::set_file_mtime(path, FileTime::from_system_time(m)),
        (None, None) => Ok(()),
    };
    result.map_err(|e| FilesError::from_io(e, path))?;

    if let Some(created) = created {
        set_created(path, created)?;
    }

    Ok(())
}

#[cfg(windows)]
fn set_created(path: &Path, created: SystemTime) -> Result<()> {
    use std::fs::{FileTimes, OpenOptions};
    use std::os::windows::fs::{FileTimesExt, OpenOptionsExt};

    const FILE_FLAG_BACKUP_SEMANTICS: u32 = 0x0200_0000;

    let file = OpenOptions::new()
        .write(true)
        .custom_flags(FILE_FLAG_BACKUP_SEMANTICS)
        .open(path)
        .map_err(|e| FilesError::from_io(e, path))?;

    file.set_times(FileTimes::new().set_created(created))
        .map_err(|e| FilesError::from_io(e, path))
}

#[cfg(not(windows))]
fn set_created(path: &Path, _created: SystemTime) -> Result<()> {
    debug!(path = ?path, "Creation time is not settable on this platform");
    Ok(())
}
