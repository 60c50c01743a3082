//! Read-only view of filesystem entries.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

use crate::access::{AccessControl, Claim};
use crate::error::{FilesError, Result};
use crate::path;
use crate::symlink::SymlinkResolver;

#[cfg(windows)]
const FILE_ATTRIBUTE_READONLY: u32 = 0x1;
#[cfg(windows)]
const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
#[cfg(windows)]
const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x400;

/// Kind of entry a metadata view describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

/// Attribute flags of an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileAttributes {
    /// Entry cannot be written.
    pub read_only: bool,
    /// Entry is hidden from normal listings.
    pub hidden: bool,
    /// Entry is a directory.
    pub directory: bool,
    /// Entry is a symlink or junction.
    pub reparse_point: bool,
}

/// Collaborators a metadata view needs to resolve claims and parents.
pub(crate) struct MetadataContext {
    pub(crate) access: Arc<AccessControl>,
    pub(crate) resolver: Arc<dyn SymlinkResolver>,
}

/// Metadata for a single file or directory.
///
/// The parent chain is resolved on first use and ends at the root, whose
/// parent is `None`.
#[derive(Clone)]
pub struct FileMetadata {
    name: String,
    path: PathBuf,
    target: Option<PathBuf>,
    exists: bool,
    size: u64,
    file_type: FileType,
    claims: Vec<Claim>,
    attributes: FileAttributes,
    created: Option<SystemTime>,
    last_modified: Option<SystemTime>,
    last_accessed: Option<SystemTime>,
    parent: OnceLock<Option<Box<FileMetadata>>>,
    context: Arc<MetadataContext>,
}

impl FileMetadata {
    /// Read metadata for `path`, which must already be a full path.
    pub(crate) fn load(
        path: PathBuf,
        file_type: FileType,
        context: Arc<MetadataContext>,
    ) -> Result<Self> {
        let link_metadata = match fs::symlink_metadata(&path) {
            Ok(m) => Some(m),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(FilesError::from_io(e, &path)),
        };

        let Some(link_metadata) = link_metadata else {
            return Ok(Self::missing(path, file_type, context));
        };

        let is_link = link_metadata.file_type().is_symlink();
        let metadata = if is_link {
            fs::metadata(&path).ok()
        } else {
            Some(link_metadata.clone())
        };

        let exists = metadata
            .as_ref()
            .map(|m| match file_type {
                FileType::File => m.is_file(),
                FileType::Directory => m.is_dir(),
            })
            .unwrap_or(false);

        let target = context
            .resolver
            .resolve_target(&path)?
            .filter(|t| !path::paths_eq_ignore_case(t, &path));

        let mut entry = Self::missing(path, file_type, context);
        entry.exists = exists;
        entry.target = target;
        entry.attributes.reparse_point = is_link;

        #[cfg(windows)]
        {
            use std::os::windows::fs::MetadataExt;
            let raw = link_metadata.file_attributes();
            entry.attributes.reparse_point |= raw & FILE_ATTRIBUTE_REPARSE_POINT != 0;
            entry.attributes.hidden = raw & FILE_ATTRIBUTE_HIDDEN != 0;
            entry.attributes.read_only = raw & FILE_ATTRIBUTE_READONLY != 0;
        }

        #[cfg(not(windows))]
        {
            entry.attributes.hidden = entry.name.starts_with('.');
        }

        if let (true, Some(metadata)) = (exists, metadata) {
            entry.size = if metadata.is_file() { metadata.len() } else { 0 };
            entry.attributes.directory = metadata.is_dir();
            entry.attributes.read_only |= metadata.permissions().readonly();
            entry.created = metadata.created().ok();
            entry.last_modified = metadata.modified().ok();
            entry.last_accessed = metadata.accessed().ok();
        }

        Ok(entry)
    }

    /// A view of an entry that does not exist.
    pub(crate) fn missing(path: PathBuf, file_type: FileType, context: Arc<MetadataContext>) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());

        let claims = context
            .access
            .get_claims(&path)
            .map(|c| c.to_vec())
            .unwrap_or_default();

        Self {
            name,
            path,
            target: None,
            exists: false,
            size: 0,
            file_type,
            claims,
            attributes: FileAttributes::default(),
            created: None,
            last_modified: None,
            last_accessed: None,
            parent: OnceLock::new(),
            context,
        }
    }

    /// Entry name (not full path). The root is named by its full path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full, normalized path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Link target, if the entry resolves somewhere other than itself.
    pub fn target(&self) -> Option<&Path> {
        self.target.as_deref()
    }

    /// Whether an entry of the described type exists.
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Size in bytes (0 for directories and missing entries).
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Entry type.
    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    /// Claims granted on this entry.
    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    /// Attribute flags.
    pub fn attributes(&self) -> FileAttributes {
        self.attributes
    }

    /// Creation time, where the platform records it.
    pub fn created(&self) -> Option<SystemTime> {
        self.created
    }

    /// Last modification time.
    pub fn last_modified(&self) -> Option<SystemTime> {
        self.last_modified
    }

    /// Last access time.
    pub fn last_accessed(&self) -> Option<SystemTime> {
        self.last_accessed
    }

    /// Parent directory, `None` at a root.
    pub fn parent(&self) -> Option<&FileMetadata> {
        self.parent
            .get_or_init(|| {
                let parent_path = self.path.parent()?.to_path_buf();
                let parent = Self::load(parent_path.clone(), FileType::Directory, self.context.clone())
                    .unwrap_or_else(|e| {
                        tracing::debug!(path = ?parent_path, error = %e, "Parent metadata unavailable");
                        Self::missing(parent_path, FileType::Directory, self.context.clone())
                    });
                Some(Box::new(parent))
            })
            .as_deref()
    }
}

impl fmt::Debug for FileMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileMetadata")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("target", &self.target)
            .field("exists", &self.exists)
            .field("size", &self.size)
            .field("file_type", &self.file_type)
            .field("claims", &self.claims)
            .field("attributes", &self.attributes)
            .field("created", &self.created)
            .field("last_modified", &self.last_modified)
            .field("last_accessed", &self.last_accessed)
            .finish_non_exhaustive()
    }
}
