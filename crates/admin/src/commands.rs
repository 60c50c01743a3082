//! Command implementations behind the CLI.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use files::{
    Claim, FileMetadata, FileProvider, FileType, SearchOption, TransferEngine, TransferOperation,
};
use serde::Serialize;

use crate::config::Config;

/// Serializable view of a file or directory.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EntryInfo {
    pub name: String,
    pub path: String,
    /// Resolved target when the entry is a link.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// `"file"` or `"directory"`.
    pub kind: &'static str,
    pub exists: bool,
    pub size: u64,
    pub claims: Vec<Claim>,
    pub read_only: bool,
    pub hidden: bool,
    pub reparse_point: bool,
    /// Seconds since the Unix epoch.
    pub created: Option<u64>,
    pub modified: Option<u64>,
    pub accessed: Option<u64>,
}

impl From<&FileMetadata> for EntryInfo {
    fn from(entry: &FileMetadata) -> Self {
        let attributes = entry.attributes();
        Self {
            name: entry.name().to_string(),
            path: entry.path().display().to_string(),
            target: entry.target().map(|t| t.display().to_string()),
            kind: match entry.file_type() {
                FileType::File => "file",
                FileType::Directory => "directory",
            },
            exists: entry.exists(),
            size: entry.size(),
            claims: entry.claims().to_vec(),
            read_only: attributes.read_only,
            hidden: attributes.hidden,
            reparse_point: attributes.reparse_point,
            created: entry.created().and_then(unix_seconds),
            modified: entry.last_modified().and_then(unix_seconds),
            accessed: entry.last_accessed().and_then(unix_seconds),
        }
    }
}

impl fmt::Display for EntryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let claims = format_claims(&self.claims);
        let marker = if self.kind == "directory" { "d" } else { "-" };
        write!(f, "{marker} {:<10} {:>12}  {}", claims, self.size, self.path)?;
        if let Some(target) = &self.target {
            write!(f, " -> {target}")?;
        }
        Ok(())
    }
}

/// Comma separated claim names, or "none".
pub fn format_claims(claims: &[Claim]) -> String {
    if claims.is_empty() {
        return "none".to_string();
    }
    claims
        .iter()
        .map(Claim::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

fn unix_seconds(time: SystemTime) -> Option<u64> {
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

/// Listing options.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Glob matched against entry names.
    pub pattern: String,
    /// Descend into every subdirectory.
    pub recursive: bool,
    /// List directories instead of files.
    pub directories: bool,
}

/// The files core wired to a loaded configuration.
#[derive(Clone)]
pub struct App {
    engine: TransferEngine,
}

impl App {
    /// Build the provider and engine from the configured locations.
    pub fn new(config: &Config) -> Self {
        let access = config.files.access_control();
        tracing::debug!(locations = access.len(), "Access control ready");
        let provider = Arc::new(FileProvider::new(access));
        Self {
            engine: TransferEngine::new(provider),
        }
    }

    /// The policy-enforcing gateway behind every command.
    pub fn provider(&self) -> &FileProvider {
        self.engine.provider()
    }

    /// Claims granted on `path`.
    pub fn claims(&self, path: &Path) -> Vec<Claim> {
        self.provider().get_claims(path)
    }

    /// Metadata for whatever exists at `path`.
    pub fn stat(&self, path: &Path) -> Result<EntryInfo> {
        let directory = self.provider().get_directory(path)?;
        if directory.exists() {
            return Ok(EntryInfo::from(&directory));
        }

        let file = self.provider().get_file(path)?;
        if !file.exists() {
            anyhow::bail!("No such file or directory: {}", path.display());
        }
        Ok(EntryInfo::from(&file))
    }

    /// Files or directories under `path`.
    pub fn list(&self, path: &Path, options: &ListOptions) -> Result<Vec<EntryInfo>> {
        let option = if options.recursive {
            SearchOption::AllDirectories
        } else {
            SearchOption::TopDirectoryOnly
        };

        let entries = if options.directories {
            self.provider()
                .get_directories(path, &options.pattern, option)
        } else {
            self.provider().get_files(path, &options.pattern, option)
        }
        .with_context(|| format!("Failed to list {}", path.display()))?;

        Ok(entries.iter().map(EntryInfo::from).collect())
    }

    /// Start a copy in the background.
    pub async fn copy(&self, source: &Path, destination: &Path) -> Result<Arc<TransferOperation>> {
        self.engine
            .copy(source, destination)
            .await
            .with_context(|| format!("Failed to start copy of {}", source.display()))
    }

    /// Start a move in the background.
    pub async fn move_to(
        &self,
        source: &Path,
        destination: &Path,
    ) -> Result<Arc<TransferOperation>> {
        self.engine
            .move_to(source, destination)
            .await
            .with_context(|| format!("Failed to start move of {}", source.display()))
    }

    /// Delete a file, or a directory with everything below it.
    pub async fn delete(&self, path: &Path) -> Result<()> {
        self.provider()
            .delete(path)
            .await
            .with_context(|| format!("Failed to delete {}", path.display()))
    }

    /// Create a directory and any missing parents.
    pub async fn mkdir(&self, path: &Path) -> Result<EntryInfo> {
        let entry = self
            .provider()
            .create_directory(path)
            .await
            .with_context(|| format!("Failed to create directory {}", path.display()))?;
        Ok(EntryInfo::from(&entry))
    }

    /// Create the file if needed and set its modification time.
    pub async fn touch(&self, path: &Path, modified: Option<u64>) -> Result<EntryInfo> {
        let provider = self.provider();
        provider
            .create_file(path)
            .await
            .with_context(|| format!("Failed to create file {}", path.display()))?;

        let modified = match modified {
            Some(secs) => UNIX_EPOCH + Duration::from_secs(secs),
            None => SystemTime::now(),
        };
        provider
            .set_file_time(path, None, Some(modified), None)
            .await
            .with_context(|| format!("Failed to set times on {}", path.display()))?;

        Ok(EntryInfo::from(&provider.get_file(path)?))
    }
}

/// Render a transfer's progress as a single status line.
pub fn format_progress(operation: &TransferOperation) -> String {
    let total = operation.total_size();
    let current = operation.current_size();
    let percent = if total == 0 {
        100
    } else {
        (current.saturating_mul(100) / total).min(100)
    };
    format!(
        "[{}] {} {} -> {}: {}/{} bytes ({}%)",
        &operation.id()[..8],
        operation.kind().as_str(),
        operation.source().display(),
        operation.destination().display(),
        current,
        total,
        percent
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use files::Location;
    use std::fs;
    use tempfile::TempDir;

    fn app(root: &Path) -> App {
        let mut config = Config::default();
        config.files.locations = vec![Location::read_write(root.to_string_lossy().to_string())];
        App::new(&config)
    }

    #[test]
    fn test_stat_file_and_directory() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("index.html"), "hello").unwrap();
        let app = app(temp_dir.path());

        let file = app.stat(&temp_dir.path().join("index.html")).unwrap();
        assert_eq!(file.kind, "file");
        assert_eq!(file.size, 5);
        assert_eq!(file.claims, vec![Claim::Read, Claim::Write]);

        let dir = app.stat(temp_dir.path()).unwrap();
        assert_eq!(dir.kind, "directory");

        assert!(app.stat(&temp_dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_list_with_pattern() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("logs")).unwrap();
        fs::write(temp_dir.path().join("a.log"), "a").unwrap();
        fs::write(temp_dir.path().join("logs/b.log"), "b").unwrap();
        fs::write(temp_dir.path().join("c.txt"), "c").unwrap();
        let app = app(temp_dir.path());

        let options = ListOptions {
            pattern: "*.log".to_string(),
            recursive: true,
            directories: false,
        };
        let entries = app.list(temp_dir.path(), &options).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.log", "b.log"]);

        let dirs = app
            .list(
                temp_dir.path(),
                &ListOptions {
                    pattern: "*".to_string(),
                    recursive: false,
                    directories: true,
                },
            )
            .unwrap();
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].name, "logs");
    }

    #[test]
    fn test_entry_json_shape() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "a").unwrap();
        let app = app(temp_dir.path());

        let info = app.stat(&temp_dir.path().join("a.txt")).unwrap();
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["name"], "a.txt");
        assert_eq!(json["kind"], "file");
        assert_eq!(json["claims"], serde_json::json!(["read", "write"]));
        assert_eq!(json["size"], 1);
    }

    #[tokio::test]
    async fn test_touch_sets_modified() {
        let temp_dir = TempDir::new().unwrap();
        let app = app(temp_dir.path());

        let info = app
            .touch(&temp_dir.path().join("stamp"), Some(1_700_000_000))
            .await
            .unwrap();
        assert!(info.exists);
        assert_eq!(info.modified, Some(1_700_000_000));
    }

    #[tokio::test]
    async fn test_copy_and_progress_line() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "abcd").unwrap();
        let app = app(temp_dir.path());

        let operation = app
            .copy(&temp_dir.path().join("a.txt"), &temp_dir.path().join("b.txt"))
            .await
            .unwrap();
        operation.wait().await.unwrap();

        let line = format_progress(&operation);
        assert!(line.contains("copy"));
        assert!(line.contains("4/4 bytes (100%)"));
    }

    #[tokio::test]
    async fn test_denied_outside_locations() {
        let temp_dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let app = app(temp_dir.path());

        assert!(app.claims(other.path()).is_empty());
        assert!(app.delete(other.path()).await.is_err());
        assert!(other.path().exists());
    }

    #[test]
    fn test_format_claims() {
        assert_eq!(format_claims(&[]), "none");
        assert_eq!(format_claims(&[Claim::Read, Claim::Write]), "read,write");
    }
}
