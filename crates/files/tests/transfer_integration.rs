//! End-to-end tests for the files core.
//!
//! These tests drive the public API only:
//! - Tree copy and move through the transfer engine
//! - Policy enforcement across several locations
//! - Enumeration and metadata of transferred content

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use files::{
    AccessControl, Claim, FileAccess, FileProvider, FilesError, ForbiddenReason, Location,
    SearchOption, TransferEngine, TransferStatus,
};
use tempfile::TempDir;

/// Build an engine whose only writable location is `root`.
fn create_engine(root: &Path) -> TransferEngine {
    let access = AccessControl::new(vec![Location::read_write(
        root.to_string_lossy().to_string(),
    )]);
    TransferEngine::new(Arc::new(FileProvider::new(access)))
}

/// Write `count` files into each of `dirs` nested directories under `root`.
///
/// Returns relative paths and the modification time given to each file.
fn create_tree(root: &Path, dirs: usize, count: usize) -> Vec<(PathBuf, SystemTime)> {
    let mut created = Vec::new();
    let mut dir = PathBuf::new();

    for d in 0..dirs {
        dir = dir.join(format!("dir{d}"));
        fs::create_dir_all(root.join(&dir)).unwrap();

        for f in 0..count {
            let relative = dir.join(format!("file{f}.txt"));
            let path = root.join(&relative);
            let contents = format!("contents of {}", relative.display()).repeat(d + 1);
            fs::write(&path, contents).unwrap();

            let modified =
                SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000 + (d * 100 + f) as u64);
            filetime::set_file_mtime(&path, FileTime::from_system_time(modified)).unwrap();
            created.push((relative, modified));
        }
    }

    let root_file = root.join("root.txt");
    fs::write(&root_file, "root file").unwrap();
    let modified = fs::metadata(&root_file).unwrap().modified().unwrap();
    created.push((PathBuf::from("root.txt"), modified));

    created
}

// =============================================================================
// Tree Transfer Tests
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tree_copy_mirrors_content_and_timestamps() {
    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("site");
    let destination = temp_dir.path().join("backup");
    let files = create_tree(&source, 3, 4);

    let engine = create_engine(temp_dir.path());
    let operation = engine.copy(&source, &destination).await.unwrap();
    operation.wait().await.unwrap();

    assert_eq!(operation.status(), TransferStatus::Completed);
    assert_eq!(operation.current_size(), operation.total_size());
    assert!(operation.total_size() > 0);

    for (relative, modified) in &files {
        let copied = destination.join(relative);
        assert_eq!(
            fs::read(&copied).unwrap(),
            fs::read(source.join(relative)).unwrap(),
            "content mismatch for {}",
            relative.display()
        );
        assert_eq!(fs::metadata(&copied).unwrap().modified().unwrap(), *modified);
    }

    // Nothing but the mirrored files is left behind.
    let listed = engine
        .provider()
        .get_files(&destination, "*", SearchOption::AllDirectories)
        .unwrap();
    assert_eq!(listed.len(), files.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tree_move_into_existing_directory() {
    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("upload");
    let destination = temp_dir.path().join("www");
    let files = create_tree(&source, 2, 2);

    fs::create_dir_all(destination.join("dir0")).unwrap();
    fs::write(destination.join("dir0/file0.txt"), "stale").unwrap();
    fs::write(destination.join("keep.txt"), "untouched").unwrap();

    let engine = create_engine(temp_dir.path());
    let operation = engine.move_to(&source, &destination).await.unwrap();
    operation.wait().await.unwrap();

    assert!(!source.exists());
    for (relative, _) in &files {
        assert!(destination.join(relative).exists());
    }
    assert_ne!(fs::read(destination.join("dir0/file0.txt")).unwrap(), b"stale");
    assert_eq!(fs::read(destination.join("keep.txt")).unwrap(), b"untouched");
}

#[tokio::test]
async fn test_single_file_replace_leaves_no_artifacts() {
    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("release.zip");
    let destination = temp_dir.path().join("current.zip");
    fs::write(&source, "v2").unwrap();
    fs::write(&destination, "v1").unwrap();

    let engine = create_engine(temp_dir.path());
    let operation = engine.move_to(&source, &destination).await.unwrap();
    operation.wait().await.unwrap();

    assert_eq!(fs::read(&destination).unwrap(), b"v2");
    let names: Vec<String> = fs::read_dir(temp_dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["current.zip".to_string()]);
}

#[tokio::test]
async fn test_waiting_twice_on_success() {
    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("a.txt");
    fs::write(&source, "a").unwrap();

    let engine = create_engine(temp_dir.path());
    let operation = engine
        .copy(&source, &temp_dir.path().join("b.txt"))
        .await
        .unwrap();

    operation.wait().await.unwrap();
    operation.wait().await.unwrap();
}

// =============================================================================
// Policy Tests
// =============================================================================

#[tokio::test]
async fn test_copy_across_locations_respects_claims() {
    let temp_dir = TempDir::new().unwrap();
    let docs = temp_dir.path().join("docs");
    let site = temp_dir.path().join("site");
    fs::create_dir_all(&docs).unwrap();
    fs::create_dir_all(&site).unwrap();
    fs::write(docs.join("manual.txt"), "manual").unwrap();

    let access = AccessControl::new(vec![
        Location::read_only(docs.to_string_lossy().to_string()),
        Location::read_write(site.to_string_lossy().to_string()),
    ]);
    let engine = TransferEngine::new(Arc::new(FileProvider::new(access)));

    let operation = engine
        .copy(&docs.join("manual.txt"), &site.join("manual.txt"))
        .await
        .unwrap();
    operation.wait().await.unwrap();
    assert_eq!(fs::read(site.join("manual.txt")).unwrap(), b"manual");

    let result = engine
        .copy(&site.join("manual.txt"), &docs.join("copy.txt"))
        .await;
    assert!(matches!(
        result,
        Err(FilesError::Forbidden {
            reason: ForbiddenReason::ReadOnly,
            ..
        })
    ));

    let provider = engine.provider();
    assert_eq!(provider.get_claims(&docs.join("manual.txt")), vec![Claim::Read]);
    assert!(provider.is_access_allowed(&site, FileAccess::ReadWrite));
    assert!(!provider.is_access_allowed(temp_dir.path(), FileAccess::Read));
}

#[tokio::test]
async fn test_nested_location_declared_later_does_not_widen() {
    let temp_dir = TempDir::new().unwrap();
    let site = temp_dir.path().join("site");
    let sub = site.join("sub");
    fs::create_dir_all(&sub).unwrap();

    let access = AccessControl::new(vec![
        Location::read_only(site.to_string_lossy().to_string()),
        Location::read_write(sub.to_string_lossy().to_string()),
    ]);
    let provider = FileProvider::new(access);

    assert_eq!(provider.get_claims(&sub.join("file.txt")), vec![Claim::Read]);
    assert!(provider.create_file(&sub.join("file.txt")).await.is_err());
}
