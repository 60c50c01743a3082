//! Path normalization and validation helpers.
//!
//! Every path that crosses into the provider goes through [`full_path`] so
//! policy checks always see a rooted, lexically normalized path. Comparisons
//! are case-insensitive to match how locations are configured on the hosts
//! the management API targets.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use rand::RngCore;

use crate::error::{FilesError, Result};

/// Characters that may never appear in a file name.
#[cfg(windows)]
const INVALID_FILE_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

#[cfg(not(windows))]
const INVALID_FILE_NAME_CHARS: &[char] = &['/', '\0'];

/// Expand environment variable references in `input`.
///
/// Supports `%NAME%`, `${NAME}` and `$NAME`. References to unset variables
/// are left untouched.
pub fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(idx) = rest.find(['%', '$']) {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx..];

        match expand_reference(tail) {
            Some((value, consumed)) => {
                out.push_str(&value);
                rest = &tail[consumed..];
            }
            None => {
                // '%' and '$' are single byte, so slicing past them is safe.
                out.push_str(&tail[..1]);
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Resolve the variable reference at the start of `tail`.
///
/// Returns the value and the number of bytes the reference occupied.
fn expand_reference(tail: &str) -> Option<(String, usize)> {
    if let Some(after) = tail.strip_prefix('%') {
        let end = after.find('%')?;
        let name = &after[..end];
        if name.is_empty() {
            return None;
        }
        return std::env::var(name).ok().map(|value| (value, end + 2));
    }

    if let Some(after) = tail.strip_prefix("${") {
        let end = after.find('}')?;
        let name = &after[..end];
        if name.is_empty() {
            return None;
        }
        return std::env::var(name).ok().map(|value| (value, end + 3));
    }

    let after = tail.strip_prefix('$')?;
    let len = after
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(after.len());
    if len == 0 {
        return None;
    }
    std::env::var(&after[..len])
        .ok()
        .map(|value| (value, len + 1))
}

/// Lexically normalize a path without touching the filesystem.
///
/// Drops `.` components, resolves `..` against preceding components (never
/// climbing above the root), collapses repeated separators and removes
/// trailing separators.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    let mut depth = 0usize;

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    out.pop();
                    depth -= 1;
                }
            }
            Component::Normal(name) => {
                out.push(name);
                depth += 1;
            }
        }
    }

    out
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(expand_env_vars(&path.to_string_lossy()))
}

/// Expand, validate and normalize `path`.
///
/// Fails with [`FilesError::InvalidArgument`] if the path is empty or not
/// rooted once environment variables are expanded.
pub fn full_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() || path.to_string_lossy().trim().is_empty() {
        return Err(FilesError::invalid_argument("path", "path is empty"));
    }

    let expanded = expand(path);
    if !expanded.has_root() {
        return Err(FilesError::invalid_argument(
            "path",
            format!("'{}' is not a rooted path", expanded.display()),
        ));
    }

    Ok(normalize(&expanded))
}

/// Check whether `path` is already a rooted, normalized path.
///
/// Never fails: malformed input simply yields `false`.
pub fn is_full_path(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    let raw = path.to_string_lossy();
    if raw.is_empty() {
        return false;
    }

    let expanded = expand(path);
    if !expanded.has_root() {
        return false;
    }

    let normalized = normalize(&expanded).to_string_lossy().to_lowercase();
    let raw = raw.to_lowercase();

    if raw == normalized {
        return true;
    }

    // Only one trailing separator may be dropped, so "//" is not "/".
    let stripped = strip_trailing_separator(&raw);
    stripped.len() < raw.len()
        && !stripped.ends_with(std::path::is_separator)
        && stripped == normalized
}

fn strip_trailing_separator(s: &str) -> &str {
    if s.len() > 1 {
        if let Some(last) = s.chars().last() {
            if std::path::is_separator(last) {
                return &s[..s.len() - last.len_utf8()];
            }
        }
    }
    s
}

/// Build a sibling path of `path` that does not exist yet.
///
/// The name is the original file name followed by a random 4-byte hex
/// suffix, so the staging file lives on the same volume as `path`.
pub fn temp_file_path(path: &Path) -> Result<PathBuf> {
    temp_file_path_with(path, &mut rand::thread_rng())
}

/// [`temp_file_path`] with an explicit random source.
pub fn temp_file_path_with<R: RngCore + ?Sized>(path: &Path, rng: &mut R) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| FilesError::invalid_argument("path", "path has no file name"))?;
    let parent = path
        .parent()
        .ok_or_else(|| FilesError::invalid_argument("path", "path has no parent"))?;

    loop {
        let mut suffix = [0u8; 4];
        rng.fill_bytes(&mut suffix);

        let mut candidate_name = name.to_os_string();
        candidate_name.push(".");
        candidate_name.push(hex::encode(suffix));
        let candidate = parent.join(candidate_name);

        match fs::symlink_metadata(&candidate) {
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(candidate),
            Err(e) => return Err(FilesError::from_io(e, &candidate)),
        }
    }
}

/// Check whether `parent` is a strict ancestor directory of `child`.
pub fn is_ancestor(parent: &Path, child: &Path) -> bool {
    let parent = normalize(&expand(parent));
    let child = normalize(&expand(child));

    let mut current = child.parent();
    while let Some(dir) = current {
        if paths_eq_ignore_case(dir, &parent) {
            return true;
        }
        current = dir.parent();
    }

    false
}

/// Validate a single file name (no directory components).
pub fn is_valid_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.ends_with('.')
        && !name
            .chars()
            .any(|c| INVALID_FILE_NAME_CHARS.contains(&c) || (cfg!(windows) && c.is_control()))
}

/// Case-insensitive comparison of two path segments.
pub fn eq_ignore_case(a: &OsStr, b: &OsStr) -> bool {
    a == b || a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
}

/// Case-insensitive comparison of two whole paths.
pub fn paths_eq_ignore_case(a: &Path, b: &Path) -> bool {
    eq_ignore_case(a.as_os_str(), b.as_os_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_resolves_dots() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("/a//b/")), PathBuf::from("/a/b"));
        assert_eq!(normalize(Path::new("/../../a")), PathBuf::from("/a"));
    }

    #[test]
    fn test_full_path_rejects_empty() {
        assert!(matches!(
            full_path(""),
            Err(FilesError::InvalidArgument { .. })
        ));
        assert!(matches!(
            full_path("   "),
            Err(FilesError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_full_path_rejects_relative() {
        assert!(matches!(
            full_path("relative/path.txt"),
            Err(FilesError::InvalidArgument { .. })
        ));
    }

    #[test]
    #[cfg(unix)]
    fn test_full_path_normalizes() {
        assert_eq!(
            full_path("/var/www/../www/./site").unwrap(),
            PathBuf::from("/var/www/site")
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_full_path_output_is_full_path() {
        for input in ["/", "/a", "/a/b/../c", "/a//b///c/", "/x/./y/."] {
            let full = full_path(input).unwrap();
            assert!(is_full_path(&full), "{input} -> {}", full.display());
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_is_full_path() {
        assert!(is_full_path("/var/www"));
        assert!(is_full_path("/var/www/"));
        assert!(is_full_path("/VAR/www"));
        assert!(!is_full_path("/var/www/../www"));
        assert!(!is_full_path("/var//www"));
        assert!(!is_full_path("var/www"));
        assert!(!is_full_path(""));
    }

    #[test]
    fn test_is_full_path_malformed_is_false() {
        assert!(!is_full_path("////"));
        assert!(!is_full_path("//"));
        assert!(is_full_path("/"));
        assert!(!is_full_path("C:"));
    }

    #[test]
    #[cfg(windows)]
    fn test_is_full_path_windows() {
        assert!(is_full_path("C:\\inetpub"));
        assert!(is_full_path("c:\\INETPUB\\wwwroot"));
        assert!(!is_full_path("C:inetpub"));
        assert!(!is_full_path("C:/inetpub"));
    }

    #[test]
    #[serial]
    fn test_expand_env_vars() {
        std::env::set_var("WEBADMIN_TEST_ROOT", "/srv/root");

        assert_eq!(expand_env_vars("%WEBADMIN_TEST_ROOT%/a"), "/srv/root/a");
        assert_eq!(expand_env_vars("${WEBADMIN_TEST_ROOT}/a"), "/srv/root/a");
        assert_eq!(expand_env_vars("$WEBADMIN_TEST_ROOT/a"), "/srv/root/a");
        assert_eq!(expand_env_vars("/a/100%"), "/a/100%");
        assert_eq!(expand_env_vars("%WEBADMIN_UNSET_VAR%/a"), "%WEBADMIN_UNSET_VAR%/a");
        assert_eq!(expand_env_vars("/price$"), "/price$");

        std::env::remove_var("WEBADMIN_TEST_ROOT");
    }

    #[test]
    #[serial]
    #[cfg(unix)]
    fn test_full_path_expands_variables() {
        std::env::set_var("WEBADMIN_TEST_SITE", "/srv/site");

        assert_eq!(
            full_path("%WEBADMIN_TEST_SITE%/wwwroot").unwrap(),
            PathBuf::from("/srv/site/wwwroot")
        );
        // Unexpanded references are not full paths themselves.
        assert!(!is_full_path("%WEBADMIN_TEST_SITE%/wwwroot"));

        std::env::remove_var("WEBADMIN_TEST_SITE");
    }

    #[test]
    #[cfg(unix)]
    fn test_is_ancestor() {
        assert!(is_ancestor(Path::new("/a"), Path::new("/a/b/c.txt")));
        assert!(is_ancestor(Path::new("/A"), Path::new("/a/b")));
        assert!(is_ancestor(Path::new("/"), Path::new("/a")));
        assert!(!is_ancestor(Path::new("/a/b"), Path::new("/a")));
        assert!(!is_ancestor(Path::new("/a"), Path::new("/a")));
        assert!(!is_ancestor(Path::new("/a"), Path::new("/ab/c")));
    }

    #[test]
    fn test_is_valid_file_name() {
        assert!(is_valid_file_name("index.html"));
        assert!(is_valid_file_name(".hidden"));
        assert!(!is_valid_file_name(""));
        assert!(!is_valid_file_name("trailing."));
        assert!(!is_valid_file_name("a/b"));
    }

    #[test]
    fn test_temp_file_path_is_sibling() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("web.config");

        let temp = temp_file_path(&target).unwrap();
        assert_eq!(temp.parent(), target.parent());

        let name = temp.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("web.config."));
        assert_eq!(name.len(), "web.config.".len() + 8);
        assert!(!temp.exists());
    }

    #[test]
    fn test_temp_file_path_skips_existing_names() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("app.dll");

        // Pre-seed the first names the generator would produce, alternating
        // between files and directories.
        let mut probe = StdRng::seed_from_u64(7);
        let mut seeded = Vec::new();
        for i in 0..16 {
            let name = temp_file_path_with(&target, &mut probe).unwrap();
            if i % 2 == 0 {
                fs::write(&name, b"taken").unwrap();
            } else {
                fs::create_dir(&name).unwrap();
            }
            seeded.push(name);
        }

        let mut rng = StdRng::seed_from_u64(7);
        let chosen = temp_file_path_with(&target, &mut rng).unwrap();

        assert!(!seeded.contains(&chosen));
        assert!(!chosen.exists());
    }

    #[test]
    fn test_temp_file_path_requires_file_name() {
        assert!(temp_file_path(Path::new("/")).is_err());
    }

    #[test]
    fn test_eq_ignore_case() {
        assert!(eq_ignore_case(OsStr::new("WWWRoot"), OsStr::new("wwwroot")));
        assert!(!eq_ignore_case(OsStr::new("site"), OsStr::new("sites")));
    }
}
