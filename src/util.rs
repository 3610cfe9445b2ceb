//! File helpers shared by the storage adapters.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::core::change::normalize_path;
use crate::error::{CycleError, Result};

/// Maximum artifact size read into memory (10 MB).
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Read a file into a string, refusing files larger than `max_size`.
pub fn read_to_string_with_limit(path: &Path, max_size: u64) -> Result<String> {
    let metadata = fs::metadata(path).map_err(|e| CycleError::storage(path, e))?;

    let size = metadata.len();
    if size > max_size {
        return Err(CycleError::storage(
            path,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("file too large ({} bytes, max {} bytes)", size, max_size),
            ),
        ));
    }

    fs::read_to_string(path).map_err(|e| CycleError::storage(path, e))
}

/// Write a file atomically via a sibling temp file and rename.
///
/// Parent directories are created as needed.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| CycleError::storage(parent, e))?;
        }
    }

    let temp_path = temp_path_for(path);
    {
        let mut file = fs::File::create(&temp_path).map_err(|e| CycleError::storage(&temp_path, e))?;
        file.write_all(contents)
            .map_err(|e| CycleError::storage(&temp_path, e))?;
        file.sync_all()
            .map_err(|e| CycleError::storage(&temp_path, e))?;
    }

    fs::rename(&temp_path, path).map_err(|e| CycleError::storage(path, e))
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}

/// Resolve a rooted artifact path under `root`.
///
/// The path is normalized first, so `..` can never escape `root`.
pub fn resolve_under(root: &Path, artifact_path: &str) -> Result<PathBuf> {
    let canonical = normalize_path(artifact_path).ok_or_else(|| {
        CycleError::invalid_state(format!("invalid artifact path: {:?}", artifact_path))
    })?;
    Ok(root.join(canonical.trim_start_matches('/')))
}

/// Check whether a path names an atomic-write temp file.
pub fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .map(|n| {
            let n = n.to_string_lossy();
            n.starts_with('.') && n.ends_with(".tmp")
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_with_limit_within_limit() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("small.txt");
        fs::write(&path, "small content").unwrap();

        assert_eq!(read_to_string_with_limit(&path, 1000).unwrap(), "small content");
    }

    #[test]
    fn test_read_with_limit_at_boundary() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("boundary.txt");
        fs::write(&path, "x".repeat(100)).unwrap();

        assert!(read_to_string_with_limit(&path, 100).is_ok());
        let err = read_to_string_with_limit(&path, 99).unwrap_err().to_string();
        assert!(err.contains("too large"));
    }

    #[test]
    fn test_read_missing_file_is_storage_error() {
        let temp = TempDir::new().unwrap();
        let err = read_to_string_with_limit(&temp.path().join("missing"), 10).unwrap_err();
        assert!(matches!(err, CycleError::Storage { .. }));
    }

    #[test]
    fn test_atomic_write_creates_parents_and_leaves_no_temp() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a/b/c.txt");

        atomic_write(&path, b"hello").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
        assert!(!temp.path().join("a/b/.c.txt.tmp").exists());
    }

    #[test]
    fn test_resolve_under_stays_in_root() {
        let root = Path::new("/srv/tree");
        assert_eq!(
            resolve_under(root, "/src//lib.rs").unwrap(),
            PathBuf::from("/srv/tree/src/lib.rs")
        );
        assert!(resolve_under(root, "../etc/passwd").is_err());
    }

    #[test]
    fn test_is_temp_file() {
        assert!(is_temp_file(Path::new("/x/.a.txt.tmp")));
        assert!(!is_temp_file(Path::new("/x/a.txt")));
    }
}
