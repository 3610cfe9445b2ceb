//! Artifact store adapters.
//!
//! [`MemoryArtifactStore`] keeps the tree in a map and is used by tests and
//! dry runs. [`FileArtifactStore`] maps rooted artifact paths onto a directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::change::normalize_path;
use crate::error::{CycleError, Result};
use crate::ports::traits::{ArtifactMeta, ArtifactStore};
use crate::util::{atomic_write, is_temp_file, read_to_string_with_limit, resolve_under, MAX_FILE_SIZE};

fn canonical(path: &str) -> Result<String> {
    normalize_path(path)
        .ok_or_else(|| CycleError::invalid_state(format!("invalid artifact path: {:?}", path)))
}

/// In-memory artifact store.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    files: RwLock<BTreeMap<String, (String, DateTime<Utc>)>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `(path, content)` pairs.
    pub fn with_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<String>,
    {
        let now = Utc::now();
        let map = files
            .into_iter()
            .filter_map(|(p, c)| normalize_path(p.as_ref()).map(|p| (p, (c.into(), now))))
            .collect();
        Self {
            files: RwLock::new(map),
        }
    }

    fn poisoned() -> CycleError {
        CycleError::invalid_state("artifact store lock poisoned")
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn read(&self, path: &str) -> Result<Option<String>> {
        let path = canonical(path)?;
        let files = self.files.read().map_err(|_| Self::poisoned())?;
        Ok(files.get(&path).map(|(content, _)| content.clone()))
    }

    async fn write(&self, path: &str, content: &str) -> Result<()> {
        let path = canonical(path)?;
        let mut files = self.files.write().map_err(|_| Self::poisoned())?;
        files.insert(path, (content.to_string(), Utc::now()));
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let path = canonical(path)?;
        let mut files = self.files.write().map_err(|_| Self::poisoned())?;
        files.remove(&path);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ArtifactMeta>> {
        let files = self.files.read().map_err(|_| Self::poisoned())?;
        Ok(files
            .iter()
            .map(|(path, (content, modified))| ArtifactMeta {
                path: path.clone(),
                size: content.len() as u64,
                modified: Some(*modified),
            })
            .collect())
    }
}

/// Directory-backed artifact store.
///
/// Artifact `/a/b.txt` lives at `{root}/a/b.txt`. Writes are atomic and reads
/// are capped at [`MAX_FILE_SIZE`].
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    root: PathBuf,
}

impl FileArtifactStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.exists() {
            fs::create_dir_all(&root).map_err(|e| CycleError::storage(&root, e))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collect(root: &Path, dir: &Path, out: &mut Vec<ArtifactMeta>) -> Result<()> {
        let entries = fs::read_dir(dir).map_err(|e| CycleError::storage(dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| CycleError::storage(dir, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| CycleError::storage(&path, e))?;

            if file_type.is_dir() {
                if !is_ignored_dir(&path) {
                    Self::collect(root, &path, out)?;
                }
                continue;
            }
            if !file_type.is_file() || is_temp_file(&path) {
                continue;
            }

            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let Some(rooted) = normalize_path(&relative.to_string_lossy()) else {
                continue;
            };
            let metadata = entry.metadata().ok();
            out.push(ArtifactMeta {
                path: rooted,
                size: metadata.as_ref().map(|m| m.len()).unwrap_or(0),
                modified: metadata
                    .and_then(|m| m.modified().ok())
                    .map(DateTime::<Utc>::from),
            });
        }
        Ok(())
    }
}

/// Hidden directories and build output are not part of the managed tree.
fn is_ignored_dir(path: &Path) -> bool {
    path.file_name()
        .map(|n| {
            let n = n.to_string_lossy();
            n.starts_with('.') || n == "target" || n == "node_modules"
        })
        .unwrap_or(false)
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CycleError::collaborator("artifact store", e.to_string()))?
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn read(&self, path: &str) -> Result<Option<String>> {
        let full = resolve_under(&self.root, path)?;
        blocking(move || {
            if !full.is_file() {
                return Ok(None);
            }
            read_to_string_with_limit(&full, MAX_FILE_SIZE).map(Some)
        })
        .await
    }

    async fn write(&self, path: &str, content: &str) -> Result<()> {
        let full = resolve_under(&self.root, path)?;
        let content = content.to_string();
        blocking(move || atomic_write(&full, content.as_bytes())).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = resolve_under(&self.root, path)?;
        blocking(move || {
            if full.is_file() {
                fs::remove_file(&full).map_err(|e| CycleError::storage(&full, e))?;
            }
            Ok(())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<ArtifactMeta>> {
        let root = self.root.clone();
        blocking(move || {
            let mut out = Vec::new();
            if root.exists() {
                Self::collect(&root, &root, &mut out)?;
            }
            out.sort_by(|a, b| a.path.cmp(&b.path));
            Ok(out)
        })
        .await
    }
}
