//! File-based session storage.
//!
//! Sessions are stored as JSON files in `~/.cogcycle/sessions/`. Writes go
//! through a temp file and rename.

use std::fs;
use std::path::PathBuf;

use crate::config::sessions_dir;
use crate::core::state::SessionRecord;
use crate::error::{CycleError, Result};
use crate::storage::SessionStore;
use crate::util::{atomic_write, is_temp_file, read_to_string_with_limit, MAX_FILE_SIZE};

/// File-based session storage.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    sessions_dir: PathBuf,
}

impl FileSessionStore {
    /// Create a store in the default directory.
    ///
    /// Uses `~/.cogcycle/sessions/` or `$COGCYCLE_HOME/sessions/`.
    pub fn new() -> Result<Self> {
        let dir = sessions_dir().ok_or_else(|| {
            CycleError::config("Could not determine sessions directory (no home directory)")
        })?;
        Self::with_dir(dir)
    }

    /// Create a store in a custom directory.
    pub fn with_dir(sessions_dir: impl Into<PathBuf>) -> Result<Self> {
        let sessions_dir = sessions_dir.into();
        if !sessions_dir.exists() {
            fs::create_dir_all(&sessions_dir)
                .map_err(|e| CycleError::storage(&sessions_dir, e))?;
        }
        Ok(Self { sessions_dir })
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{}.json", id))
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
        let path = self.session_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = read_to_string_with_limit(&path, MAX_FILE_SIZE)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn put(&self, session: &SessionRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(session)?;
        atomic_write(&self.session_path(&session.id), json.as_bytes())
    }

    fn list(&self, limit: usize) -> Result<Vec<SessionRecord>> {
        if !self.sessions_dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.sessions_dir)
            .map_err(|e| CycleError::storage(&self.sessions_dir, e))?;

        let mut sessions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CycleError::storage(&self.sessions_dir, e))?;
            let path = entry.path();

            if path.extension().map(|e| e != "json").unwrap_or(true) || is_temp_file(&path) {
                continue;
            }

            // Unreadable or foreign files are skipped
            if let Ok(content) = fs::read_to_string(&path) {
                if let Ok(session) = serde_json::from_str::<SessionRecord>(&content) {
                    sessions.push(session);
                }
            }
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    fn delete(&self, id: &str) -> Result<()> {
        let path = self.session_path(id);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| CycleError::storage(&path, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::CycleSummary;
    use crate::storage::traits::tests::test_session_store_crud;
    use chrono::Utc;
    use tempfile::TempDir;

    fn create_test_store() -> (FileSessionStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::with_dir(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn test_file_session_store_crud() {
        let (store, _dir) = create_test_store();
        test_session_store_crud(&store);
    }

    #[test]
    fn test_with_dir_creates_directory() {
        let dir = TempDir::new().unwrap();
        let sessions_path = dir.path().join("sessions");

        let _store = FileSessionStore::with_dir(&sessions_path).unwrap();

        assert!(sessions_path.is_dir());
    }

    #[test]
    fn test_cycles_persist() {
        let (store, _dir) = create_test_store();
        let mut record = SessionRecord::new("s1", "/tmp");
        record.add_cycle(CycleSummary {
            goal: "add logging".to_string(),
            status: "completed".to_string(),
            turns: 2,
            changes_applied: 3,
            finished_at: Utc::now(),
        });
        store.put(&record).unwrap();

        let loaded = store.get("s1").unwrap().unwrap();
        assert_eq!(loaded.cycles.len(), 1);
        assert_eq!(loaded.cycles[0].turns, 2);
    }

    #[test]
    fn test_list_ignores_temp_and_invalid_files() {
        let (store, dir) = create_test_store();
        store.put(&SessionRecord::new("valid", "/tmp")).unwrap();
        fs::write(dir.path().join(".valid.json.tmp"), "{}").unwrap();
        fs::write(dir.path().join("invalid.json"), "not valid json").unwrap();

        let sessions = store.list(10).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "valid");
    }

    #[test]
    fn test_put_leaves_no_temp_file() {
        let (store, dir) = create_test_store();
        store.put(&SessionRecord::new("atomic", "/tmp")).unwrap();
        assert!(!dir.path().join(".atomic.json.tmp").exists());
    }
}
