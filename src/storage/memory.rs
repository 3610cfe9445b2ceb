//! In-memory session storage.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::core::state::SessionRecord;
use crate::error::{CycleError, Result};
use crate::storage::SessionStore;

/// Thread-safe in-memory session store. Records are lost on drop.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> CycleError {
        CycleError::invalid_state("session store lock poisoned")
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
        let sessions = self.sessions.read().map_err(|_| Self::poisoned())?;
        Ok(sessions.get(id).cloned())
    }

    fn put(&self, session: &SessionRecord) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(|_| Self::poisoned())?;
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn list(&self, limit: usize) -> Result<Vec<SessionRecord>> {
        let sessions = self.sessions.read().map_err(|_| Self::poisoned())?;
        let mut result: Vec<SessionRecord> = sessions.values().cloned().collect();
        result.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        result.truncate(limit);
        Ok(result)
    }

    fn delete(&self, id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(|_| Self::poisoned())?;
        sessions.remove(id);
        Ok(())
    }
}
