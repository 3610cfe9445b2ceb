//! Session storage traits for cogcycle.

use std::sync::Arc;

use crate::core::state::SessionRecord;
use crate::error::Result;

/// Trait for session storage backends.
///
/// A session record carries the session-scoped auto-approve flag and the
/// summaries of finished cycles.
pub trait SessionStore: Send + Sync {
    /// Retrieve a session by ID.
    ///
    /// Returns `Ok(None)` if the session doesn't exist.
    fn get(&self, id: &str) -> Result<Option<SessionRecord>>;

    /// Create or replace a session.
    fn put(&self, session: &SessionRecord) -> Result<()>;

    /// List recent sessions, most recently updated first.
    fn list(&self, limit: usize) -> Result<Vec<SessionRecord>>;

    /// Delete a session. Deleting a missing session succeeds.
    fn delete(&self, id: &str) -> Result<()>;

    /// Check if a session exists.
    fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.get(id)?.is_some())
    }

    /// Fetch a session, creating an empty record if it doesn't exist yet.
    fn get_or_create(&self, id: &str, cwd: &str) -> Result<SessionRecord> {
        match self.get(id)? {
            Some(record) => Ok(record),
            None => {
                let record = SessionRecord::new(id, cwd);
                self.put(&record)?;
                Ok(record)
            }
        }
    }
}

impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
        (**self).get(id)
    }

    fn put(&self, session: &SessionRecord) -> Result<()> {
        (**self).put(session)
    }

    fn list(&self, limit: usize) -> Result<Vec<SessionRecord>> {
        (**self).list(limit)
    }

    fn delete(&self, id: &str) -> Result<()> {
        (**self).delete(id)
    }
}

/// Test utilities for SessionStore implementations.
#[cfg(test)]
pub mod tests {
    use super::*;

    /// Exercise the full CRUD contract against a store.
    pub fn test_session_store_crud<S: SessionStore>(store: &S) {
        let mut session = SessionRecord::new("test-session", "/tmp/project");

        assert!(!store.exists(&session.id).unwrap());
        assert!(store.get(&session.id).unwrap().is_none());

        store.put(&session).unwrap();
        assert!(store.exists(&session.id).unwrap());

        session.auto_approve_context = true;
        store.put(&session).unwrap();
        let retrieved = store.get(&session.id).unwrap().unwrap();
        assert_eq!(retrieved.cwd, "/tmp/project");
        assert!(retrieved.auto_approve_context);

        let sessions = store.list(10).unwrap();
        assert!(sessions.iter().any(|s| s.id == session.id));

        store.delete(&session.id).unwrap();
        assert!(!store.exists(&session.id).unwrap());
        store.delete(&session.id).unwrap();

        let created = store.get_or_create("fresh", "/work").unwrap();
        assert_eq!(created.cwd, "/work");
        assert!(!created.auto_approve_context);
        assert!(store.exists("fresh").unwrap());
    }
}
