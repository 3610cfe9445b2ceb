//! Sessions command for cogcycle.
//!
//! Lists recent sessions with their IDs, auto-approve flag and last cycle,
//! useful for finding session IDs to pass to `cogcycle run --session-id`.

use serde::{Deserialize, Serialize};

use crate::core::SessionRecord;
use crate::error::Result;
use crate::storage::SessionStore;

/// Options for the sessions command.
#[derive(Debug, Clone, Default)]
pub struct SessionsOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
    /// Maximum number of sessions to show.
    pub limit: usize,
}

/// Summary of a single session for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub project_dir: String,
    /// Last updated timestamp (RFC 3339).
    pub updated_at: String,
    pub auto_approve_context: bool,
    /// Number of finished cycles.
    pub cycles: usize,
    /// Status of the most recent cycle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<String>,
}

impl From<&SessionRecord> for SessionSummary {
    fn from(session: &SessionRecord) -> Self {
        Self {
            id: session.id.clone(),
            project_dir: session.cwd.clone(),
            updated_at: session.updated_at.to_rfc3339(),
            auto_approve_context: session.auto_approve_context,
            cycles: session.cycles.len(),
            last_status: session.cycles.last().map(|c| c.status.clone()),
        }
    }
}

/// Output format for the sessions command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsOutput {
    pub success: bool,
    pub sessions: Vec<SessionSummary>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionsOutput {
    /// Create a successful output.
    pub fn success(sessions: Vec<SessionSummary>) -> Self {
        let count = sessions.len();
        Self {
            success: true,
            sessions,
            count,
            error: None,
        }
    }

    /// Create a failed output.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            sessions: vec![],
            count: 0,
            error: Some(error.into()),
        }
    }

    /// Format as human-readable text.
    pub fn format_text(&self) -> String {
        if !self.success {
            return format!(
                "Sessions failed: {}",
                self.error.as_deref().unwrap_or("unknown error")
            );
        }

        if self.sessions.is_empty() {
            return "No sessions found.".to_string();
        }

        let mut lines = vec![format!("Sessions ({} found):", self.count)];
        lines.push(String::new());

        lines.push(format!(
            "{:<36}  {:<20}  {:<4}  {:<6}  {}",
            "ID", "UPDATED", "AUTO", "CYCLES", "LAST"
        ));
        lines.push("-".repeat(90));

        for session in &self.sessions {
            // YYYY-MM-DDTHH:MM:SS
            let updated: String = session.updated_at.chars().take(19).collect();
            let auto = if session.auto_approve_context { "on" } else { "off" };
            lines.push(format!(
                "{:<36}  {:<20}  {:<4}  {:<6}  {}",
                session.id,
                updated,
                auto,
                session.cycles,
                session.last_status.as_deref().unwrap_or("-")
            ));
        }

        lines.join("\n")
    }
}

/// The sessions command implementation.
pub struct SessionsCommand<S: SessionStore> {
    store: S,
}

impl<S: SessionStore> SessionsCommand<S> {
    /// Create a new sessions command.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Run the sessions command.
    pub fn run(&self, options: &SessionsOptions) -> SessionsOutput {
        match self.list_sessions(options.limit) {
            Ok(sessions) => {
                let summaries: Vec<SessionSummary> =
                    sessions.iter().map(SessionSummary::from).collect();
                SessionsOutput::success(summaries)
            }
            Err(e) => SessionsOutput::failure(format!("Failed to list sessions: {}", e)),
        }
    }

    /// Format output based on options.
    pub fn format_output(&self, output: &SessionsOutput, options: &SessionsOptions) -> String {
        if options.quiet {
            return String::new();
        }
        if options.json {
            serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string())
        } else {
            output.format_text()
        }
    }

    fn list_sessions(&self, limit: usize) -> Result<Vec<SessionRecord>> {
        self.store.list(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CycleSummary;
    use crate::storage::MemorySessionStore;
    use chrono::Utc;
    use std::sync::Arc;

    fn create_test_store() -> Arc<MemorySessionStore> {
        Arc::new(MemorySessionStore::new())
    }

    #[test]
    fn test_sessions_empty() {
        let store = create_test_store();
        let cmd = SessionsCommand::new(store);
        let options = SessionsOptions {
            limit: 10,
            ..Default::default()
        };

        let output = cmd.run(&options);
        assert!(output.success);
        assert_eq!(output.count, 0);
        assert_eq!(output.format_text(), "No sessions found.");
    }

    #[test]
    fn test_sessions_with_data() {
        let store = create_test_store();

        let mut session1 = SessionRecord::new("session-1", "/project/a");
        session1.auto_approve_context = true;
        session1.add_cycle(CycleSummary {
            goal: "add logging".to_string(),
            status: "completed".to_string(),
            turns: 1,
            changes_applied: 2,
            finished_at: Utc::now(),
        });
        let session2 = SessionRecord::new("session-2", "/project/b");
        store.put(&session1).unwrap();
        store.put(&session2).unwrap();

        let cmd = SessionsCommand::new(store);
        let options = SessionsOptions {
            limit: 10,
            ..Default::default()
        };

        let output = cmd.run(&options);
        assert!(output.success);
        assert_eq!(output.count, 2);

        let first = output
            .sessions
            .iter()
            .find(|s| s.id == "session-1")
            .unwrap();
        assert!(first.auto_approve_context);
        assert_eq!(first.cycles, 1);
        assert_eq!(first.last_status.as_deref(), Some("completed"));

        let text = output.format_text();
        assert!(text.contains("Sessions (2 found):"));
        assert!(text.contains("session-1"));
    }

    #[test]
    fn test_sessions_limit() {
        let store = create_test_store();
        for i in 0..5 {
            store
                .put(&SessionRecord::new(format!("session-{}", i), "/project"))
                .unwrap();
        }

        let cmd = SessionsCommand::new(store);
        let output = cmd.run(&SessionsOptions {
            limit: 3,
            ..Default::default()
        });
        assert_eq!(output.count, 3);
    }

    #[test]
    fn test_sessions_json_output() {
        let store = create_test_store();
        store
            .put(&SessionRecord::new("json-session", "/project"))
            .unwrap();

        let cmd = SessionsCommand::new(store);
        let options = SessionsOptions {
            json: true,
            limit: 10,
            ..Default::default()
        };
        let output = cmd.run(&options);
        let json = cmd.format_output(&output, &options);

        let parsed: SessionsOutput = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.sessions[0].id, "json-session");
    }

    #[test]
    fn test_failure_format() {
        let output = SessionsOutput::failure("disk gone");
        assert_eq!(output.format_text(), "Sessions failed: disk gone");
    }
}
