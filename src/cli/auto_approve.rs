//! Auto-approve command for cogcycle.
//!
//! Turns context auto-approval on or off, either for one session (stored in
//! the session record) or globally (stored in the user config). Proposals
//! always need an explicit decision regardless of these flags.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Result;
use crate::storage::SessionStore;

/// Where the flag is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoApproveScope {
    Session(String),
    Global,
}

/// Options for the auto-approve command.
#[derive(Debug, Clone, Default)]
pub struct AutoApproveOptions {
    pub json: bool,
    pub quiet: bool,
}

/// Output format for the auto-approve command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoApproveOutput {
    pub success: bool,
    /// `"session"` or `"global"`.
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AutoApproveOutput {
    fn new(scope: &AutoApproveScope, enabled: bool) -> Self {
        let (scope, session_id) = match scope {
            AutoApproveScope::Session(id) => ("session", Some(id.clone())),
            AutoApproveScope::Global => ("global", None),
        };
        Self {
            success: true,
            scope: scope.to_string(),
            session_id,
            enabled,
            error: None,
        }
    }

    fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    /// Format as human-readable text.
    pub fn format_text(&self) -> String {
        if !self.success {
            return format!(
                "Auto-approve failed: {}",
                self.error.as_deref().unwrap_or("unknown error")
            );
        }
        let state = if self.enabled { "on" } else { "off" };
        match self.session_id {
            Some(ref id) => format!("Context auto-approve {} for session {}", state, id),
            None => format!("Context auto-approve {} globally", state),
        }
    }
}

/// The auto-approve command implementation.
pub struct AutoApproveCommand<S: SessionStore> {
    store: S,
    cwd: String,
}

impl<S: SessionStore> AutoApproveCommand<S> {
    pub fn new(store: S, cwd: impl Into<String>) -> Self {
        Self {
            store,
            cwd: cwd.into(),
        }
    }

    /// Set the flag for `scope`.
    pub fn run(&self, scope: &AutoApproveScope, enabled: bool) -> AutoApproveOutput {
        let output = AutoApproveOutput::new(scope, enabled);
        let result = match scope {
            AutoApproveScope::Session(id) => self.set_session(id, enabled),
            AutoApproveScope::Global => set_global(enabled),
        };
        match result {
            Ok(()) => output,
            Err(e) => output.failed(e.to_string()),
        }
    }

    pub fn format_output(
        &self,
        output: &AutoApproveOutput,
        options: &AutoApproveOptions,
    ) -> String {
        if options.quiet {
            return String::new();
        }
        if options.json {
            serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string())
        } else {
            output.format_text()
        }
    }

    fn set_session(&self, id: &str, enabled: bool) -> Result<()> {
        let mut record = self.store.get_or_create(id, &self.cwd)?;
        record.auto_approve_context = enabled;
        record.touch();
        self.store.put(&record)?;
        tracing::info!(session_id = id, enabled, "session auto-approve updated");
        Ok(())
    }
}

/// Update only the user config file, leaving project overrides alone.
fn set_global(enabled: bool) -> Result<()> {
    let mut config = Config::load_user();
    config.approval.auto_approve_context = enabled;
    config.save_user()?;
    tracing::info!(enabled, "global auto-approve updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemorySessionStore;
    use serial_test::serial;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_session_flag_round_trip() {
        let store = Arc::new(MemorySessionStore::new());
        let cmd = AutoApproveCommand::new(store.clone(), "/project");
        let scope = AutoApproveScope::Session("s1".to_string());

        let output = cmd.run(&scope, true);
        assert!(output.success);
        assert!(store.get("s1").unwrap().unwrap().auto_approve_context);
        assert_eq!(output.format_text(), "Context auto-approve on for session s1");

        cmd.run(&scope, false);
        assert!(!store.get("s1").unwrap().unwrap().auto_approve_context);
    }

    #[test]
    #[serial]
    fn test_global_flag_written_to_user_config() {
        let home = TempDir::new().unwrap();
        std::env::set_var("COGCYCLE_HOME", home.path());

        let cmd = AutoApproveCommand::new(Arc::new(MemorySessionStore::new()), "/project");
        let output = cmd.run(&AutoApproveScope::Global, true);

        assert!(output.success, "{:?}", output.error);
        assert!(Config::load_user().approval.auto_approve_context);
        assert_eq!(output.format_text(), "Context auto-approve on globally");

        std::env::remove_var("COGCYCLE_HOME");
    }
}
