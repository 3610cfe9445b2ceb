//! Unified error types for cogcycle.
//!
//! Errors raised inside a cycle never escape the engine: they funnel through
//! the ERROR state, which logs them and returns to IDLE. Best-effort side
//! effects (checkpoints, reflection persistence, session flag lookups) use the
//! [`FailOpen`] helpers so a broken collaborator never aborts the primary cycle.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::core::state::CycleState;

/// The main error type for cogcycle operations.
#[derive(Error, Debug)]
pub enum CycleError {
    /// I/O errors from artifact, session, or journal files.
    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An external collaborator (model, bundle tool, tester, VCS) failed.
    #[error("{name} error: {message}")]
    Collaborator { name: String, message: String },

    /// JSON or TOML serialization errors.
    #[error("serialization error: {message}")]
    Serde { message: String },

    /// A transition that the table does not allow.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: CycleState, to: CycleState },

    /// Operation attempted in the wrong engine state.
    #[error("invalid state: {message}")]
    InvalidState { message: String },

    /// Configuration loading errors.
    #[error("config error: {message}")]
    Config { message: String },

    /// Malformed proposal text.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Self-test success rate fell below the threshold.
    #[error("validation failed: {summary}")]
    ValidationFailed { summary: String },

    /// The bundle tool reported a failed apply.
    #[error("apply failed: {message}")]
    ApplyFailed { message: String },

    /// Approval gate misuse (double registration, unknown decision).
    #[error("approval error: {message}")]
    Approval { message: String },

    /// Session not found in storage.
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// A state handler panicked.
    #[error("handler panicked in {state}: {message}")]
    Panic { state: CycleState, message: String },
}

/// A specialized Result type for cogcycle operations.
pub type Result<T> = std::result::Result<T, CycleError>;

impl CycleError {
    /// Create a storage error from an I/O error.
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Create a collaborator error.
    pub fn collaborator(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collaborator {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a serialization error.
    pub fn serde(message: impl Into<String>) -> Self {
        Self::Serde {
            message: message.into(),
        }
    }

    /// Create an invalid transition error.
    pub fn invalid_transition(from: CycleState, to: CycleState) -> Self {
        Self::InvalidTransition { from, to }
    }

    /// Create an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create a validation failure carrying the test summary.
    pub fn validation_failed(summary: impl Into<String>) -> Self {
        Self::ValidationFailed {
            summary: summary.into(),
        }
    }

    /// Create an apply failure.
    pub fn apply_failed(message: impl Into<String>) -> Self {
        Self::ApplyFailed {
            message: message.into(),
        }
    }

    /// Create an approval error.
    pub fn approval(message: impl Into<String>) -> Self {
        Self::Approval {
            message: message.into(),
        }
    }

    /// Create a session not found error.
    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        Self::SessionNotFound {
            session_id: session_id.into(),
        }
    }

    /// Short machine-readable category, used in ERROR diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Storage { .. } => "storage",
            Self::Collaborator { .. } => "collaborator",
            Self::Serde { .. } => "serde",
            Self::InvalidTransition { .. } => "transition",
            Self::InvalidState { .. } => "state",
            Self::Config { .. } => "config",
            Self::Parse { .. } => "parse",
            Self::ValidationFailed { .. } => "validation",
            Self::ApplyFailed { .. } => "apply",
            Self::Approval { .. } => "approval",
            Self::SessionNotFound { .. } => "session",
            Self::Panic { .. } => "panic",
        }
    }
}

impl From<io::Error> for CycleError {
    fn from(err: io::Error) -> Self {
        Self::Storage {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for CycleError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde {
            message: err.to_string(),
        }
    }
}

/// Trait for fail-open error handling.
///
/// Best-effort side effects log a warning and continue with a fallback.
pub trait FailOpen<T> {
    /// Handle an error by logging a warning and returning the default value.
    fn fail_open_default(self, context: &str) -> T
    where
        T: Default;

    /// Handle an error by logging a warning and returning the provided fallback.
    fn fail_open_with(self, context: &str, fallback: T) -> T;
}

impl<T> FailOpen<T> for Result<T> {
    fn fail_open_default(self, context: &str) -> T
    where
        T: Default,
    {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("{}: {} (fail-open: using default)", context, err);
                T::default()
            }
        }
    }

    fn fail_open_with(self, context: &str, fallback: T) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("{}: {} (fail-open: using fallback)", context, err);
                fallback
            }
        }
    }
}

/// Exit codes for the cogcycle CLI.
pub mod exit_codes {
    /// The command (or cycle) completed.
    pub const SUCCESS: i32 = 0;

    /// The command failed, or the cycle ended in ERROR.
    pub const ERROR: i32 = 1;

    /// The cycle was rejected or an approval timed out.
    pub const REJECTED: i32 = 2;

    /// The process panicked.
    pub const CRASH: i32 = 3;
}
