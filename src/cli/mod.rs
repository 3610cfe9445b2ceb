//! CLI commands for cogcycle.
//!
//! Each command follows the same shape: an `Options` struct, an `Output`
//! struct with `format_text`, and a command type whose `run` produces the
//! output.
//! - **Cycle**: run (interactive cycle with stdin approvals)
//! - **Inspection**: parse, reflections, sessions
//! - **Settings**: auto-approve

pub mod run;

pub mod parse;
pub mod reflections;
pub mod sessions;

pub mod auto_approve;

pub use auto_approve::{AutoApproveCommand, AutoApproveScope};
pub use parse::ParseCommand;
pub use reflections::ReflectionsCommand;
pub use run::RunCommand;
pub use sessions::SessionsCommand;
