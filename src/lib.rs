//! cogcycle - human-gated cognitive cycle orchestrator
//!
//! cogcycle drives a coding agent through a fixed loop: curate context,
//! wait for approval, plan, propose a changeset, wait for approval, validate
//! and apply, then reflect. Reflection can feed a refined goal back into a
//! new turn. External effects go through the collaborator ports in
//! [`ports`], so the engine runs the same against real tools or in-memory
//! fakes.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod logging;
pub mod ports;
pub mod storage;
pub mod util;

pub use config::Config;
pub use core::{
    ApprovalKind, ApprovalOutcome, ApprovalTicket, Change, CycleContext, CycleEngine, CycleReport,
    CycleState, CycleStatus, EngineHandle, Operation, Reflection, SessionRecord,
};
pub use error::{CycleError, Result};
pub use events::{CycleEvent, EventBus};
pub use ports::Collaborators;
pub use storage::{FileSessionStore, MemorySessionStore, SessionStore};

// CLI commands
pub use cli::{
    AutoApproveCommand, ParseCommand, ReflectionsCommand, RunCommand, SessionsCommand,
};
