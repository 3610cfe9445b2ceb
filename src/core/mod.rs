//! Core types and logic for cogcycle.
//!
//! This module contains the cycle state machine, the approval gate, the
//! proposal grammar, and the validation and reflection stages.

pub mod approval;
pub mod change;
pub mod engine;
pub mod parser;
pub mod prompts;
pub mod reflection;
pub mod state;
pub mod validation;

pub use approval::{
    ApprovalBroker, ApprovalDecision, ApprovalKind, ApprovalOutcome, ApprovalTicket,
    AutoApprovePolicy, Decision, PendingApproval,
};
pub use change::{normalize_path, render_changes, Change, Operation};
pub use engine::{CycleEngine, CycleReport, CycleStatus, EngineHandle};
pub use parser::{parse, parse_with_report};
pub use reflection::{Outcome, Reflection, ReflectionMetrics, SuccessBucket};
pub use state::{
    ContextSnapshot, CycleContext, CycleState, CycleSummary, SessionRecord, StateTransition,
    TransitionHistory, Turn,
};
pub use validation::{ValidationGate, ValidationSummary, ValidationVerdict};
