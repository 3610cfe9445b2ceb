//! Cycle state types for cogcycle.
//!
//! These types represent the runtime state of one agent session: the cycle
//! state set and its transition table, the per-cycle context, the bounded
//! transition history, and the persisted session record.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::change::Change;
use crate::core::validation::ValidationSummary;
use crate::ports::ApplyResult;

/// Cycle state enum.
///
/// IDLE is the initial state. There is no terminal state: ERROR always
/// returns to IDLE, ready for a new goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleState {
    /// No cycle active.
    #[default]
    Idle,
    /// Selecting files for the context bundle.
    CuratingContext,
    /// Waiting for the context bundle to be approved.
    AwaitingContextApproval,
    /// Asking the model for a plan over the approved context.
    PlanningWithContext,
    /// Asking the model for concrete file operations.
    GeneratingProposal,
    /// Waiting for a human to approve the changeset.
    AwaitingProposalApproval,
    /// Validating and applying the approved changeset.
    ApplyingChangeset,
    /// Computing metrics and deciding whether to continue.
    Reflecting,
    /// Logging a failure before returning to IDLE.
    Error,
}

impl CycleState {
    /// Every declared state, in table order.
    pub fn all() -> &'static [CycleState] {
        &[
            CycleState::Idle,
            CycleState::CuratingContext,
            CycleState::AwaitingContextApproval,
            CycleState::PlanningWithContext,
            CycleState::GeneratingProposal,
            CycleState::AwaitingProposalApproval,
            CycleState::ApplyingChangeset,
            CycleState::Reflecting,
            CycleState::Error,
        ]
    }

    /// The transition table: states reachable from `self`.
    pub fn allowed_targets(&self) -> &'static [CycleState] {
        use CycleState as S;
        match self {
            S::Idle => &[S::CuratingContext],
            S::CuratingContext => &[S::AwaitingContextApproval, S::Error],
            S::AwaitingContextApproval => &[S::PlanningWithContext, S::CuratingContext, S::Idle],
            S::PlanningWithContext => &[S::GeneratingProposal, S::Error],
            S::GeneratingProposal => &[S::AwaitingProposalApproval, S::Error],
            S::AwaitingProposalApproval => {
                &[S::ApplyingChangeset, S::PlanningWithContext, S::Idle]
            }
            S::ApplyingChangeset => &[S::Reflecting, S::Error],
            S::Reflecting => &[S::Idle, S::CuratingContext],
            S::Error => &[S::Idle],
        }
    }

    /// Check whether the table allows `self -> to`.
    pub fn can_transition_to(&self, to: CycleState) -> bool {
        self.allowed_targets().contains(&to)
    }

    /// Check if this state waits on a human decision.
    pub fn is_awaiting_approval(&self) -> bool {
        matches!(
            self,
            CycleState::AwaitingContextApproval | CycleState::AwaitingProposalApproval
        )
    }

    /// Upper-case name used in logs and artifacts.
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleState::Idle => "IDLE",
            CycleState::CuratingContext => "CURATING_CONTEXT",
            CycleState::AwaitingContextApproval => "AWAITING_CONTEXT_APPROVAL",
            CycleState::PlanningWithContext => "PLANNING_WITH_CONTEXT",
            CycleState::GeneratingProposal => "GENERATING_PROPOSAL",
            CycleState::AwaitingProposalApproval => "AWAITING_PROPOSAL_APPROVAL",
            CycleState::ApplyingChangeset => "APPLYING_CHANGESET",
            CycleState::Reflecting => "REFLECTING",
            CycleState::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One context-bundle/proposal-bundle working unit within a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// 1-based turn number within the session.
    pub number: u32,
    /// Where the context bundle for this turn is written.
    pub context_path: String,
    /// Where the proposal bundle for this turn is written.
    pub proposal_path: String,
}

impl Turn {
    /// Allocate turn paths under `{sessions_root}/{session_id}/turn-{number}/`.
    pub fn allocate(sessions_root: &str, session_id: &str, number: u32) -> Self {
        let dir = turn_dir(sessions_root, session_id, number);
        Self {
            number,
            context_path: format!("{}/context.md", dir),
            proposal_path: format!("{}/proposal.md", dir),
        }
    }

    /// Path of the human-readable reflection artifact for this turn.
    pub fn reflection_path(&self) -> String {
        match self.context_path.rsplit_once('/') {
            Some((dir, _)) => format!("{}/reflection.md", dir),
            None => "reflection.md".to_string(),
        }
    }
}

fn turn_dir(sessions_root: &str, session_id: &str, number: u32) -> String {
    format!(
        "{}/{}/turn-{}",
        sessions_root.trim_end_matches('/'),
        session_id,
        number
    )
}

/// Mutable per-cycle state.
///
/// Exists only while a cycle is active: created by `start_cycle`, mutated by
/// state handlers, and cleared on return to IDLE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleContext {
    /// Current goal (annotated on reflection-driven continuation).
    pub goal: String,
    /// Goal as originally submitted.
    pub original_goal: String,
    /// Session this cycle belongs to.
    pub session_id: String,
    /// Current turn.
    pub turn: Turn,
    /// When the cycle started.
    pub start_time: DateTime<Utc>,
    /// Reflection-driven continuations taken so far.
    pub iterations: u32,
    /// Loop cap for revisions and continuations.
    pub max_iterations: u32,
    /// Revise decisions taken so far (both gates).
    pub revisions: u32,
    /// Paths selected during curation.
    pub selected_paths: Vec<String>,
    /// Path of the approved context bundle.
    pub context_bundle_path: Option<String>,
    /// Path of the proposal bundle.
    pub proposal_bundle_path: Option<String>,
    /// Plan text returned by the model.
    pub plan: Option<String>,
    /// Reviewer feedback from a proposal revise decision.
    pub proposal_feedback: Option<String>,
    /// Changes parsed from the model's proposal.
    pub proposed_changes: Vec<Change>,
    /// Changes the reviewer approved.
    pub approved_changes: Vec<Change>,
    /// Result reported by the bundle tool.
    pub apply_result: Option<ApplyResult>,
    /// Self-test summary from the validation gate.
    pub test_results: Option<ValidationSummary>,
    /// Checkpoint taken before apply.
    pub pre_apply_checkpoint: Option<String>,
    /// Checkpoint taken after a successful apply.
    pub post_apply_checkpoint: Option<String>,
}

impl CycleContext {
    /// Create a fresh context for a new goal.
    pub fn new(
        goal: impl Into<String>,
        session_id: impl Into<String>,
        turn: Turn,
        max_iterations: u32,
    ) -> Self {
        let goal = goal.into();
        Self {
            original_goal: goal.clone(),
            goal,
            session_id: session_id.into(),
            turn,
            start_time: Utc::now(),
            iterations: 0,
            max_iterations,
            revisions: 0,
            selected_paths: Vec::new(),
            context_bundle_path: None,
            proposal_bundle_path: None,
            plan: None,
            proposal_feedback: None,
            proposed_changes: Vec::new(),
            approved_changes: Vec::new(),
            apply_result: None,
            test_results: None,
            pre_apply_checkpoint: None,
            post_apply_checkpoint: None,
        }
    }

    /// Reset per-turn working data for a continuation.
    ///
    /// Keeps the cycle's start time so metrics cover the whole cycle.
    pub fn begin_turn(&mut self, turn: Turn, goal: impl Into<String>) {
        self.turn = turn;
        self.goal = goal.into();
        self.selected_paths.clear();
        self.context_bundle_path = None;
        self.proposal_bundle_path = None;
        self.plan = None;
        self.proposal_feedback = None;
        self.proposed_changes.clear();
        self.approved_changes.clear();
        self.apply_result = None;
        self.test_results = None;
        self.pre_apply_checkpoint = None;
        self.post_apply_checkpoint = None;
    }

    /// Lightweight snapshot for history entries and notifications.
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            session_id: self.session_id.clone(),
            goal: self.goal.clone(),
            turn_number: self.turn.number,
            iterations: self.iterations,
            revisions: self.revisions,
            proposed_changes: self.proposed_changes.len(),
            approved_changes: self.approved_changes.len(),
            context_bundle_path: self.context_bundle_path.clone(),
            proposal_bundle_path: self.proposal_bundle_path.clone(),
        }
    }
}

/// Summary of a cycle context without file bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub session_id: String,
    pub goal: String,
    pub turn_number: u32,
    pub iterations: u32,
    pub revisions: u32,
    pub proposed_changes: usize,
    pub approved_changes: usize,
    pub context_bundle_path: Option<String>,
    pub proposal_bundle_path: Option<String>,
}

/// One entry of the transition log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    /// State left.
    pub from: CycleState,
    /// State entered.
    pub to: CycleState,
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
    /// Milliseconds spent in `from`.
    pub duration_ms: u64,
    /// Context at the moment of transition, if a cycle was active.
    pub snapshot: Option<ContextSnapshot>,
    /// Set when a handler failure forced ERROR outside the table.
    #[serde(default)]
    pub forced: bool,
}

/// Append-only transition log that drops the oldest entries beyond a cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionHistory {
    entries: VecDeque<StateTransition>,
    limit: usize,
}

impl TransitionHistory {
    /// Create an empty history holding at most `limit` entries.
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit.min(64)),
            limit: limit.max(1),
        }
    }

    /// Append an entry, evicting the oldest if full.
    pub fn push(&mut self, entry: StateTransition) {
        if self.entries.len() == self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Most recent entry.
    pub fn last(&self) -> Option<&StateTransition> {
        self.entries.back()
    }

    /// Iterate oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &StateTransition> {
        self.entries.iter()
    }

    /// Entries recorded at or after `since`.
    pub fn since(&self, since: DateTime<Utc>) -> Vec<StateTransition> {
        self.entries
            .iter()
            .filter(|t| t.timestamp >= since)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of retained entries.
    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Persisted per-session record.
///
/// Holds the session-scoped auto-approve flag and a summary of each cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    /// Unique session identifier.
    pub id: String,
    /// Working directory the session was started in.
    pub cwd: String,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session was last updated.
    pub updated_at: DateTime<Utc>,
    /// Session-scoped context auto-approve flag.
    #[serde(default)]
    pub auto_approve_context: bool,
    /// Summaries of finished cycles.
    #[serde(default)]
    pub cycles: Vec<CycleSummary>,
}

impl SessionRecord {
    /// Create a new session record.
    pub fn new(id: impl Into<String>, cwd: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            cwd: cwd.into(),
            created_at: now,
            updated_at: now,
            auto_approve_context: false,
            cycles: Vec::new(),
        }
    }

    /// Record a finished cycle.
    pub fn add_cycle(&mut self, summary: CycleSummary) {
        self.cycles.push(summary);
        self.updated_at = Utc::now();
    }

    /// Update the record's updated_at timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Short record of one finished cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleSummary {
    pub goal: String,
    pub status: String,
    pub turns: u32,
    pub changes_applied: usize,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(from: CycleState, to: CycleState) -> StateTransition {
        StateTransition {
            from,
            to,
            timestamp: Utc::now(),
            duration_ms: 0,
            snapshot: None,
            forced: false,
        }
    }

    #[test]
    fn test_default_state_is_idle() {
        assert_eq!(CycleState::default(), CycleState::Idle);
    }

    #[test]
    fn test_table_matches_declared_transitions() {
        use CycleState as S;
        assert!(S::Idle.can_transition_to(S::CuratingContext));
        assert!(!S::Idle.can_transition_to(S::Error));
        assert!(S::AwaitingContextApproval.can_transition_to(S::Idle));
        assert!(!S::AwaitingContextApproval.can_transition_to(S::Error));
        assert!(S::AwaitingProposalApproval.can_transition_to(S::PlanningWithContext));
        assert!(S::Reflecting.can_transition_to(S::CuratingContext));
        assert!(!S::Reflecting.can_transition_to(S::Error));
        assert_eq!(S::Error.allowed_targets(), &[S::Idle]);
    }

    #[test]
    fn test_every_state_can_reach_idle() {
        for state in CycleState::all() {
            let mut frontier = vec![*state];
            let mut seen = vec![*state];
            while let Some(s) = frontier.pop() {
                for next in s.allowed_targets() {
                    if !seen.contains(next) {
                        seen.push(*next);
                        frontier.push(*next);
                    }
                }
            }
            assert!(seen.contains(&CycleState::Idle), "{} cannot reach IDLE", state);
        }
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&CycleState::AwaitingProposalApproval).unwrap();
        assert_eq!(json, "\"AWAITING_PROPOSAL_APPROVAL\"");
        assert_eq!(CycleState::CuratingContext.to_string(), "CURATING_CONTEXT");
    }

    #[test]
    fn test_turn_allocation() {
        let turn = Turn::allocate("/sessions/", "abc", 2);
        assert_eq!(turn.context_path, "/sessions/abc/turn-2/context.md");
        assert_eq!(turn.proposal_path, "/sessions/abc/turn-2/proposal.md");
        assert_eq!(turn.reflection_path(), "/sessions/abc/turn-2/reflection.md");
    }

    #[test]
    fn test_begin_turn_resets_working_data() {
        let mut ctx = CycleContext::new("goal", "s1", Turn::allocate("/s", "s1", 1), 10);
        ctx.proposed_changes.push(Change::delete("/a"));
        ctx.plan = Some("plan".to_string());
        let start = ctx.start_time;

        ctx.begin_turn(Turn::allocate("/s", "s1", 2), "goal v2");

        assert_eq!(ctx.turn.number, 2);
        assert_eq!(ctx.goal, "goal v2");
        assert_eq!(ctx.original_goal, "goal");
        assert!(ctx.proposed_changes.is_empty());
        assert!(ctx.plan.is_none());
        assert_eq!(ctx.start_time, start);
    }

    #[test]
    fn test_history_drops_oldest_beyond_limit() {
        let mut history = TransitionHistory::new(3);
        history.push(transition(CycleState::Idle, CycleState::CuratingContext));
        history.push(transition(
            CycleState::CuratingContext,
            CycleState::AwaitingContextApproval,
        ));
        history.push(transition(
            CycleState::AwaitingContextApproval,
            CycleState::PlanningWithContext,
        ));
        history.push(transition(
            CycleState::PlanningWithContext,
            CycleState::GeneratingProposal,
        ));

        assert_eq!(history.len(), 3);
        assert_eq!(
            history.iter().next().unwrap().from,
            CycleState::CuratingContext
        );
        assert_eq!(history.last().unwrap().to, CycleState::GeneratingProposal);
    }

    #[test]
    fn test_session_record_add_cycle() {
        let mut record = SessionRecord::new("s1", "/tmp");
        let before = record.updated_at;
        record.add_cycle(CycleSummary {
            goal: "g".to_string(),
            status: "completed".to_string(),
            turns: 1,
            changes_applied: 2,
            finished_at: Utc::now(),
        });
        assert_eq!(record.cycles.len(), 1);
        assert!(record.updated_at >= before);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_state() -> impl Strategy<Value = CycleState> {
            proptest::sample::select(CycleState::all().to_vec())
        }

        proptest! {
            // Property: ERROR only ever leads back to IDLE
            #[test]
            fn prop_error_only_returns_to_idle(to in arb_state()) {
                prop_assert_eq!(CycleState::Error.can_transition_to(to), to == CycleState::Idle);
            }

            // Property: no state transitions to itself
            #[test]
            fn prop_no_self_loops(state in arb_state()) {
                prop_assert!(!state.can_transition_to(state));
            }
        }
    }
}
