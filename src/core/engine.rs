//! Cycle engine for cogcycle.
//!
//! The engine owns the cycle state, the per-cycle context and the transition
//! history. It drives one goal through curation, approval, planning,
//! proposal, approval, validation, apply and reflection. All mutation goes
//! through [`CycleEngine::transition_to`] or a state handler; other tasks
//! interact through an [`EngineHandle`] and the event bus.
//!
//! Handler failures never escape. An error or panic inside a handler is
//! caught at the dispatch boundary and routed through ERROR, which reports
//! the failure and returns to IDLE.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use crate::config::Config;
use crate::core::approval::{
    ApprovalBroker, ApprovalKind, ApprovalOutcome, ApprovalTicket, AutoApprovePolicy, Decision,
};
use crate::core::parser;
use crate::core::prompts;
use crate::core::reflection::{self, Reflection};
use crate::core::state::{
    CycleContext, CycleState, CycleSummary, StateTransition, TransitionHistory, Turn,
};
use crate::core::validation::ValidationGate;
use crate::error::{CycleError, FailOpen, Result};
use crate::events::{CycleEvent, EventBus};
use crate::ports::{ApplyOptions, Collaborators, CommitMetadata, CompletionOptions};
use crate::storage::SessionStore;

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// Reflection finished without asking for another iteration.
    Completed,
    /// A reviewer rejected the context or the proposal.
    Rejected,
    /// An approval window closed without a decision.
    TimedOut,
    /// The cycle went through ERROR.
    Failed,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Completed => "completed",
            CycleStatus::Rejected => "rejected",
            CycleStatus::TimedOut => "timed_out",
            CycleStatus::Failed => "failed",
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        use crate::error::exit_codes;
        match self {
            CycleStatus::Completed => exit_codes::SUCCESS,
            CycleStatus::Rejected | CycleStatus::TimedOut => exit_codes::REJECTED,
            CycleStatus::Failed => exit_codes::ERROR,
        }
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of one `run_cycle` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub session_id: String,
    pub goal: String,
    pub status: CycleStatus,
    /// Turns used, including continuations.
    pub turns: u32,
    pub reflections: Vec<Reflection>,
    /// Paths written or deleted across all turns.
    pub applied_paths: Vec<String>,
    /// Diagnostic from ERROR, if the cycle failed.
    pub error: Option<String>,
}

/// Cloneable handle for observing and steering a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    bus: EventBus,
    broker: ApprovalBroker,
    pause: Arc<watch::Sender<bool>>,
    state: watch::Receiver<CycleState>,
}

impl EngineHandle {
    /// Subscribe to cycle events. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<CycleEvent> {
        self.bus.subscribe()
    }

    /// Resolve the gate identified by `ticket` with `decision`.
    ///
    /// Fails when no gate is waiting, including after a timeout, and when
    /// `ticket` belongs to a gate that is no longer pending.
    pub fn decide(&self, ticket: ApprovalTicket, decision: Decision) -> Result<ApprovalKind> {
        self.broker.decide(ticket, decision)
    }

    pub fn approve(&self, ticket: ApprovalTicket) -> Result<ApprovalKind> {
        self.decide(ticket, Decision::Approve)
    }

    pub fn reject(&self, ticket: ApprovalTicket) -> Result<ApprovalKind> {
        self.decide(ticket, Decision::Reject)
    }

    /// Send the gate back with feedback.
    pub fn revise(&self, ticket: ApprovalTicket, feedback: impl Into<String>) -> Result<ApprovalKind> {
        self.decide(ticket, Decision::Revise(feedback.into()))
    }

    /// Kind of the gate currently waiting, if any.
    pub fn pending_approval(&self) -> Option<ApprovalKind> {
        self.broker.pending()
    }

    /// Ticket of the gate currently waiting, if any.
    pub fn pending_ticket(&self) -> Option<ApprovalTicket> {
        self.broker.pending_ticket()
    }

    /// Pause before the next state handler runs.
    pub fn pause(&self) {
        self.pause.send_replace(true);
    }

    pub fn resume(&self) {
        self.pause.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.pause.borrow()
    }

    /// Current engine state.
    pub fn state(&self) -> CycleState {
        *self.state.borrow()
    }

    /// A receiver that tracks the engine state.
    pub fn state_watch(&self) -> watch::Receiver<CycleState> {
        self.state.clone()
    }
}

/// The cycle state machine.
pub struct CycleEngine {
    config: Config,
    collaborators: Collaborators,
    validation: ValidationGate,
    sessions: Option<Arc<dyn SessionStore>>,
    session_id: String,
    cwd: String,

    state: CycleState,
    context: Option<CycleContext>,
    history: TransitionHistory,
    entered_at: Instant,
    next_turn: u32,

    bus: EventBus,
    broker: ApprovalBroker,
    pause_tx: Arc<watch::Sender<bool>>,
    pause_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<CycleState>,

    last_error: Option<String>,
    run: RunTracker,
}

/// Per-`run_cycle` bookkeeping.
#[derive(Debug, Default)]
struct RunTracker {
    status: Option<CycleStatus>,
    reflections: Vec<Reflection>,
    applied_paths: Vec<String>,
    turns: u32,
    error: Option<String>,
}

impl CycleEngine {
    /// Create an engine with a fresh session id.
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        let validation =
            ValidationGate::new(collaborators.tester.clone(), config.validation.clone());
        let (pause_tx, pause_rx) = watch::channel(false);
        let (state_tx, _) = watch::channel(CycleState::Idle);
        let history = TransitionHistory::new(config.cycle.history_limit);
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        Self {
            config,
            collaborators,
            validation,
            sessions: None,
            session_id: uuid::Uuid::new_v4().to_string(),
            cwd,
            state: CycleState::Idle,
            context: None,
            history,
            entered_at: Instant::now(),
            next_turn: 1,
            bus: EventBus::default(),
            broker: ApprovalBroker::new(),
            pause_tx: Arc::new(pause_tx),
            pause_rx,
            state_tx,
            last_error: None,
            run: RunTracker::default(),
        }
    }

    /// Persist session flags and cycle summaries in `store`.
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    /// Resume an existing session id.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            bus: self.bus.clone(),
            broker: self.broker.clone(),
            pause: Arc::clone(&self.pause_tx),
            state: self.state_tx.subscribe(),
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Active cycle context. `None` exactly when the engine is IDLE.
    pub fn context(&self) -> Option<&CycleContext> {
        self.context.as_ref()
    }

    pub fn history(&self) -> &TransitionHistory {
        &self.history
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Begin a new cycle for `goal`.
    ///
    /// Fails without touching any state unless the engine is IDLE.
    pub fn start_cycle(&mut self, goal: impl Into<String>) -> Result<()> {
        if self.state != CycleState::Idle {
            tracing::warn!(state = %self.state, "start_cycle ignored: cycle already active");
            return Err(CycleError::invalid_state(format!(
                "cannot start a cycle in {}",
                self.state
            )));
        }

        let goal = goal.into();
        let turn = self.allocate_turn();
        self.context = Some(CycleContext::new(
            goal.clone(),
            self.session_id.clone(),
            turn,
            self.config.cycle.max_iterations,
        ));

        if let Some(ref store) = self.sessions {
            store
                .get_or_create(&self.session_id, &self.cwd)
                .map(|_| ())
                .fail_open_default("registering session");
        }

        tracing::info!(session_id = %self.session_id, goal = %goal, "cycle started");
        self.bus.publish(CycleEvent::CycleStarted {
            session_id: self.session_id.clone(),
            goal,
        });

        self.transition_to(CycleState::CuratingContext)
    }

    /// Move to `to` if the transition table allows it.
    ///
    /// An invalid target leaves state, context and history untouched. Leaving
    /// IDLE requires a context, so cycles begin through [`Self::start_cycle`].
    pub fn transition_to(&mut self, to: CycleState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            tracing::warn!(from = %self.state, to = %to, "invalid transition rejected");
            return Err(CycleError::invalid_transition(self.state, to));
        }
        if self.state == CycleState::Idle && self.context.is_none() {
            tracing::warn!(to = %to, "transition out of IDLE without a cycle rejected");
            return Err(CycleError::invalid_state("no active cycle; use start_cycle"));
        }
        self.record_transition(to, false);
        Ok(())
    }

    fn record_transition(&mut self, to: CycleState, forced: bool) {
        let from = self.state;
        let now = Instant::now();
        let snapshot = self.context.as_ref().map(CycleContext::snapshot);

        self.history.push(StateTransition {
            from,
            to,
            timestamp: Utc::now(),
            duration_ms: now.duration_since(self.entered_at).as_millis() as u64,
            snapshot: snapshot.clone(),
            forced,
        });
        self.state = to;
        self.entered_at = now;
        if to == CycleState::Idle {
            self.context = None;
        }
        self.state_tx.send_replace(to);

        tracing::debug!(from = %from, to = %to, forced, "state entered");
        self.bus.publish(CycleEvent::StateEntered { from, to, snapshot });
    }

    fn allocate_turn(&mut self) -> Turn {
        let turn = Turn::allocate(
            &self.config.cycle.sessions_root,
            &self.session_id,
            self.next_turn,
        );
        self.next_turn += 1;
        self.run.turns += 1;
        turn
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Run the handler for the current state.
    ///
    /// Errors and panics are caught here and routed through ERROR.
    pub async fn execute_state(&mut self) {
        let state = self.state;
        let outcome = AssertUnwindSafe(self.dispatch(state)).catch_unwind().await;

        let err = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err,
            Err(payload) => CycleError::Panic {
                state,
                message: panic_message(payload),
            },
        };
        self.fail(err);
    }

    /// Drive `goal` from IDLE back to IDLE.
    pub async fn run_cycle(&mut self, goal: impl Into<String>) -> Result<CycleReport> {
        let goal = goal.into();
        self.run = RunTracker::default();
        self.start_cycle(goal.clone())?;

        while self.state != CycleState::Idle {
            self.wait_if_paused().await;
            self.execute_state().await;
        }

        let run = std::mem::take(&mut self.run);
        Ok(CycleReport {
            session_id: self.session_id.clone(),
            goal,
            status: run.status.unwrap_or(CycleStatus::Completed),
            turns: run.turns,
            reflections: run.reflections,
            applied_paths: run.applied_paths,
            error: run.error,
        })
    }

    async fn wait_if_paused(&mut self) {
        if !*self.pause_rx.borrow_and_update() {
            return;
        }

        tracing::info!(state = %self.state, "cycle paused");
        self.bus.publish(CycleEvent::CyclePaused { state: self.state });

        loop {
            if !*self.pause_rx.borrow_and_update() {
                break;
            }
            if self.pause_rx.changed().await.is_err() {
                break;
            }
        }

        tracing::info!(state = %self.state, "cycle resumed");
        self.bus.publish(CycleEvent::CycleResumed { state: self.state });
    }

    async fn dispatch(&mut self, state: CycleState) -> Result<()> {
        match state {
            CycleState::Idle => Ok(()),
            CycleState::CuratingContext => self.handle_curating().await,
            CycleState::AwaitingContextApproval => self.handle_context_approval().await,
            CycleState::PlanningWithContext => self.handle_planning().await,
            CycleState::GeneratingProposal => self.handle_generating().await,
            CycleState::AwaitingProposalApproval => self.handle_proposal_approval().await,
            CycleState::ApplyingChangeset => self.handle_applying().await,
            CycleState::Reflecting => self.handle_reflecting().await,
            CycleState::Error => {
                self.handle_error();
                Ok(())
            }
        }
    }

    /// Enter ERROR with `err` and run the ERROR handler immediately.
    ///
    /// In IDLE there is no cycle to fail; the error is logged and any stale
    /// diagnostic is dropped.
    fn fail(&mut self, err: CycleError) {
        tracing::error!(state = %self.state, kind = err.kind(), error = %err, "cycle failed");

        match self.state {
            CycleState::Idle => {
                self.last_error = None;
                return;
            }
            CycleState::Error => {}
            state if state.can_transition_to(CycleState::Error) => {
                self.record_transition(CycleState::Error, false)
            }
            _ => self.record_transition(CycleState::Error, true),
        }
        self.last_error = Some(err.to_string());
        self.handle_error();
    }

    fn ctx(&self) -> Result<&CycleContext> {
        self.context
            .as_ref()
            .ok_or_else(|| CycleError::invalid_state("no active cycle"))
    }

    fn ctx_mut(&mut self) -> Result<&mut CycleContext> {
        self.context
            .as_mut()
            .ok_or_else(|| CycleError::invalid_state("no active cycle"))
    }

    fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: self.config.model.temperature,
            max_output_tokens: self.config.model.max_output_tokens,
        }
    }

    // =========================================================================
    // State handlers
    // =========================================================================

    async fn handle_curating(&mut self) -> Result<()> {
        let (goal, context_path) = {
            let ctx = self.ctx()?;
            (ctx.goal.clone(), ctx.turn.context_path.clone())
        };

        let sessions_root = format!(
            "{}/",
            self.config.cycle.sessions_root.trim_end_matches('/')
        );
        let candidates: Vec<String> = self
            .collaborators
            .artifacts
            .list()
            .await?
            .into_iter()
            .map(|meta| meta.path)
            .filter(|path| !path.starts_with(&sessions_root))
            .collect();

        let reply = self
            .collaborators
            .model
            .complete(&prompts::curate(&goal, &candidates), self.completion_options())
            .await?;
        let selected = prompts::select_paths(
            &reply.text,
            &candidates,
            self.config.cycle.max_context_files,
        );
        tracing::debug!(selected = selected.len(), candidates = candidates.len(), "context curated");

        let bundle = self
            .collaborators
            .bundles
            .create_context_bundle(&selected, &goal, &context_path)
            .await?;
        if !bundle.success {
            return Err(CycleError::collaborator("bundle tool", bundle.message));
        }

        let ctx = self.ctx_mut()?;
        ctx.selected_paths = selected;
        ctx.context_bundle_path = Some(bundle.path);
        self.transition_to(CycleState::AwaitingContextApproval)
    }

    async fn handle_context_approval(&mut self) -> Result<()> {
        let timeout = self.config.approval.context_timeout();
        match self.await_approval(ApprovalKind::Context, timeout).await? {
            ApprovalOutcome::Approved { .. } => {
                self.transition_to(CycleState::PlanningWithContext)
            }
            ApprovalOutcome::Rejected => self.end_cycle(CycleStatus::Rejected),
            ApprovalOutcome::TimedOut => self.end_cycle(CycleStatus::TimedOut),
            ApprovalOutcome::Revise { feedback } => {
                self.count_revision()?;
                let ctx = self.ctx_mut()?;
                ctx.goal = format!("{}\n\nReviewer feedback: {}", ctx.goal, feedback);
                self.transition_to(CycleState::CuratingContext)
            }
        }
    }

    async fn handle_planning(&mut self) -> Result<()> {
        let (goal, bundle_path, feedback) = {
            let ctx = self.ctx()?;
            (
                ctx.goal.clone(),
                ctx.context_bundle_path.clone(),
                ctx.proposal_feedback.clone(),
            )
        };
        let bundle_path =
            bundle_path.ok_or_else(|| CycleError::invalid_state("no approved context bundle"))?;
        let bundle = self
            .collaborators
            .artifacts
            .read(&bundle_path)
            .await?
            .ok_or_else(|| {
                CycleError::collaborator("artifact store", format!("missing {}", bundle_path))
            })?;

        let reply = self
            .collaborators
            .model
            .complete(
                &prompts::plan(&goal, &bundle, feedback.as_deref()),
                self.completion_options(),
            )
            .await?;

        self.ctx_mut()?.plan = Some(reply.text);
        self.transition_to(CycleState::GeneratingProposal)
    }

    async fn handle_generating(&mut self) -> Result<()> {
        let (goal, plan, proposal_path) = {
            let ctx = self.ctx()?;
            (
                ctx.goal.clone(),
                ctx.plan.clone().unwrap_or_default(),
                ctx.turn.proposal_path.clone(),
            )
        };

        let reply = self
            .collaborators
            .model
            .complete(&prompts::proposal(&goal, &plan), self.completion_options())
            .await?;
        let changes = parser::parse(&reply.text);

        let bundle = self
            .collaborators
            .bundles
            .create_proposal_bundle(&changes, &plan, &proposal_path)
            .await?;
        if !bundle.success {
            return Err(CycleError::collaborator("bundle tool", bundle.message));
        }

        let ctx = self.ctx_mut()?;
        ctx.proposed_changes = changes;
        ctx.proposal_bundle_path = Some(bundle.path);
        self.transition_to(CycleState::AwaitingProposalApproval)
    }

    async fn handle_proposal_approval(&mut self) -> Result<()> {
        let timeout = self.config.approval.proposal_timeout();
        match self.await_approval(ApprovalKind::Proposal, timeout).await? {
            ApprovalOutcome::Approved { .. } => {
                let ctx = self.ctx_mut()?;
                ctx.approved_changes = ctx.proposed_changes.clone();
                self.transition_to(CycleState::ApplyingChangeset)
            }
            ApprovalOutcome::Rejected => self.end_cycle(CycleStatus::Rejected),
            ApprovalOutcome::TimedOut => self.end_cycle(CycleStatus::TimedOut),
            ApprovalOutcome::Revise { feedback } => {
                self.count_revision()?;
                self.ctx_mut()?.proposal_feedback = Some(feedback);
                self.transition_to(CycleState::PlanningWithContext)
            }
        }
    }

    async fn handle_applying(&mut self) -> Result<()> {
        let verdict = self.validation.validate().await;
        self.ctx_mut()?.test_results = Some(verdict.summary.clone());
        if !verdict.ok {
            return Err(CycleError::validation_failed(verdict.summary.message));
        }

        let (turn, bundle_path) = {
            let ctx = self.ctx()?;
            (ctx.turn.number, ctx.proposal_bundle_path.clone())
        };
        let bundle_path =
            bundle_path.ok_or_else(|| CycleError::invalid_state("no proposal bundle"))?;
        let checkpoints = Arc::clone(&self.collaborators.checkpoints);

        let pre = checkpoints
            .create_checkpoint(&format!("pre-apply turn {}", turn))
            .await
            .map(|c| Some(c.id))
            .fail_open_default("pre-apply checkpoint");
        self.ctx_mut()?.pre_apply_checkpoint = pre.clone();

        let result = self
            .collaborators
            .bundles
            .apply_bundle(&bundle_path, ApplyOptions::default())
            .await?;
        self.ctx_mut()?.apply_result = Some(result.clone());
        if !result.success {
            return Err(CycleError::apply_failed(result.message));
        }
        tracing::info!(applied = result.changes_applied.len(), "changeset applied");

        let post = checkpoints
            .create_checkpoint(&format!("post-apply turn {}", turn))
            .await
            .map(|c| Some(c.id))
            .fail_open_default("post-apply checkpoint");
        self.ctx_mut()?.post_apply_checkpoint = post.clone();

        let metadata = CommitMetadata {
            session_id: self.session_id.clone(),
            turn,
            checkpoint_id: post.or(pre),
            changes: result.changes_applied.clone(),
        };
        checkpoints
            .commit_changes(&format!("cogcycle: apply turn {}", turn), metadata)
            .await
            .map(|_| ())
            .fail_open_default("committing changes");

        self.run.applied_paths.extend(result.changes_applied);
        self.transition_to(CycleState::Reflecting)
    }

    async fn handle_reflecting(&mut self) -> Result<()> {
        let ctx = self.ctx()?.clone();
        let history = self.history.since(ctx.start_time);
        let reflection = reflection::reflect(&ctx, &history, &self.config.reflection, Utc::now());

        self.collaborators
            .reflections
            .add_reflection(&reflection)
            .await
            .map(|_| ())
            .fail_open_default("persisting reflection");
        self.collaborators
            .artifacts
            .write(
                &ctx.turn.reflection_path(),
                &reflection::render_markdown(&reflection),
            )
            .await
            .fail_open_default("writing reflection artifact");

        tracing::info!(
            outcome = reflection.outcome.as_str(),
            success_rate = reflection.metrics.success_rate,
            should_continue = reflection.should_continue,
            "reflection complete"
        );
        self.bus.publish(CycleEvent::ReflectionComplete {
            reflection: Box::new(reflection.clone()),
        });
        self.run.reflections.push(reflection.clone());

        match reflection.refined_goal {
            Some(goal) if reflection.should_continue => {
                let turn = self.allocate_turn();
                let ctx = self.ctx_mut()?;
                ctx.iterations += 1;
                ctx.begin_turn(turn, goal);
                self.transition_to(CycleState::CuratingContext)
            }
            _ => self.end_cycle(CycleStatus::Completed),
        }
    }

    fn handle_error(&mut self) {
        let message = self
            .last_error
            .take()
            .unwrap_or_else(|| "unknown error".to_string());

        self.bus.publish(CycleEvent::Error {
            message: message.clone(),
            last_transition: self.history.last().cloned(),
            snapshot: self.context.as_ref().map(CycleContext::snapshot),
        });
        self.run.error = Some(message);

        if self.end_cycle(CycleStatus::Failed).is_err() {
            self.record_transition(CycleState::Idle, true);
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Wait on a gate, honouring the auto-approve policy for context.
    async fn await_approval(
        &mut self,
        kind: ApprovalKind,
        timeout: Duration,
    ) -> Result<ApprovalOutcome> {
        let policy = AutoApprovePolicy::new(
            self.session_auto_approve(),
            self.config.approval.auto_approve_context,
        );

        let outcome = if policy.allows(kind) {
            tracing::info!(kind = %kind, "auto-approved");
            ApprovalOutcome::Approved { auto: true }
        } else {
            let pending = self.broker.register(kind)?;
            self.bus.publish(CycleEvent::ApprovalRequested {
                ticket: pending.ticket(),
                context: Box::new(self.ctx()?.clone()),
            });
            let outcome = pending.wait(timeout).await;
            if outcome == ApprovalOutcome::TimedOut {
                tracing::warn!(kind = %kind, timeout_secs = timeout.as_secs(), "approval timed out");
            }
            outcome
        };

        self.bus.publish(CycleEvent::ApprovalResolved {
            kind,
            outcome: outcome.clone(),
        });
        Ok(outcome)
    }

    fn session_auto_approve(&self) -> bool {
        let Some(ref store) = self.sessions else {
            return false;
        };
        store
            .get(&self.session_id)
            .map(|record| record.map(|r| r.auto_approve_context).unwrap_or(false))
            .fail_open_default("reading session auto-approve flag")
    }

    fn count_revision(&mut self) -> Result<()> {
        let ctx = self.ctx_mut()?;
        ctx.revisions += 1;
        if ctx.revisions > ctx.max_iterations {
            return Err(CycleError::invalid_state(format!(
                "revision limit of {} reached",
                ctx.max_iterations
            )));
        }
        Ok(())
    }

    /// Record the cycle outcome and return to IDLE.
    fn end_cycle(&mut self, status: CycleStatus) -> Result<()> {
        if let Some(ctx) = self.context.as_ref() {
            let summary = CycleSummary {
                goal: ctx.original_goal.clone(),
                status: status.as_str().to_string(),
                turns: self.run.turns,
                changes_applied: self.run.applied_paths.len(),
                finished_at: Utc::now(),
            };
            self.persist_summary(summary);
        }

        self.run.status = Some(status);
        self.transition_to(CycleState::Idle)?;

        tracing::info!(session_id = %self.session_id, status = %status, "cycle finished");
        self.bus.publish(CycleEvent::CycleCompleted {
            session_id: self.session_id.clone(),
            status,
        });
        Ok(())
    }

    fn persist_summary(&self, summary: CycleSummary) {
        let Some(ref store) = self.sessions else {
            return;
        };
        store
            .get_or_create(&self.session_id, &self.cwd)
            .and_then(|mut record| {
                record.add_cycle(summary);
                store.put(&record)
            })
            .fail_open_default("recording cycle summary");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{
        ArtifactBundleTool, ArtifactStore, MemoryArtifactStore, MemoryReflectionStore,
        ScriptedModel, SnapshotCheckpointStore,
    };

    fn engine_with(model: ScriptedModel) -> CycleEngine {
        let artifacts: Arc<dyn ArtifactStore> =
            Arc::new(MemoryArtifactStore::with_files([("/src/lib.rs", "pub fn a() {}")]));
        let collaborators = Collaborators {
            artifacts: artifacts.clone(),
            model: Arc::new(model),
            bundles: Arc::new(ArtifactBundleTool::new(artifacts.clone())),
            tester: None,
            checkpoints: Arc::new(SnapshotCheckpointStore::new(artifacts)),
            reflections: Arc::new(MemoryReflectionStore::new()),
        };
        CycleEngine::new(Config::default(), collaborators)
    }

    #[test]
    fn test_new_engine_is_idle_without_context() {
        let engine = engine_with(ScriptedModel::new(Vec::<String>::new()));
        assert_eq!(engine.state(), CycleState::Idle);
        assert!(engine.context().is_none());
        assert!(engine.history().is_empty());
    }

    #[test]
    fn test_start_cycle_enters_curating() {
        let mut engine = engine_with(ScriptedModel::new(Vec::<String>::new()));
        engine.start_cycle("add logging").unwrap();

        assert_eq!(engine.state(), CycleState::CuratingContext);
        assert_eq!(engine.context().unwrap().goal, "add logging");
        assert_eq!(engine.history().len(), 1);
    }

    #[test]
    fn test_start_cycle_when_active_is_noop() {
        let mut engine = engine_with(ScriptedModel::new(Vec::<String>::new()));
        engine.start_cycle("first").unwrap();
        let history_len = engine.history().len();

        assert!(engine.start_cycle("second").is_err());
        assert_eq!(engine.context().unwrap().goal, "first");
        assert_eq!(engine.history().len(), history_len);
    }

    #[test]
    fn test_invalid_transition_changes_nothing() {
        let mut engine = engine_with(ScriptedModel::new(Vec::<String>::new()));
        engine.start_cycle("goal").unwrap();
        let context = engine.context().cloned();
        let history = engine.history().clone();

        let err = engine.transition_to(CycleState::Reflecting).unwrap_err();

        assert!(matches!(err, CycleError::InvalidTransition { .. }));
        assert_eq!(engine.state(), CycleState::CuratingContext);
        assert_eq!(engine.context().cloned(), context);
        assert_eq!(engine.history(), &history);
    }

    #[test]
    fn test_transition_to_idle_clears_context() {
        let mut engine = engine_with(ScriptedModel::new(Vec::<String>::new()));
        engine.start_cycle("goal").unwrap();
        engine.transition_to(CycleState::AwaitingContextApproval).unwrap();
        engine.transition_to(CycleState::Idle).unwrap();

        assert!(engine.context().is_none());
        assert_eq!(engine.handle().state(), CycleState::Idle);
    }

    #[tokio::test]
    async fn test_model_failure_routes_through_error_to_idle() {
        let mut engine = engine_with(ScriptedModel::new(Vec::<String>::new()));
        let mut events = engine.handle().subscribe();

        let report = engine.run_cycle("goal").await.unwrap();

        assert_eq!(report.status, CycleStatus::Failed);
        assert!(report.error.unwrap().contains("script exhausted"));
        assert_eq!(engine.state(), CycleState::Idle);
        assert!(engine.context().is_none());

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            if let CycleEvent::Error { last_transition, .. } = event {
                saw_error = true;
                assert_eq!(last_transition.unwrap().to, CycleState::Error);
            }
        }
        assert!(saw_error);
    }

    #[test]
    fn test_fail_in_idle_drops_stale_error() {
        let mut engine = engine_with(ScriptedModel::new(Vec::<String>::new()));
        engine.last_error = Some("stale".to_string());

        engine.fail(CycleError::invalid_state("late failure"));

        assert_eq!(engine.state(), CycleState::Idle);
        assert!(engine.last_error.is_none());
        assert!(engine.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_refuses_decision_for_resolved_gate() {
        let mut engine = engine_with(ScriptedModel::repeating(["/src/lib.rs"]));
        let handle = engine.handle();
        let mut events = handle.subscribe();

        let task = tokio::spawn(async move {
            let report = engine.run_cycle("goal").await.unwrap();
            (engine, report)
        });

        let mut tickets = Vec::new();
        while tickets.len() < 2 {
            if let CycleEvent::ApprovalRequested { ticket, .. } = events.recv().await.unwrap() {
                tickets.push(ticket);
                if tickets.len() == 1 {
                    handle.revise(ticket, "wider").unwrap();
                }
            }
        }

        assert!(handle.approve(tickets[0]).is_err());
        assert_eq!(handle.pending_ticket(), Some(tickets[1]));
        handle.reject(tickets[1]).unwrap();

        let (_, report) = task.await.unwrap();
        assert_eq!(report.status, CycleStatus::Rejected);
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("bang".to_string())), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "unknown panic");
    }

    #[test]
    fn test_status_exit_codes() {
        assert_eq!(CycleStatus::Completed.exit_code(), 0);
        assert_eq!(CycleStatus::Failed.exit_code(), 1);
        assert_eq!(CycleStatus::Rejected.exit_code(), 2);
        assert_eq!(CycleStatus::TimedOut.exit_code(), 2);
    }

    #[test]
    fn test_leaving_idle_requires_start_cycle() {
        let mut engine = engine_with(ScriptedModel::new(Vec::<String>::new()));

        let err = engine.transition_to(CycleState::CuratingContext).unwrap_err();

        assert!(matches!(err, CycleError::InvalidState { .. }));
        assert_eq!(engine.state(), CycleState::Idle);
        assert!(engine.history().is_empty());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Step {
            Start,
            Transition(CycleState),
        }

        fn arb_step() -> impl Strategy<Value = Step> {
            prop_oneof![
                1 => Just(Step::Start),
                6 => proptest::sample::select(CycleState::all().to_vec()).prop_map(Step::Transition),
            ]
        }

        proptest! {
            // Property: any sequence of starts and transitions keeps state,
            // context and history consistent with the table
            #[test]
            fn prop_engine_stays_consistent(steps in proptest::collection::vec(arb_step(), 0..80)) {
                let mut engine = engine_with(ScriptedModel::new(Vec::<String>::new()));

                for step in steps {
                    let before = engine.state();
                    let last_before = engine.history().last().cloned();
                    let result = match step {
                        Step::Start => engine.start_cycle("goal"),
                        Step::Transition(to) => engine.transition_to(to),
                    };

                    if result.is_err() {
                        prop_assert_eq!(engine.state(), before);
                        prop_assert_eq!(engine.history().last().cloned(), last_before);
                    }
                    prop_assert!(CycleState::all().contains(&engine.state()));
                    prop_assert_eq!(engine.context().is_some(), engine.state() != CycleState::Idle);
                    prop_assert_eq!(engine.handle().state(), engine.state());
                    for entry in engine.history().iter().filter(|t| !t.forced) {
                        prop_assert!(entry.from.can_transition_to(entry.to));
                    }
                }
            }
        }
    }
}
