//! Run command for cogcycle.
//!
//! Drives one goal through a full cycle. Approval requests are printed to
//! stderr and answered line by line from an input stream (stdin in the
//! binary): `approve`, `reject`, or `revise <feedback>`. `approve` and
//! `reject` may name their gate (`approve proposal`); a line naming a
//! different gate than the one shown is discarded. Every line is delivered
//! with the ticket of the request it answers, so it can never resolve a later
//! gate. End of input rejects whatever is pending.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::config::{project_commits_path, project_reflections_path, Config};
use crate::core::approval::{ApprovalKind, ApprovalTicket, Decision};
use crate::core::engine::{CycleEngine, CycleReport, CycleStatus, EngineHandle};
use crate::core::state::CycleContext;
use crate::error::{exit_codes, Result};
use crate::events::CycleEvent;
use crate::ports::{
    ArtifactBundleTool, ArtifactStore, Collaborators, CommandModel, CommandSelfTester,
    FileArtifactStore, JsonlJournal, JsonlReflectionStore, SelfTester, SnapshotCheckpointStore,
};
use crate::storage::SessionStore;

/// Options for the run command.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress progress and result output. Approval prompts still appear.
    pub quiet: bool,
    /// Continue an existing session instead of starting a new one.
    pub session_id: Option<String>,
}

/// Output format for the run command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CycleStatus>,
    pub session_id: String,
    pub goal: String,
    pub turns: u32,
    pub applied_paths: Vec<String>,
    /// Number of reflections produced.
    pub reflections: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunOutput {
    fn from_report(report: CycleReport) -> Self {
        Self {
            success: report.status == CycleStatus::Completed,
            status: Some(report.status),
            session_id: report.session_id,
            goal: report.goal,
            turns: report.turns,
            applied_paths: report.applied_paths,
            reflections: report.reflections.len(),
            error: report.error,
        }
    }

    fn failure(session_id: &str, goal: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            status: None,
            session_id: session_id.to_string(),
            goal: goal.to_string(),
            turns: 0,
            applied_paths: vec![],
            reflections: 0,
            error: Some(error.into()),
        }
    }

    /// Process exit code for this run.
    pub fn exit_code(&self) -> i32 {
        self.status
            .map(|s| s.exit_code())
            .unwrap_or(exit_codes::ERROR)
    }

    /// Format as human-readable text.
    pub fn format_text(&self) -> String {
        let status = self.status.map(|s| s.as_str()).unwrap_or("not started");
        let mut lines = vec![format!(
            "Cycle {} after {} turn(s) (session {})",
            status, self.turns, self.session_id
        )];

        if !self.applied_paths.is_empty() {
            lines.push(format!("Applied ({}):", self.applied_paths.len()));
            for path in &self.applied_paths {
                lines.push(format!("  {}", path));
            }
        }
        if let Some(ref error) = self.error {
            lines.push(format!("Error: {}", error));
        }

        lines.join("\n")
    }
}

/// The run command implementation.
pub struct RunCommand {
    config: Config,
    collaborators: Collaborators,
    sessions: Arc<dyn SessionStore>,
}

impl RunCommand {
    pub fn new(
        config: Config,
        collaborators: Collaborators,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            config,
            collaborators,
            sessions,
        }
    }

    /// Wire the file-backed and command-backed collaborators for `cwd`.
    pub fn from_config(
        config: Config,
        cwd: &Path,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        let collaborators = build_collaborators(&config, cwd)?;
        Ok(Self::new(config, collaborators, sessions))
    }

    /// Run a cycle for `goal`, reading approval decisions from `input`.
    pub async fn run<R>(&self, goal: &str, options: &RunOptions, input: R) -> RunOutput
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let mut engine = CycleEngine::new(self.config.clone(), self.collaborators.clone())
            .with_session_store(Arc::clone(&self.sessions));
        if let Some(ref id) = options.session_id {
            engine = engine.with_session_id(id.clone());
        }

        let handle = engine.handle();
        let events = handle.subscribe();
        let progress = !options.quiet && !options.json;
        let reviewer = tokio::spawn(review(handle, events, input, progress));

        let result = engine.run_cycle(goal).await;
        reviewer.abort();

        match result {
            Ok(report) => RunOutput::from_report(report),
            Err(e) => RunOutput::failure(engine.session_id(), goal, e.to_string()),
        }
    }

    /// Format output based on options.
    pub fn format_output(&self, output: &RunOutput, options: &RunOptions) -> String {
        if options.quiet {
            return String::new();
        }
        if options.json {
            serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string())
        } else {
            output.format_text()
        }
    }
}

/// Build collaborators backed by the working tree at `cwd`.
pub fn build_collaborators(config: &Config, cwd: &Path) -> Result<Collaborators> {
    let artifacts: Arc<dyn ArtifactStore> = Arc::new(FileArtifactStore::new(cwd)?);
    let model = CommandModel::from_argv(&config.model.command)?;

    let tester: Option<Arc<dyn SelfTester>> = if config.validation.commands.is_empty() {
        None
    } else {
        Some(Arc::new(
            CommandSelfTester::new(config.validation.commands.clone()).in_dir(cwd),
        ))
    };

    let checkpoints = SnapshotCheckpointStore::new(Arc::clone(&artifacts))
        .with_journal(JsonlJournal::new(project_commits_path(cwd)));
    let reflections =
        JsonlReflectionStore::new(JsonlJournal::new(project_reflections_path(cwd)));

    Ok(Collaborators {
        bundles: Arc::new(ArtifactBundleTool::new(Arc::clone(&artifacts))),
        artifacts,
        model: Arc::new(model),
        tester,
        checkpoints: Arc::new(checkpoints),
        reflections: Arc::new(reflections),
    })
}

/// A parsed reviewer line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub decision: Decision,
    /// Gate the reviewer named, if any.
    pub gate: Option<ApprovalKind>,
}

impl Reply {
    /// Whether this reply may answer a `kind` gate.
    pub fn answers(&self, kind: ApprovalKind) -> bool {
        self.gate.map_or(true, |gate| gate == kind)
    }
}

/// Parse a reviewer's input line.
pub fn parse_decision(line: &str) -> Option<Reply> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let decision = match word.to_ascii_lowercase().as_str() {
        "a" | "y" | "yes" | "approve" => Decision::Approve,
        "r" | "n" | "no" | "reject" => Decision::Reject,
        "revise" | "e" if !rest.is_empty() => {
            return Some(Reply {
                decision: Decision::Revise(rest.to_string()),
                gate: None,
            })
        }
        _ => return None,
    };

    let gate = match rest.to_ascii_lowercase().as_str() {
        "" => None,
        "context" => Some(ApprovalKind::Context),
        "proposal" => Some(ApprovalKind::Proposal),
        _ => return None,
    };
    Some(Reply { decision, gate })
}

/// Text shown to the reviewer for a pending gate.
pub fn describe_request(kind: ApprovalKind, ctx: &CycleContext) -> String {
    let mut lines = vec![format!(
        "== {} approval (turn {}) ==",
        kind, ctx.turn.number
    )];
    match kind {
        ApprovalKind::Context => {
            lines.push(format!("Selected {} file(s):", ctx.selected_paths.len()));
            for path in &ctx.selected_paths {
                lines.push(format!("  {}", path));
            }
            if let Some(ref bundle) = ctx.context_bundle_path {
                lines.push(format!("Bundle: {}", bundle));
            }
        }
        ApprovalKind::Proposal => {
            lines.push(format!("Proposed {} change(s):", ctx.proposed_changes.len()));
            for change in &ctx.proposed_changes {
                lines.push(format!("  {} {}", change.operation.as_str(), change.file_path));
            }
            if let Some(ref bundle) = ctx.proposal_bundle_path {
                lines.push(format!("Bundle: {}", bundle));
            }
        }
    }
    lines.push("[approve | reject | revise <feedback>]".to_string());
    lines.join("\n")
}

/// Answer approval requests from `input` until the cycle completes.
async fn review<R>(
    handle: EngineHandle,
    mut events: broadcast::Receiver<CycleEvent>,
    input: R,
    progress: bool,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "reviewer lagged behind cycle events");
                continue;
            }
            Err(RecvError::Closed) => return,
        };

        match event {
            CycleEvent::StateEntered { to, .. } if progress => eprintln!("-> {}", to),
            CycleEvent::ApprovalRequested { ticket, context } => {
                eprintln!("{}", describe_request(ticket.kind, &context));
                if !answer(&handle, ticket, &mut lines).await {
                    return;
                }
            }
            CycleEvent::Error { ref message, .. } if progress => {
                eprintln!("Cycle error: {}", message)
            }
            CycleEvent::CycleCompleted { .. } => return,
            _ => {}
        }
    }
}

/// Read lines until one answers `ticket`. Returns false at end of input.
async fn answer<R>(
    handle: &EngineHandle,
    ticket: ApprovalTicket,
    lines: &mut tokio::io::Lines<R>,
) -> bool
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => {
                if let Err(e) = handle.reject(ticket) {
                    tracing::debug!(ticket = %ticket, error = %e, "end-of-input reject not delivered");
                }
                return false;
            }
        };

        match parse_decision(&line) {
            Some(reply) if reply.answers(ticket.kind) => {
                if let Err(e) = handle.decide(ticket, reply.decision) {
                    eprintln!("Decision not delivered: {}", e);
                }
                return true;
            }
            Some(_) => eprintln!("Discarded: line names a different gate than {}", ticket.kind),
            None => eprintln!("Unrecognised decision: {}", line.trim()),
        }
    }
}
