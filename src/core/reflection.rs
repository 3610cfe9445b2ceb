//! Reflection engine.
//!
//! Runs when a cycle enters REFLECTING. It measures how much of the proposal
//! landed, finds states that dominated the cycle's wall-clock time, turns
//! both into an insight and rule-based recommendations, and decides whether
//! the cycle should continue with a refined goal.
//!
//! Everything here is a pure function of the cycle context and transition
//! history, so the same inputs always give the same reflection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ReflectionConfig;
use crate::core::state::{CycleContext, CycleState, StateTransition};

/// Whether a cycle met its goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Successful,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Successful => "successful",
            Outcome::Failed => "failed",
        }
    }
}

/// Fixed success-rate categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuccessBucket {
    /// 100%.
    Perfect,
    /// Above 75%.
    High,
    /// Above 50%.
    Moderate,
    /// Above 0%.
    Low,
    /// 0%.
    None,
}

impl SuccessBucket {
    pub fn from_rate(rate: f64) -> Self {
        if rate >= 100.0 {
            SuccessBucket::Perfect
        } else if rate > 75.0 {
            SuccessBucket::High
        } else if rate > 50.0 {
            SuccessBucket::Moderate
        } else if rate > 0.0 {
            SuccessBucket::Low
        } else {
            SuccessBucket::None
        }
    }

    /// Tag written into the reflection artifact.
    pub fn tag(&self) -> &'static str {
        match self {
            SuccessBucket::Perfect => "perfect",
            SuccessBucket::High => "high",
            SuccessBucket::Moderate => "moderate",
            SuccessBucket::Low => "low",
            SuccessBucket::None => "none",
        }
    }

    pub fn insight(&self) -> &'static str {
        match self {
            SuccessBucket::Perfect => {
                "All proposed changes were applied. The approach worked as planned."
            }
            SuccessBucket::High => {
                "Most proposed changes were applied. Minor adjustments may still be needed."
            }
            SuccessBucket::Moderate => {
                "More than half of the proposed changes were applied. Review what was left out."
            }
            SuccessBucket::Low => {
                "Few proposed changes were applied. The plan likely needs rethinking."
            }
            SuccessBucket::None => {
                "No proposed changes were applied. Revisit the goal and the selected context."
            }
        }
    }
}

/// Map a success rate to its insight bucket and message.
pub fn generate_insight(success_rate: f64) -> (SuccessBucket, &'static str) {
    let bucket = SuccessBucket::from_rate(success_rate);
    (bucket, bucket.insight())
}

/// Outcome numbers for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReflectionMetrics {
    pub duration_ms: u64,
    pub changes_applied: usize,
    pub total_proposed: usize,
    /// Percentage of proposed changes that were applied.
    pub success_rate: f64,
}

impl ReflectionMetrics {
    pub fn new(duration_ms: u64, changes_applied: usize, total_proposed: usize) -> Self {
        let success_rate = if total_proposed > 0 {
            changes_applied as f64 / total_proposed as f64 * 100.0
        } else {
            0.0
        };
        Self {
            duration_ms,
            changes_applied,
            total_proposed,
            success_rate,
        }
    }

    /// Metrics for the cycle described by `ctx`, measured at `now`.
    pub fn from_context(ctx: &CycleContext, now: DateTime<Utc>) -> Self {
        let duration_ms = (now - ctx.start_time).num_milliseconds().max(0) as u64;
        let changes_applied = ctx
            .apply_result
            .as_ref()
            .map(|r| r.changes_applied.len())
            .unwrap_or(0);
        Self::new(duration_ms, changes_applied, ctx.proposed_changes.len())
    }
}

/// A state that took a large share of cycle time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bottleneck {
    pub state: CycleState,
    pub duration_ms: u64,
    /// Fraction of total cycle time, 0.0 to 1.0.
    pub share: f64,
}

/// Time spent per state over a slice of history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternAnalysis {
    /// Cumulative milliseconds per state, in first-seen order.
    pub time_in_state: Vec<(CycleState, u64)>,
    pub total_ms: u64,
    /// Bottlenecks, largest share first.
    pub bottlenecks: Vec<Bottleneck>,
}

impl PatternAnalysis {
    pub fn time_in(&self, state: CycleState) -> u64 {
        self.time_in_state
            .iter()
            .find(|(s, _)| *s == state)
            .map(|(_, ms)| *ms)
            .unwrap_or(0)
    }

    pub fn top_bottleneck(&self) -> Option<CycleState> {
        self.bottlenecks.first().map(|b| b.state)
    }
}

/// Sum time-in-state over `history` and flag states above `bottleneck_ratio`.
///
/// Each transition's duration is the time spent in its `from` state.
pub fn analyze_patterns(history: &[StateTransition], bottleneck_ratio: f64) -> PatternAnalysis {
    let mut time_in_state: Vec<(CycleState, u64)> = Vec::new();
    for t in history {
        match time_in_state.iter_mut().find(|(s, _)| *s == t.from) {
            Some((_, ms)) => *ms += t.duration_ms,
            None => time_in_state.push((t.from, t.duration_ms)),
        }
    }

    let total_ms: u64 = time_in_state.iter().map(|(_, ms)| ms).sum();

    let mut bottlenecks: Vec<Bottleneck> = if total_ms == 0 {
        Vec::new()
    } else {
        time_in_state
            .iter()
            .map(|(state, ms)| Bottleneck {
                state: *state,
                duration_ms: *ms,
                share: *ms as f64 / total_ms as f64,
            })
            .filter(|b| b.share > bottleneck_ratio)
            .collect()
    };
    bottlenecks.sort_by(|a, b| b.duration_ms.cmp(&a.duration_ms));

    PatternAnalysis {
        time_in_state,
        total_ms,
        bottlenecks,
    }
}

fn bottleneck_advice(state: CycleState) -> &'static str {
    match state {
        CycleState::CuratingContext => "narrow the goal so fewer files need to be considered",
        CycleState::AwaitingContextApproval => "consider auto-approving context for this session",
        CycleState::PlanningWithContext => "trim the context bundle to the files the plan needs",
        CycleState::GeneratingProposal => "ask for fewer files per proposal",
        CycleState::AwaitingProposalApproval => "split the work into smaller changesets",
        CycleState::ApplyingChangeset => "speed up or scope down the self-test commands",
        _ => "review this step",
    }
}

/// Deterministic, rule-based suggestions.
pub fn generate_recommendations(
    metrics: &ReflectionMetrics,
    analysis: &PatternAnalysis,
    config: &ReflectionConfig,
) -> Vec<String> {
    let mut recs = Vec::new();

    for b in &analysis.bottlenecks {
        recs.push(format!(
            "{} took {:.0}% of cycle time; {}.",
            b.state,
            b.share * 100.0,
            bottleneck_advice(b.state)
        ));
    }

    if metrics.total_proposed == 0 {
        recs.push("The model proposed no changes; refine the goal or the context selection.".to_string());
    } else if metrics.success_rate == 0.0 {
        recs.push("None of the proposed changes were applied; check the proposal format and the apply step.".to_string());
    } else if metrics.success_rate <= 50.0 {
        recs.push("Less than half of the proposal landed; prefer smaller, focused changesets.".to_string());
    } else if metrics.success_rate < 100.0 {
        recs.push("Review the changes that were not applied before continuing.".to_string());
    }

    let context_wait = analysis.time_in(CycleState::AwaitingContextApproval);
    if context_wait > config.context_wait_warn_secs * 1000 {
        recs.push(format!(
            "Context approval waited {}s; consider enabling auto-approve for context.",
            context_wait / 1000
        ));
    }

    let proposal_wait = analysis.time_in(CycleState::AwaitingProposalApproval);
    if proposal_wait > config.proposal_wait_warn_secs * 1000 {
        recs.push(format!(
            "Proposal approval waited {}s; smaller changesets are faster to review.",
            proposal_wait / 1000
        ));
    }

    recs
}

/// Continue only above the success threshold and below both iteration caps.
pub fn should_continue(
    success_rate: f64,
    iterations: u32,
    max_iterations: u32,
    config: &ReflectionConfig,
) -> bool {
    success_rate > config.continue_threshold
        && iterations < config.max_continuations
        && iterations < max_iterations
}

/// Annotate the goal for the next iteration.
pub fn refine_goal(goal: &str, next_iteration: u32, bottleneck: Option<CycleState>) -> String {
    let focus = match bottleneck {
        Some(state) => format!("reduce time in {}", state),
        None => "continue refining".to_string(),
    };
    format!("{}\n\n[Iteration {}] Focus: {}", goal, next_iteration, focus)
}

/// A post-cycle analysis record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub id: String,
    pub session_id: String,
    pub turn: u32,
    pub goal: String,
    pub outcome: Outcome,
    pub bucket: SuccessBucket,
    pub insight: String,
    pub recommendations: Vec<String>,
    pub should_continue: bool,
    /// Goal for the next iteration, when continuing.
    pub refined_goal: Option<String>,
    pub metrics: ReflectionMetrics,
    #[serde(default)]
    pub bottlenecks: Vec<Bottleneck>,
    pub created_at: DateTime<Utc>,
}

/// Reflect on the cycle in `ctx` using its slice of transition history.
pub fn reflect(
    ctx: &CycleContext,
    history: &[StateTransition],
    config: &ReflectionConfig,
    now: DateTime<Utc>,
) -> Reflection {
    let metrics = ReflectionMetrics::from_context(ctx, now);
    let analysis = analyze_patterns(history, config.bottleneck_ratio);
    let (bucket, insight) = generate_insight(metrics.success_rate);
    let recommendations = generate_recommendations(&metrics, &analysis, config);
    let cont = should_continue(
        metrics.success_rate,
        ctx.iterations,
        ctx.max_iterations,
        config,
    );
    let refined_goal =
        cont.then(|| refine_goal(&ctx.goal, ctx.iterations + 1, analysis.top_bottleneck()));

    let outcome = if metrics.success_rate > 50.0 {
        Outcome::Successful
    } else {
        Outcome::Failed
    };

    Reflection {
        id: uuid::Uuid::new_v4().to_string(),
        session_id: ctx.session_id.clone(),
        turn: ctx.turn.number,
        goal: ctx.goal.clone(),
        outcome,
        bucket,
        insight: insight.to_string(),
        recommendations,
        should_continue: cont,
        refined_goal,
        metrics,
        bottlenecks: analysis.bottlenecks,
        created_at: now,
    }
}

/// Render the human-readable reflection document.
pub fn render_markdown(reflection: &Reflection) -> String {
    let mut out = String::new();
    out.push_str("# Reflection\n\n");
    out.push_str(&format!(
        "Tags: outcome:{} turn:{} success:{}\n\n",
        reflection.outcome.as_str(),
        reflection.turn,
        reflection.bucket.tag()
    ));
    out.push_str("## Goal\n\n");
    out.push_str(&reflection.goal);
    out.push_str("\n\n## Insight\n\n");
    out.push_str(&reflection.insight);
    out.push_str("\n\n## Metrics\n\n");
    out.push_str(&format!(
        "- Duration: {} ms\n- Changes applied: {}\n- Total proposed: {}\n- Success rate: {:.1}%\n",
        reflection.metrics.duration_ms,
        reflection.metrics.changes_applied,
        reflection.metrics.total_proposed,
        reflection.metrics.success_rate
    ));

    out.push_str("\n## Recommendations\n\n");
    if reflection.recommendations.is_empty() {
        out.push_str("- None\n");
    }
    for rec in &reflection.recommendations {
        out.push_str(&format!("- {}\n", rec));
    }

    out.push_str(&format!(
        "\n## Next\n\n{}\n",
        if reflection.should_continue {
            "Continuing with a refined goal."
        } else {
            "Cycle complete."
        }
    ));
    out
}
