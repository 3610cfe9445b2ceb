//! Approval gate for cogcycle.
//!
//! A cycle pauses twice for a human: once to approve the curated context
//! bundle and once to approve the proposed changeset. The engine registers a
//! pending approval with the [`ApprovalBroker`], publishes a request, and waits
//! on a oneshot channel with a timeout. Decisions from other tasks are routed
//! through the broker.
//!
//! At most one approval is pending at a time. Registration hands back a
//! [`PendingApproval`] whose drop clears the broker slot, so approve, reject,
//! revise and timeout all share one cleanup path and a late decision finds no
//! slot to resolve.
//!
//! Every registration is identified by an [`ApprovalTicket`], published with
//! the request. A decision must present the ticket of the gate it answers; a
//! duplicated or stale decision for an earlier gate is refused and leaves the
//! current gate waiting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::{CycleError, Result};

/// Which gate is waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalKind {
    /// The curated context bundle.
    Context,
    /// The proposed changeset.
    Proposal,
}

impl ApprovalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalKind::Context => "context",
            ApprovalKind::Proposal => "proposal",
        }
    }
}

impl std::fmt::Display for ApprovalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one registered approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalTicket {
    pub id: u64,
    pub kind: ApprovalKind,
}

impl std::fmt::Display for ApprovalTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} #{}", self.kind, self.id)
    }
}

/// An explicit decision sent by a reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision", content = "feedback")]
pub enum Decision {
    Approve,
    Reject,
    Revise(String),
}

/// How a pending approval was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ApprovalOutcome {
    /// Approved, either explicitly or by the auto-approve policy.
    Approved { auto: bool },
    /// Explicitly rejected.
    Rejected,
    /// Sent back with feedback.
    Revise { feedback: String },
    /// No decision arrived within the window. Treated as a rejection.
    TimedOut,
}

impl ApprovalOutcome {
    pub fn is_approved(&self) -> bool {
        matches!(self, ApprovalOutcome::Approved { .. })
    }
}

impl From<Decision> for ApprovalOutcome {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Approve => ApprovalOutcome::Approved { auto: false },
            Decision::Reject => ApprovalOutcome::Rejected,
            Decision::Revise(feedback) => ApprovalOutcome::Revise { feedback },
        }
    }
}

/// A resolved approval: which gate, and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub kind: ApprovalKind,
    pub outcome: ApprovalOutcome,
}

/// Auto-approve flags in effect for one gate.
///
/// Session and global flags are independent; either one enables
/// auto-approval. Neither ever applies to proposals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutoApprovePolicy {
    pub session: bool,
    pub global: bool,
}

impl AutoApprovePolicy {
    pub fn new(session: bool, global: bool) -> Self {
        Self { session, global }
    }

    /// Check whether `kind` may resolve without an explicit decision.
    pub fn allows(&self, kind: ApprovalKind) -> bool {
        match kind {
            ApprovalKind::Context => self.session || self.global,
            ApprovalKind::Proposal => false,
        }
    }
}

// ============================================================================
// Broker
// ============================================================================

struct PendingSlot {
    ticket: ApprovalTicket,
    sender: oneshot::Sender<Decision>,
}

/// Routes reviewer decisions to the single pending approval.
///
/// Cheap to clone; clones share the same slot.
#[derive(Clone, Default)]
pub struct ApprovalBroker {
    slot: Arc<Mutex<Option<PendingSlot>>>,
    next_id: Arc<AtomicU64>,
}

impl ApprovalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending approval.
    ///
    /// Fails if another approval is already pending.
    pub fn register(&self, kind: ApprovalKind) -> Result<PendingApproval> {
        let mut slot = self.lock()?;
        if let Some(existing) = slot.as_ref() {
            return Err(CycleError::approval(format!(
                "{} approval already pending",
                existing.ticket.kind
            )));
        }

        let ticket = ApprovalTicket {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
        };
        let (sender, receiver) = oneshot::channel();
        *slot = Some(PendingSlot { ticket, sender });

        Ok(PendingApproval {
            ticket,
            receiver,
            _guard: SlotGuard {
                id: ticket.id,
                slot: Arc::clone(&self.slot),
            },
        })
    }

    /// Deliver a decision to the approval identified by `ticket`.
    ///
    /// Fails when nothing is pending, including after a timeout already
    /// resolved the gate, and when `ticket` names a different registration.
    /// A refused decision leaves the pending approval untouched.
    pub fn decide(&self, ticket: ApprovalTicket, decision: Decision) -> Result<ApprovalKind> {
        let pending = {
            let mut slot = self.lock()?;
            match slot.as_ref().map(|p| p.ticket) {
                None => {
                    return Err(CycleError::approval(format!(
                        "no approval pending for {}",
                        ticket
                    )))
                }
                Some(current) if current != ticket => {
                    tracing::warn!(
                        stale = %ticket,
                        pending = %current,
                        "decision for a different approval refused"
                    );
                    return Err(CycleError::approval(format!(
                        "{} is not the pending approval ({})",
                        ticket, current
                    )));
                }
                Some(_) => slot.take(),
            }
        };
        let pending = pending.ok_or_else(|| CycleError::approval("no approval pending"))?;

        pending
            .sender
            .send(decision)
            .map_err(|_| CycleError::approval(format!("{} already resolved", ticket)))?;
        Ok(ticket.kind)
    }

    /// Kind of the currently pending approval, if any.
    pub fn pending(&self) -> Option<ApprovalKind> {
        self.pending_ticket().map(|t| t.kind)
    }

    /// Ticket of the currently pending approval, if any.
    pub fn pending_ticket(&self) -> Option<ApprovalTicket> {
        self.slot
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|p| p.ticket))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<PendingSlot>>> {
        self.slot
            .lock()
            .map_err(|_| CycleError::approval("approval slot poisoned"))
    }
}

impl std::fmt::Debug for ApprovalBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalBroker")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Clears the broker slot on drop if it still belongs to this registration.
struct SlotGuard {
    id: u64,
    slot: Arc<Mutex<Option<PendingSlot>>>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            if slot.as_ref().is_some_and(|p| p.ticket.id == self.id) {
                *slot = None;
            }
        }
    }
}

/// A registered approval waiting for a decision.
pub struct PendingApproval {
    ticket: ApprovalTicket,
    receiver: oneshot::Receiver<Decision>,
    _guard: SlotGuard,
}

impl PendingApproval {
    pub fn kind(&self) -> ApprovalKind {
        self.ticket.kind
    }

    /// Ticket a decision must present to resolve this approval.
    pub fn ticket(&self) -> ApprovalTicket {
        self.ticket
    }

    /// Wait for a decision or the timeout, whichever comes first.
    ///
    /// Consumes the registration; the broker slot is cleared on return.
    pub async fn wait(self, timeout: Duration) -> ApprovalOutcome {
        match tokio::time::timeout(timeout, self.receiver).await {
            Ok(Ok(decision)) => decision.into(),
            Ok(Err(_)) => ApprovalOutcome::Rejected,
            Err(_) => ApprovalOutcome::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_never_allows_proposals() {
        let policy = AutoApprovePolicy::new(true, true);
        assert!(policy.allows(ApprovalKind::Context));
        assert!(!policy.allows(ApprovalKind::Proposal));
    }

    #[test]
    fn test_policy_flags_combine_with_or() {
        assert!(AutoApprovePolicy::new(true, false).allows(ApprovalKind::Context));
        assert!(AutoApprovePolicy::new(false, true).allows(ApprovalKind::Context));
        assert!(!AutoApprovePolicy::new(false, false).allows(ApprovalKind::Context));
    }

    #[test]
    fn test_register_rejects_second_pending() {
        let broker = ApprovalBroker::new();
        let _first = broker.register(ApprovalKind::Context).unwrap();
        let second = broker.register(ApprovalKind::Proposal);
        assert!(matches!(second, Err(CycleError::Approval { .. })));
    }

    #[test]
    fn test_drop_clears_slot() {
        let broker = ApprovalBroker::new();
        let pending = broker.register(ApprovalKind::Context).unwrap();
        assert_eq!(broker.pending(), Some(ApprovalKind::Context));
        drop(pending);
        assert_eq!(broker.pending(), None);
        assert!(broker.register(ApprovalKind::Proposal).is_ok());
    }

    #[test]
    fn test_decide_without_pending_fails() {
        let broker = ApprovalBroker::new();
        let ticket = ApprovalTicket {
            id: 0,
            kind: ApprovalKind::Context,
        };
        assert!(broker.decide(ticket, Decision::Approve).is_err());
    }

    #[tokio::test]
    async fn test_decision_resolves_wait() {
        let broker = ApprovalBroker::new();
        let pending = broker.register(ApprovalKind::Proposal).unwrap();
        let ticket = pending.ticket();
        assert_eq!(
            broker.decide(ticket, Decision::Revise("smaller".into())).unwrap(),
            ApprovalKind::Proposal
        );

        let outcome = pending.wait(Duration::from_secs(5)).await;
        assert_eq!(
            outcome,
            ApprovalOutcome::Revise {
                feedback: "smaller".to_string()
            }
        );
        assert_eq!(broker.pending(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_resolves_and_late_decision_is_refused() {
        let broker = ApprovalBroker::new();
        let pending = broker.register(ApprovalKind::Proposal).unwrap();
        let ticket = pending.ticket();

        let outcome = pending.wait(Duration::from_secs(600)).await;
        assert_eq!(outcome, ApprovalOutcome::TimedOut);

        assert_eq!(broker.pending(), None);
        assert!(broker.decide(ticket, Decision::Approve).is_err());
    }

    #[test]
    fn test_stale_guard_does_not_clear_newer_slot() {
        let broker = ApprovalBroker::new();
        let first = broker.register(ApprovalKind::Context).unwrap();
        broker.decide(first.ticket(), Decision::Approve).unwrap();
        let _second = broker.register(ApprovalKind::Proposal).unwrap();

        drop(first);
        assert_eq!(broker.pending(), Some(ApprovalKind::Proposal));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_context_decision_does_not_resolve_proposal() {
        let broker = ApprovalBroker::new();
        let context = broker.register(ApprovalKind::Context).unwrap();
        let context_ticket = context.ticket();
        broker.decide(context_ticket, Decision::Approve).unwrap();
        assert!(context.wait(Duration::from_secs(5)).await.is_approved());

        let proposal = broker.register(ApprovalKind::Proposal).unwrap();
        let replayed = broker.decide(context_ticket, Decision::Approve);
        assert!(matches!(replayed, Err(CycleError::Approval { .. })));
        assert_eq!(broker.pending_ticket(), Some(proposal.ticket()));

        let outcome = proposal.wait(Duration::from_secs(600)).await;
        assert_eq!(outcome, ApprovalOutcome::TimedOut);
    }

    #[test]
    fn test_decision_for_earlier_gate_of_same_kind_is_refused() {
        let broker = ApprovalBroker::new();
        let first = broker.register(ApprovalKind::Context).unwrap();
        let first_ticket = first.ticket();
        broker
            .decide(first_ticket, Decision::Revise("wider".into()))
            .unwrap();
        drop(first);

        let second = broker.register(ApprovalKind::Context).unwrap();
        assert_ne!(second.ticket(), first_ticket);
        assert!(broker.decide(first_ticket, Decision::Approve).is_err());
        assert_eq!(broker.pending(), Some(ApprovalKind::Context));
        assert!(broker.decide(second.ticket(), Decision::Approve).is_ok());
    }

    #[test]
    fn test_decision_serialization() {
        let json = serde_json::to_string(&Decision::Revise("more tests".into())).unwrap();
        assert_eq!(json, r#"{"decision":"revise","feedback":"more tests"}"#);
    }
}
