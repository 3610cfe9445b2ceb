//! Cycle notifications.
//!
//! The engine publishes a closed set of [`CycleEvent`]s on a broadcast
//! channel. Observers subscribe for a receiver and unsubscribe by dropping
//! it. Publishing with no subscribers is not an error.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::approval::{ApprovalKind, ApprovalOutcome, ApprovalTicket};
use crate::core::engine::CycleStatus;
use crate::core::reflection::Reflection;
use crate::core::state::{ContextSnapshot, CycleContext, CycleState, StateTransition};

/// Default number of events buffered per subscriber.
pub const DEFAULT_CAPACITY: usize = 256;

/// Everything observers can hear about a cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CycleEvent {
    CycleStarted {
        session_id: String,
        goal: String,
    },
    StateEntered {
        from: CycleState,
        to: CycleState,
        snapshot: Option<ContextSnapshot>,
    },
    /// A gate is waiting. Carries the full context for review and the
    /// ticket a decision must present.
    ApprovalRequested {
        ticket: ApprovalTicket,
        context: Box<CycleContext>,
    },
    ApprovalResolved {
        kind: ApprovalKind,
        outcome: ApprovalOutcome,
    },
    CyclePaused {
        state: CycleState,
    },
    CycleResumed {
        state: CycleState,
    },
    ReflectionComplete {
        reflection: Box<Reflection>,
    },
    CycleCompleted {
        session_id: String,
        status: CycleStatus,
    },
    Error {
        message: String,
        last_transition: Option<StateTransition>,
        snapshot: Option<ContextSnapshot>,
    },
}

impl CycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CycleEvent::CycleStarted { .. } => "cycle_started",
            CycleEvent::StateEntered { .. } => "state_entered",
            CycleEvent::ApprovalRequested { .. } => "approval_requested",
            CycleEvent::ApprovalResolved { .. } => "approval_resolved",
            CycleEvent::CyclePaused { .. } => "cycle_paused",
            CycleEvent::CycleResumed { .. } => "cycle_resumed",
            CycleEvent::ReflectionComplete { .. } => "reflection_complete",
            CycleEvent::CycleCompleted { .. } => "cycle_completed",
            CycleEvent::Error { .. } => "error",
        }
    }
}

/// Broadcast channel for cycle events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CycleEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Deliver `event` to every current subscriber.
    pub fn publish(&self, event: CycleEvent) {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => tracing::trace!(event = name, receivers, "published"),
            Err(_) => tracing::trace!(event = name, "published with no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CycleEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.publish(CycleEvent::CyclePaused {
            state: CycleState::Idle,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(CycleEvent::CyclePaused {
            state: CycleState::Reflecting,
        });
        bus.publish(CycleEvent::CycleResumed {
            state: CycleState::Reflecting,
        });

        assert_eq!(rx.recv().await.unwrap().name(), "cycle_paused");
        assert_eq!(rx.recv().await.unwrap().name(), "cycle_resumed");
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(rx);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let json = serde_json::to_value(CycleEvent::StateEntered {
            from: CycleState::Idle,
            to: CycleState::CuratingContext,
            snapshot: None,
        })
        .unwrap();
        assert_eq!(json["event"], "state_entered");
        assert_eq!(json["to"], "CURATING_CONTEXT");
    }
}
