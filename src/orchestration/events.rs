//! Coordinator event bus.
//!
//! Every coordinator owns one `EventBus`. Events are broadcast to all current
//! subscribers; a subscriber that falls behind by more than the channel
//! capacity sees `RecvError::Lagged` and skips ahead.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::TaskId;
use crate::system::SystemId;

use super::decisions::DecisionId;
use super::registry::SystemStatus;

/// Events emitted by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    /// A task was accepted but had to wait for a free slot.
    TaskQueued {
        task_id: TaskId,
        queue_depth: usize,
    },
    /// A task was handed to its selected systems.
    TaskDispatched {
        task_id: TaskId,
        decision_id: DecisionId,
        systems: Vec<SystemId>,
    },
    TaskCompleted {
        task_id: TaskId,
        latency: Duration,
        /// Systems that reported a fallback marker instead of a result.
        fallbacks: usize,
    },
    TaskFailed {
        task_id: TaskId,
        error: String,
        category: String,
    },
    TaskCancelled {
        task_id: TaskId,
    },
    RoutingDecision {
        decision_id: DecisionId,
        task_id: TaskId,
        selected: Option<Vec<SystemId>>,
        confidence: Option<f64>,
    },
    SystemHealthUpdate {
        system_id: SystemId,
        previous: SystemStatus,
        current: SystemStatus,
    },
    ScaleUpNeeded {
        average_load: f64,
        queue_depth: usize,
    },
    ScaleDownPossible {
        average_load: f64,
    },
}

impl CoordinatorEvent {
    /// Stable event name.
    pub fn name(&self) -> &'static str {
        match self {
            CoordinatorEvent::TaskQueued { .. } => "task_queued",
            CoordinatorEvent::TaskDispatched { .. } => "task_dispatched",
            CoordinatorEvent::TaskCompleted { .. } => "task_completed",
            CoordinatorEvent::TaskFailed { .. } => "task_failed",
            CoordinatorEvent::TaskCancelled { .. } => "task_cancelled",
            CoordinatorEvent::RoutingDecision { .. } => "routing_decision",
            CoordinatorEvent::SystemHealthUpdate { .. } => "system_health_update",
            CoordinatorEvent::ScaleUpNeeded { .. } => "scale_up_needed",
            CoordinatorEvent::ScaleDownPossible { .. } => "scale_down_possible",
        }
    }

    /// Task the event refers to, if any.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            CoordinatorEvent::TaskQueued { task_id, .. }
            | CoordinatorEvent::TaskDispatched { task_id, .. }
            | CoordinatorEvent::TaskCompleted { task_id, .. }
            | CoordinatorEvent::TaskFailed { task_id, .. }
            | CoordinatorEvent::TaskCancelled { task_id }
            | CoordinatorEvent::RoutingDecision { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}

/// Broadcast channel for coordinator events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoordinatorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.tx.subscribe()
    }

    /// Send an event. Having no subscribers is not an error.
    pub fn emit(&self, event: CoordinatorEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
