//! Routing decisions and the append-only decision log.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{Priority, TaskId};
use crate::system::SystemId;

/// Unique identifier of a routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecisionId(pub Uuid);

impl DecisionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters, for log lines.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for DecisionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DecisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One scored plan considered by the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingOption {
    /// Systems the task would be sent to, in registration order.
    pub systems: Vec<SystemId>,
    pub description: String,
    /// Score in `[0, 1]`.
    pub confidence: f64,
    pub impact: Priority,
    pub reasoning: String,
    /// Sum of the systems' loads when the option was scored.
    pub combined_load: f64,
}

impl RoutingOption {
    pub fn is_multi(&self) -> bool {
        self.systems.len() > 1
    }
}

/// Recorded routing choice for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub id: DecisionId,
    pub task_id: TaskId,
    /// Every option considered, best first.
    pub candidate_options: Vec<RoutingOption>,
    /// `None` when no system could take the task.
    pub selected: Option<RoutingOption>,
    pub created_at: DateTime<Utc>,
}

impl RoutingDecision {
    pub fn selected_systems(&self) -> &[SystemId] {
        self.selected
            .as_ref()
            .map(|o| o.systems.as_slice())
            .unwrap_or(&[])
    }
}

/// Append-only log of routing decisions.
#[derive(Debug, Default)]
pub struct DecisionLog {
    entries: Mutex<Vec<RoutingDecision>>,
}

impl DecisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, decision: RoutingDecision) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(decision);
    }

    /// Copy of every decision, oldest first.
    pub fn all(&self) -> Vec<RoutingDecision> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn for_task(&self, task_id: &TaskId) -> Vec<RoutingDecision> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|d| &d.task_id == task_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
