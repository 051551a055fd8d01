//! Task data model.
//!
//! A task is one unit of work submitted to the coordinator. Its payload is a
//! sum type keyed by kind, so the kind can never disagree with the payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

use crate::{Error, Result};

/// Caller-supplied task identifier, unique for a coordinator's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh UUID v4 based identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Category of work, used to pick the capability tags a system must offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Validation,
    Analysis,
    Prevention,
    Enforcement,
    Learning,
}

impl TaskKind {
    /// Capability tags a system needs (any one of them) to handle this kind.
    pub fn required_capabilities(&self) -> &'static [&'static str] {
        match self {
            TaskKind::Validation => &["operation_validation", "pattern_detection"],
            TaskKind::Analysis => &["code_analysis", "pattern_detection", "quality_assessment"],
            TaskKind::Prevention => &["violation_prevention", "real_time_monitoring"],
            TaskKind::Enforcement => &["rule_enforcement", "compliance_check"],
            TaskKind::Learning => &["pattern_learning", "adaptive_learning"],
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Validation => write!(f, "validation"),
            TaskKind::Analysis => write!(f, "analysis"),
            TaskKind::Prevention => write!(f, "prevention"),
            TaskKind::Enforcement => write!(f, "enforcement"),
            TaskKind::Learning => write!(f, "learning"),
        }
    }
}

/// Urgency of a task, also used as the declared priority of a system.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// Check an operation before it runs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationPayload {
    pub operation: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// Inspect a subject for patterns and quality issues.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisPayload {
    pub subject: String,
    #[serde(default)]
    pub focus: Vec<String>,
}

/// Stop a risky operation before it happens.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PreventionPayload {
    pub operation: String,
    /// Risk score in `[0, 1]` above which the operation should be blocked.
    pub risk_threshold: f64,
}

/// Apply a set of rules to a target.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnforcementPayload {
    pub target: String,
    pub rule_ids: Vec<String>,
}

/// Feed observed outcomes back to the systems.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LearningPayload {
    pub samples: Vec<serde_json::Value>,
    #[serde(default)]
    pub outcome: Option<bool>,
}

/// Strongly typed payload, one variant per task kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "data")]
pub enum TaskPayload {
    Validation(ValidationPayload),
    Analysis(AnalysisPayload),
    Prevention(PreventionPayload),
    Enforcement(EnforcementPayload),
    Learning(LearningPayload),
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::Validation(_) => TaskKind::Validation,
            TaskPayload::Analysis(_) => TaskKind::Analysis,
            TaskPayload::Prevention(_) => TaskKind::Prevention,
            TaskPayload::Enforcement(_) => TaskKind::Enforcement,
            TaskPayload::Learning(_) => TaskKind::Learning,
        }
    }
}

/// Default per-call timeout for new tasks.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30);

/// A unit of work submitted to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub priority: Priority,
    pub payload: TaskPayload,
    /// Overrides the kind's default capability tags when non-empty.
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,
    /// Per-call timeout applied to every system the task is sent to.
    pub timeout: Duration,
    /// Attempts a caller may make after the first failure.
    #[serde(default)]
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a task with medium priority and the default timeout.
    pub fn new(id: impl Into<TaskId>, payload: TaskPayload) -> Self {
        Self {
            id: id.into(),
            priority: Priority::default(),
            payload,
            required_capabilities: BTreeSet::new(),
            timeout: DEFAULT_TASK_TIMEOUT,
            max_retries: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.required_capabilities.insert(capability.into());
        self
    }

    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }

    /// Capability tags used for routing.
    pub fn effective_capabilities(&self) -> BTreeSet<String> {
        if self.required_capabilities.is_empty() {
            self.kind()
                .required_capabilities()
                .iter()
                .map(|c| c.to_string())
                .collect()
        } else {
            self.required_capabilities.clone()
        }
    }

    /// Check the task shape before admission.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::InvalidTask("task id must not be empty".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidTask(format!(
                "task {} has a zero timeout",
                self.id
            )));
        }
        if self.required_capabilities.iter().any(|c| c.trim().is_empty()) {
            return Err(Error::InvalidTask(format!(
                "task {} lists an empty capability",
                self.id
            )));
        }
        if let TaskPayload::Prevention(p) = &self.payload {
            if !(0.0..=1.0).contains(&p.risk_threshold) {
                return Err(Error::InvalidTask(format!(
                    "task {} has risk_threshold outside [0, 1]",
                    self.id
                )));
            }
        }
        Ok(())
    }

    /// Copy of this task under a new id, used for caller-side retries.
    pub fn resubmission(&self, attempt: u32) -> Self {
        Self {
            id: TaskId(format!("{}#retry-{}", self.id, attempt)),
            created_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// Lifecycle state of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Dispatched,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::TimedOut | TaskState::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `Queued -> Failed` covers routing failures, which never dispatch.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Queued, Dispatched)
                | (Queued, Cancelled)
                | (Queued, Failed)
                | (Dispatched, Completed)
                | (Dispatched, Failed)
                | (Dispatched, TimedOut)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Queued => write!(f, "queued"),
            TaskState::Dispatched => write!(f, "dispatched"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Failed => write!(f, "failed"),
            TaskState::TimedOut => write!(f, "timed_out"),
            TaskState::Cancelled => write!(f, "cancelled"),
        }
    }
}
