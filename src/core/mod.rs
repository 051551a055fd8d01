//! Core domain models for the coordinator.
//!
//! Tasks, their typed payloads and their lifecycle states live here; the
//! orchestration layer builds on top of them.

pub mod task;

pub use task::{
    AnalysisPayload, EnforcementPayload, LearningPayload, PreventionPayload, Priority, Task,
    TaskId, TaskKind, TaskPayload, TaskState, ValidationPayload, DEFAULT_TASK_TIMEOUT,
};
