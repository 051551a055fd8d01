use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Task queue is full (max: {max})")]
    QueueFull { max: usize },

    #[error("No available system for task {task_id} (required: {required:?})")]
    NoAvailableSystem {
        task_id: String,
        required: Vec<String>,
    },

    #[error("System {system_id} timed out after {timeout:?}")]
    SystemTimeout { system_id: String, timeout: Duration },

    #[error("System {system_id} failed: {message}")]
    SystemExecution {
        system_id: String,
        message: String,
        /// `false` when the backend reported the failure as permanent.
        retryable: bool,
    },

    #[error("System already registered: {0}")]
    DuplicateSystemId(String),

    #[error("System not found: {0}")]
    SystemNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task cancelled: {0}")]
    Cancelled(String),

    #[error("Coordinator is shutting down")]
    ShuttingDown,

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// Whether a caller may resubmit the task after this error.
    ///
    /// Only per-system execution failures are transient, and only when the
    /// backend did not mark them permanent. Admission errors and registry
    /// misuse are programming errors and fail fast.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::SystemTimeout { .. } | Error::Timeout(_) => true,
            Error::SystemExecution { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Short tag used in log fields and event payloads.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Io(_) | Error::Json(_) | Error::TomlParse(_) | Error::TomlSerialize(_) => "io",
            Error::NoHomeDir | Error::Config(_) => "config",
            Error::InvalidTask(_) => "invalid_task",
            Error::QueueFull { .. } => "queue_full",
            Error::NoAvailableSystem { .. } => "no_available_system",
            Error::SystemTimeout { .. } | Error::Timeout(_) => "timeout",
            Error::SystemExecution { .. } => "system_execution",
            Error::DuplicateSystemId(_) | Error::SystemNotFound(_) => "registry",
            Error::TaskNotFound(_) => "task_not_found",
            Error::Cancelled(_) => "cancelled",
            Error::ShuttingDown => "shutdown",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
