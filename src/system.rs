//! Backend capability contract.
//!
//! A backend is an opaque worker (rule checker, guideline analyzer, proof
//! engine, ...) that the coordinator routes tasks to. The coordinator only
//! knows what it declares at registration and what it returns from
//! [`Backend::execute`] and [`Backend::probe`].

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::{Priority, TaskId, TaskKind, TaskPayload};

/// Identifier of a registered system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SystemId(pub String);

impl SystemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SystemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SystemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SystemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What a system declares about itself when it is registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSpec {
    pub id: SystemId,
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub scalable: bool,
}

impl SystemSpec {
    pub fn new(id: impl Into<SystemId>) -> Self {
        Self {
            id: id.into(),
            capabilities: BTreeSet::new(),
            priority: Priority::default(),
            scalable: false,
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn scalable(mut self, scalable: bool) -> Self {
        self.scalable = scalable;
        self
    }
}

/// Per-call context handed to a backend.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub task_id: TaskId,
    pub kind: TaskKind,
    /// Cancelled when the call times out, a sibling fails without fallback,
    /// or the coordinator shuts down. Backends must stop promptly.
    pub cancel: CancellationToken,
}

/// Result of one backend call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemOutput {
    #[serde(default)]
    pub is_valid: Option<bool>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default, alias = "recommendations")]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl SystemOutput {
    pub fn valid(confidence: f64) -> Self {
        Self {
            is_valid: Some(true),
            confidence: Some(confidence),
            ..Default::default()
        }
    }

    pub fn invalid(confidence: f64) -> Self {
        Self {
            is_valid: Some(false),
            confidence: Some(confidence),
            ..Default::default()
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Outcome of a liveness probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub healthy: bool,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ProbeReport {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            detail: None,
        }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: Some(detail.into()),
        }
    }
}

/// Failure reported by a backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
    pub retryable: bool,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Capability contract every pluggable system implements.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Run one task. Must observe `ctx.cancel`.
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        payload: &TaskPayload,
    ) -> Result<SystemOutput, BackendError>;

    /// Lightweight liveness check.
    async fn probe(&self) -> Result<ProbeReport, BackendError> {
        Ok(ProbeReport::healthy())
    }
}
