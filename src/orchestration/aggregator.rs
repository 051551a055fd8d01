//! Result aggregation.
//!
//! A single-system plan passes its output through unchanged. Multi-system
//! plans are merged: consensus over `is_valid`, mean confidence, the
//! deduplicated union of suggestions and a strict-majority verdict.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::system::{SystemId, SystemOutput};

/// Confidence assumed for a system that did not report one.
pub const MISSING_CONFIDENCE: f64 = 0.5;

/// What one system contributed to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SystemOutcome {
    Success {
        system_id: SystemId,
        output: SystemOutput,
        elapsed: Duration,
    },
    /// The call failed and fallback mode absorbed the error.
    ///
    /// Serializes as `{"outcome": "fallback", "fallback": true, "error": ..}`.
    /// Build it with [`SystemOutcome::fallback`], which sets the flag.
    Fallback {
        system_id: SystemId,
        error: String,
        timed_out: bool,
        /// Whether the backend considered the failure transient.
        retryable: bool,
        fallback: bool,
    },
}

impl SystemOutcome {
    pub fn fallback(
        system_id: SystemId,
        error: impl Into<String>,
        timed_out: bool,
        retryable: bool,
    ) -> Self {
        SystemOutcome::Fallback {
            system_id,
            error: error.into(),
            timed_out,
            retryable,
            fallback: true,
        }
    }

    pub fn system_id(&self) -> &SystemId {
        match self {
            SystemOutcome::Success { system_id, .. } | SystemOutcome::Fallback { system_id, .. } => {
                system_id
            }
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, SystemOutcome::Fallback { .. })
    }

    pub fn output(&self) -> Option<&SystemOutput> {
        match self {
            SystemOutcome::Success { output, .. } => Some(output),
            SystemOutcome::Fallback { .. } => None,
        }
    }
}

/// Agreement across systems on `is_valid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consensus {
    UnanimousValid,
    UnanimousInvalid,
    Mixed,
}

/// Final result of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub is_valid: Option<bool>,
    pub confidence: Option<f64>,
    /// `None` for a single-system pass-through.
    pub consensus: Option<Consensus>,
    pub suggestions: Vec<String>,
    /// Single system: its data. Multiple: an object keyed by system id.
    pub data: serde_json::Value,
    /// Per-system outcomes in plan order, fallback markers included.
    pub outcomes: Vec<SystemOutcome>,
}

impl AggregatedResult {
    pub fn fallback_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_fallback()).count()
    }
}

/// Merge per-system outcomes into one result.
pub fn aggregate(outcomes: Vec<SystemOutcome>) -> AggregatedResult {
    if let [SystemOutcome::Success { output, .. }] = outcomes.as_slice() {
        return AggregatedResult {
            is_valid: output.is_valid,
            confidence: output.confidence,
            consensus: None,
            suggestions: output.suggestions.clone(),
            data: output.data.clone(),
            outcomes,
        };
    }

    let votes: Vec<bool> = outcomes
        .iter()
        .filter_map(|o| o.output().and_then(|out| out.is_valid))
        .collect();

    let confidence = if outcomes.is_empty() {
        None
    } else {
        let sum: f64 = outcomes
            .iter()
            .map(|o| match o {
                SystemOutcome::Success { output, .. } => {
                    output.confidence.unwrap_or(MISSING_CONFIDENCE)
                }
                SystemOutcome::Fallback { .. } => MISSING_CONFIDENCE,
            })
            .sum();
        Some(sum / outcomes.len() as f64)
    };

    let mut seen = HashSet::new();
    let suggestions = outcomes
        .iter()
        .filter_map(SystemOutcome::output)
        .flat_map(|out| out.suggestions.iter())
        .filter(|s| seen.insert(s.as_str()))
        .cloned()
        .collect();

    let data = outcomes
        .iter()
        .filter_map(|o| match o {
            SystemOutcome::Success {
                system_id, output, ..
            } => Some((system_id.to_string(), output.data.clone())),
            SystemOutcome::Fallback { .. } => None,
        })
        .collect::<serde_json::Map<_, _>>();

    AggregatedResult {
        is_valid: majority(&votes),
        confidence,
        consensus: Some(consensus(&votes)),
        suggestions,
        data: serde_json::Value::Object(data),
        outcomes,
    }
}

/// Unanimity over the votes cast. No votes is `Mixed`.
pub fn consensus(votes: &[bool]) -> Consensus {
    if votes.is_empty() {
        Consensus::Mixed
    } else if votes.iter().all(|v| *v) {
        Consensus::UnanimousValid
    } else if votes.iter().all(|v| !*v) {
        Consensus::UnanimousInvalid
    } else {
        Consensus::Mixed
    }
}

/// Strict majority of `true`; a tie is `false`. No votes is `None`.
pub fn majority(votes: &[bool]) -> Option<bool> {
    if votes.is_empty() {
        return None;
    }
    let yes = votes.iter().filter(|v| **v).count();
    Some(yes * 2 > votes.len())
}
