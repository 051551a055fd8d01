//! Caller-side retries.
//!
//! The coordinator never retries on its own. `run_with_retries` resubmits a
//! task whose failure is retryable (`SystemTimeout`, or `SystemExecution`
//! that the backend did not mark permanent) as a fresh task with id
//! `<id>#retry-<n>`, backing off exponentially between attempts, up to
//! `task.max_retries` extra attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::Task;
use crate::Result;

use super::coordinator::{Coordinator, TaskResult};

/// Backoff schedule for resubmissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate() -> Self {
        Self {
            initial_delay_ms: 0,
            multiplier: 1.0,
            max_delay_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        let ms = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

/// Submit `task` and resubmit it on retryable failures.
///
/// Returns the first success or the last error.
pub async fn run_with_retries(
    coordinator: &Coordinator,
    task: Task,
    policy: &RetryPolicy,
) -> Result<TaskResult> {
    let mut attempt = 0;
    let mut current = task.clone();
    loop {
        let outcome = match coordinator.submit(current.clone()) {
            Ok(handle) => handle.await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(result) => {
                if attempt > 0 {
                    debug!(task = %task.id, attempt, "task succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < task.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                warn!(
                    task = %task.id,
                    attempt,
                    max_retries = task.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying task"
                );
                tokio::time::sleep(delay).await;
                current = task.resubmission(attempt);
            }
            Err(e) => return Err(e),
        }
    }
}
