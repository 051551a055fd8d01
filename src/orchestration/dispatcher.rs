//! Fan-out dispatcher.
//!
//! The `Dispatcher` runs one task against every system of its selected plan.
//! Each call runs on its own tokio task with:
//! - a load reservation (`+load_step`) released when the call ends, however it ends
//! - the task timeout, enforced per call
//! - a cancellation token shared with its siblings
//!
//! With fallback mode on, a failing system becomes a `Fallback` marker and
//! the remaining calls carry on. With it off, the first failure cancels the
//! siblings and the task fails with that error. Either way every call settles
//! before the dispatcher returns.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::Task;
use crate::system::{ExecutionContext, SystemId, SystemOutput};
use crate::{Error, Result};

use super::aggregator::SystemOutcome;
use super::registry::SystemEntry;

/// Holds a load reservation on a system and releases it on drop.
struct LoadGuard {
    entry: Arc<SystemEntry>,
    step: f64,
}

impl LoadGuard {
    fn acquire(entry: Arc<SystemEntry>, step: f64) -> Self {
        entry.adjust_load(step);
        Self { entry, step }
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.entry.adjust_load(-self.step);
    }
}

/// How one call ended.
#[derive(Debug)]
enum CallResult {
    Ok(SystemOutput),
    Failed {
        message: String,
        timed_out: bool,
        retryable: bool,
    },
    Cancelled,
}

/// Executes routing plans against registered systems.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    load_step: f64,
    fallback_mode: bool,
    ewma_alpha: f64,
}

impl Dispatcher {
    pub fn new(load_step: f64, fallback_mode: bool, ewma_alpha: f64) -> Self {
        Self {
            load_step,
            fallback_mode,
            ewma_alpha,
        }
    }

    pub fn fallback_mode(&self) -> bool {
        self.fallback_mode
    }

    /// Run `task` on every system in `systems` and wait for all of them.
    ///
    /// Outcomes are returned in plan order. Cancelling `cancel` stops every
    /// outstanding call and yields `Error::Cancelled`.
    pub(crate) async fn dispatch(
        &self,
        task: Arc<Task>,
        systems: Vec<Arc<SystemEntry>>,
        cancel: CancellationToken,
    ) -> Result<Vec<SystemOutcome>> {
        let siblings = cancel.child_token();
        let mut calls = FuturesUnordered::new();

        for (index, entry) in systems.iter().enumerate() {
            let entry = Arc::clone(entry);
            let task = Arc::clone(&task);
            let token = siblings.clone();
            let step = self.load_step;
            let alpha = self.ewma_alpha;
            let system_id = entry.id().clone();
            let handle = tokio::spawn(async move { run_call(entry, &task, token, step, alpha).await });
            calls.push(async move { (index, system_id, handle.await) });
        }

        let mut settled: Vec<Option<SystemOutcome>> = vec![None; systems.len()];
        let mut first_failure: Option<Error> = None;
        let mut cancelled = false;

        while let Some((index, system_id, joined)) = calls.next().await {
            let (result, elapsed) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(task = %task.id, system = %system_id, error = %e, "system call panicked");
                    if let Some(entry) = systems.get(index) {
                        entry.record_outcome(Duration::ZERO, false, self.ewma_alpha);
                    }
                    (
                        CallResult::Failed {
                            message: format!("call aborted: {}", e),
                            timed_out: false,
                            retryable: true,
                        },
                        Duration::ZERO,
                    )
                }
            };

            match result {
                CallResult::Ok(output) => {
                    debug!(
                        task = %task.id,
                        system = %system_id,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "system call succeeded"
                    );
                    settled[index] = Some(SystemOutcome::Success {
                        system_id,
                        output,
                        elapsed,
                    });
                }
                CallResult::Failed {
                    message,
                    timed_out,
                    retryable,
                } => {
                    let error = if timed_out {
                        Error::SystemTimeout {
                            system_id: system_id.to_string(),
                            timeout: task.timeout,
                        }
                    } else {
                        Error::SystemExecution {
                            system_id: system_id.to_string(),
                            message: message.clone(),
                            retryable,
                        }
                    };
                    if self.fallback_mode {
                        warn!(task = %task.id, system = %system_id, %error, "recording fallback marker");
                        if first_failure.is_none() {
                            first_failure = Some(error);
                        }
                        settled[index] = Some(SystemOutcome::fallback(
                            system_id, message, timed_out, retryable,
                        ));
                    } else if first_failure.is_none() {
                        warn!(task = %task.id, system = %system_id, %error, "system failed, cancelling siblings");
                        siblings.cancel();
                        first_failure = Some(error);
                    }
                }
                CallResult::Cancelled => cancelled = true,
            }
        }

        if !self.fallback_mode {
            if let Some(error) = first_failure {
                return Err(error);
            }
        }
        if cancelled || cancel.is_cancelled() {
            return Err(Error::Cancelled(task.id.to_string()));
        }

        let outcomes: Vec<SystemOutcome> = settled.into_iter().flatten().collect();
        if outcomes.iter().all(SystemOutcome::is_fallback) {
            // Every selected system failed.
            return Err(first_failure.unwrap_or_else(|| Error::NoAvailableSystem {
                task_id: task.id.to_string(),
                required: task.effective_capabilities().into_iter().collect(),
            }));
        }
        Ok(outcomes)
    }
}

async fn run_call(
    entry: Arc<SystemEntry>,
    task: &Task,
    cancel: CancellationToken,
    step: f64,
    alpha: f64,
) -> (CallResult, Duration) {
    let _load = LoadGuard::acquire(Arc::clone(&entry), step);
    let backend = entry.backend();
    let call_token = cancel.child_token();
    let ctx = ExecutionContext {
        task_id: task.id.clone(),
        kind: task.kind(),
        cancel: call_token.clone(),
    };
    let started = Instant::now();

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => CallResult::Cancelled,
        r = tokio::time::timeout(task.timeout, backend.execute(&ctx, &task.payload)) => match r {
            Ok(Ok(output)) => CallResult::Ok(output),
            Ok(Err(e)) => CallResult::Failed {
                message: e.message,
                timed_out: false,
                retryable: e.retryable,
            },
            Err(_) => CallResult::Failed {
                message: format!("timed out after {:?}", task.timeout),
                timed_out: true,
                retryable: true,
            },
        },
    };
    call_token.cancel();

    let elapsed = started.elapsed();
    match &result {
        CallResult::Ok(_) => entry.record_outcome(elapsed, true, alpha),
        CallResult::Failed { .. } => entry.record_outcome(elapsed, false, alpha),
        CallResult::Cancelled => {}
    }
    (result, elapsed)
}

/// Ids of the systems in a plan, for logs and events.
pub(crate) fn plan_ids(systems: &[Arc<SystemEntry>]) -> Vec<SystemId> {
    systems.iter().map(|e| e.id().clone()).collect()
}
