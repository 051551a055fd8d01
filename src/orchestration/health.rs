//! Health monitoring for registered systems.
//!
//! The `HealthMonitor` probes every system on a fixed interval, moves each
//! one along the `healthy -> warning -> critical -> offline` ladder on
//! failure (one success restores `healthy`), and emits scale signals from
//! the average load and the admission queue depth. Signals are advisory; the
//! monitor never adds or removes systems.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::HealthConfig;
use crate::system::SystemId;
use crate::util::with_timeout;
use crate::Error;

use super::events::{CoordinatorEvent, EventBus};
use super::registry::{SystemRegistry, SystemStatus};

/// Result of probing one system.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeOutcome {
    pub system_id: SystemId,
    pub healthy: bool,
    pub previous: SystemStatus,
    pub current: SystemStatus,
    pub detail: Option<String>,
}

/// Advisory capacity signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleSignal {
    ScaleUp { average_load: f64, queue_depth: usize },
    ScaleDown { average_load: f64 },
}

/// Outcome of one health cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub checked_at: DateTime<Utc>,
    pub probes: Vec<ProbeOutcome>,
    pub average_load: f64,
    pub queue_depth: usize,
    pub signal: Option<ScaleSignal>,
}

impl HealthReport {
    pub fn status_of(&self, id: &SystemId) -> Option<SystemStatus> {
        self.probes
            .iter()
            .find(|p| &p.system_id == id)
            .map(|p| p.current)
    }
}

/// Handle to a running health loop.
#[derive(Debug)]
pub struct MonitorHandle {
    cancel: CancellationToken,
}

impl MonitorHandle {
    /// Stop the loop after its current cycle.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Probes systems and derives scale signals.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    registry: Arc<SystemRegistry>,
    events: EventBus,
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(registry: Arc<SystemRegistry>, events: EventBus, config: HealthConfig) -> Self {
        Self {
            registry,
            events,
            config,
        }
    }

    /// Run one probe cycle.
    ///
    /// Every system is probed concurrently under `probe_timeout`. A timeout
    /// or probe error counts as a failed probe.
    pub async fn check(&self, queue_depth: usize) -> HealthReport {
        let entries = self.registry.entries();
        let probe_timeout = self.config.probe_timeout();

        let probes = entries.iter().map(|entry| {
            let backend = entry.backend();
            let id = entry.id().clone();
            async move {
                let result = with_timeout(probe_timeout, async {
                    backend.probe().await.map_err(|e| Error::SystemExecution {
                        system_id: id.to_string(),
                        message: e.message,
                        retryable: e.retryable,
                    })
                })
                .await;
                (id, result)
            }
        });
        let results = join_all(probes).await;

        let mut outcomes = Vec::with_capacity(results.len());
        for (entry, (system_id, result)) in entries.iter().zip(results) {
            let (healthy, detail) = match result {
                Ok(report) => (report.healthy, report.detail),
                Err(e) => (false, Some(e.to_string())),
            };
            let (previous, current) = entry.record_probe(healthy, self.config.offline_after_misses);
            trace!(system = %system_id, healthy, %current, "probe finished");

            if previous != current {
                if current == SystemStatus::Healthy {
                    info!(system = %system_id, %previous, "system recovered");
                } else {
                    warn!(system = %system_id, %previous, %current, ?detail, "system degraded");
                }
                self.events.emit(CoordinatorEvent::SystemHealthUpdate {
                    system_id: system_id.clone(),
                    previous,
                    current,
                });
            }

            outcomes.push(ProbeOutcome {
                system_id,
                healthy,
                previous,
                current,
                detail,
            });
        }

        let average_load = self.registry.average_load();
        let signal = self.evaluate_scale(average_load, queue_depth, entries.len());
        match &signal {
            Some(ScaleSignal::ScaleUp {
                average_load,
                queue_depth,
            }) => {
                warn!(average_load, queue_depth, "scale up needed");
                self.events.emit(CoordinatorEvent::ScaleUpNeeded {
                    average_load: *average_load,
                    queue_depth: *queue_depth,
                });
            }
            Some(ScaleSignal::ScaleDown { average_load }) => {
                debug!(average_load, "scale down possible");
                self.events.emit(CoordinatorEvent::ScaleDownPossible {
                    average_load: *average_load,
                });
            }
            None => {}
        }

        HealthReport {
            checked_at: Utc::now(),
            probes: outcomes,
            average_load,
            queue_depth,
            signal,
        }
    }

    /// Scale signal for the given load and backlog, if any.
    ///
    /// Scale-down needs at least one registered system.
    pub fn evaluate_scale(
        &self,
        average_load: f64,
        queue_depth: usize,
        system_count: usize,
    ) -> Option<ScaleSignal> {
        if average_load > self.config.scale_up_load || queue_depth > self.config.scale_up_queue_depth
        {
            Some(ScaleSignal::ScaleUp {
                average_load,
                queue_depth,
            })
        } else if system_count > 0
            && average_load < self.config.scale_down_load
            && queue_depth == 0
        {
            Some(ScaleSignal::ScaleDown { average_load })
        } else {
            None
        }
    }

    /// Run `check` every `interval` until the handle is shut down or
    /// `parent` is cancelled. `queue_depth` is sampled once per cycle.
    pub fn spawn<F>(self, parent: &CancellationToken, queue_depth: F) -> MonitorHandle
    where
        F: Fn() -> usize + Send + Sync + 'static,
    {
        let cancel = parent.child_token();
        let cancel_clone = cancel.clone();
        let period = self.config.interval();

        debug!(interval_ms = period.as_millis() as u64, "HealthMonitor::spawn");

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => {
                        debug!("HealthMonitor cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        let report = self.check(queue_depth()).await;
                        trace!(systems = report.probes.len(), average_load = report.average_load, "health cycle done");
                    }
                }
            }
        });

        MonitorHandle { cancel }
    }

    pub fn interval(&self) -> Duration {
        self.config.interval()
    }
}
