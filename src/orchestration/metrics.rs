//! Coordinator metrics.
//!
//! Counters are plain atomics updated by admission and completion paths.
//! `MetricsSnapshot` combines them with a per-system view taken from the
//! registry at snapshot time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::system::SystemId;

use super::registry::{SystemHandle, SystemStatus};

/// Task counters for one coordinator.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    tasks_submitted: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_timed_out: AtomicU64,
    tasks_cancelled: AtomicU64,
    tasks_rejected: AtomicU64,
    fallbacks: AtomicU64,
    total_latency_us: AtomicU64,
}

impl CoordinatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A task passed validation and was admitted or queued.
    pub fn record_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// A task was refused at admission (invalid, queue full, shutting down).
    pub fn record_rejected(&self) {
        self.tasks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self, latency: Duration, fallbacks: usize) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.fallbacks
            .fetch_add(fallbacks as u64, Ordering::Relaxed);
    }

    /// A task ended in `Failed` or `TimedOut`.
    pub fn record_failed(&self, timed_out: bool) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.tasks_timed_out.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cancelled(&self) {
        self.tasks_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of the counters plus the given per-system view.
    pub fn snapshot(&self, systems: &[SystemHandle]) -> MetricsSnapshot {
        let completed = self.tasks_completed.load(Ordering::Relaxed);
        let total_us = self.total_latency_us.load(Ordering::Relaxed);
        MetricsSnapshot {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_completed: completed,
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_timed_out: self.tasks_timed_out.load(Ordering::Relaxed),
            tasks_cancelled: self.tasks_cancelled.load(Ordering::Relaxed),
            tasks_rejected: self.tasks_rejected.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            average_latency: if completed == 0 {
                Duration::ZERO
            } else {
                Duration::from_micros(total_us / completed)
            },
            systems: systems.iter().map(SystemMetricsSnapshot::from).collect(),
        }
    }
}

/// Per-system utilization and accuracy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemMetricsSnapshot {
    pub id: SystemId,
    pub status: SystemStatus,
    pub utilization: f64,
    pub accuracy: f64,
    pub response_time: Duration,
}

impl From<&SystemHandle> for SystemMetricsSnapshot {
    fn from(h: &SystemHandle) -> Self {
        Self {
            id: h.id.clone(),
            status: h.status,
            utilization: h.load,
            accuracy: h.accuracy_ewma,
            response_time: h.response_time_ewma,
        }
    }
}

/// Point-in-time copy of the coordinator metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    /// Includes timed out tasks.
    pub tasks_failed: u64,
    pub tasks_timed_out: u64,
    pub tasks_cancelled: u64,
    pub tasks_rejected: u64,
    /// Fallback markers recorded across completed tasks.
    pub fallbacks: u64,
    /// Mean submit-to-completion latency of completed tasks.
    pub average_latency: Duration,
    pub systems: Vec<SystemMetricsSnapshot>,
}

impl MetricsSnapshot {
    /// Completed tasks over finished tasks (0 when none have finished).
    pub fn success_rate(&self) -> f64 {
        let finished = self.tasks_completed + self.tasks_failed;
        if finished == 0 {
            0.0
        } else {
            self.tasks_completed as f64 / finished as f64
        }
    }

    /// Tasks that have reached a terminal state.
    pub fn tasks_finished(&self) -> u64 {
        self.tasks_completed + self.tasks_failed + self.tasks_cancelled
    }
}
