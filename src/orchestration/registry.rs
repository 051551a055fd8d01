//! System registry.
//!
//! The `SystemRegistry` owns every registered backend together with its live
//! metrics: health status, load, response time EWMA and accuracy EWMA.
//! Routing works on [`SystemHandle`] snapshots so that a decision never sees
//! a half-applied update.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::core::Priority;
use crate::system::{Backend, SystemId, SystemSpec};
use crate::util::clamp_unit;
use crate::{Error, Result};

/// Load is accumulated in integer units so that `+step` and `-step` cancel
/// exactly. Exposed load is `units / LOAD_SCALE`, clamped to `[0, 1]`.
const LOAD_SCALE: f64 = 10_000.0;

/// Accuracy bump for a successful call.
pub const ACCURACY_REWARD: f64 = 0.01;

/// Accuracy penalty for a failed call.
pub const ACCURACY_PENALTY: f64 = 0.05;

/// Health status of a system, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    Healthy,
    Warning,
    Critical,
    Offline,
}

impl SystemStatus {
    /// One level worse. `Offline` stays `Offline`.
    pub fn degrade(self) -> Self {
        match self {
            SystemStatus::Healthy => SystemStatus::Warning,
            SystemStatus::Warning => SystemStatus::Critical,
            SystemStatus::Critical | SystemStatus::Offline => SystemStatus::Offline,
        }
    }

    /// Status after a failed probe.
    ///
    /// Misses walk `healthy -> warning -> critical` and hold at `critical`
    /// until `consecutive_misses` reaches `offline_after`.
    pub fn after_miss(self, consecutive_misses: u32, offline_after: u32) -> Self {
        if consecutive_misses >= offline_after {
            return SystemStatus::Offline;
        }
        match self {
            SystemStatus::Critical => SystemStatus::Critical,
            other => other.degrade(),
        }
    }
}

impl std::fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SystemStatus::Healthy => write!(f, "healthy"),
            SystemStatus::Warning => write!(f, "warning"),
            SystemStatus::Critical => write!(f, "critical"),
            SystemStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Point-in-time view of a registered system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHandle {
    pub id: SystemId,
    pub capabilities: std::collections::BTreeSet<String>,
    pub declared_priority: Priority,
    pub scalable: bool,
    pub status: SystemStatus,
    /// Current load in `[0, 1]`.
    pub load: f64,
    /// Smoothed response time; zero until the first call completes.
    pub response_time_ewma: Duration,
    /// Smoothed accuracy in `[0, 1]`.
    pub accuracy_ewma: f64,
    pub last_probe: Option<DateTime<Utc>>,
    /// Position in registration order, used as the final routing tie-break.
    pub registration_seq: u64,
}

impl SystemHandle {
    pub fn is_healthy(&self) -> bool {
        self.status == SystemStatus::Healthy
    }

    /// Whether this system offers at least one of the given tags.
    pub fn offers_any<'a, I>(&self, tags: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        tags.into_iter().any(|t| self.capabilities.contains(t))
    }
}

#[derive(Debug)]
struct SystemMetrics {
    status: SystemStatus,
    load_units: i64,
    response_time_ewma: Option<f64>,
    accuracy_ewma: f64,
    last_probe: Option<DateTime<Utc>>,
    consecutive_misses: u32,
}

impl SystemMetrics {
    fn load(&self) -> f64 {
        clamp_unit(self.load_units as f64 / LOAD_SCALE)
    }
}

/// A registered system: its declaration, its backend and its live metrics.
///
/// Shared by `Arc` with in-flight dispatches, so a system that is
/// unregistered mid-call still has its load released.
pub(crate) struct SystemEntry {
    spec: SystemSpec,
    seq: u64,
    backend: Arc<dyn Backend>,
    metrics: Mutex<SystemMetrics>,
}

impl SystemEntry {
    pub(crate) fn id(&self) -> &SystemId {
        &self.spec.id
    }

    pub(crate) fn backend(&self) -> Arc<dyn Backend> {
        Arc::clone(&self.backend)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SystemMetrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn handle(&self) -> SystemHandle {
        let m = self.lock();
        SystemHandle {
            id: self.spec.id.clone(),
            capabilities: self.spec.capabilities.clone(),
            declared_priority: self.spec.priority,
            scalable: self.spec.scalable,
            status: m.status,
            load: m.load(),
            response_time_ewma: Duration::from_secs_f64(m.response_time_ewma.unwrap_or(0.0)),
            accuracy_ewma: m.accuracy_ewma,
            last_probe: m.last_probe,
            registration_seq: self.seq,
        }
    }

    pub(crate) fn adjust_load(&self, delta: f64) -> f64 {
        let mut m = self.lock();
        m.load_units += (delta * LOAD_SCALE).round() as i64;
        let load = m.load();
        trace!(system = %self.spec.id, delta, load, "load adjusted");
        load
    }

    pub(crate) fn record_outcome(&self, response_time: Duration, success: bool, alpha: f64) {
        let mut m = self.lock();
        let sample = response_time.as_secs_f64();
        m.response_time_ewma = Some(match m.response_time_ewma {
            Some(prev) => alpha * sample + (1.0 - alpha) * prev,
            None => sample,
        });
        m.accuracy_ewma = if success {
            clamp_unit(m.accuracy_ewma + ACCURACY_REWARD)
        } else {
            clamp_unit(m.accuracy_ewma - ACCURACY_PENALTY)
        };
        trace!(
            system = %self.spec.id,
            success,
            response_ms = response_time.as_millis() as u64,
            accuracy = m.accuracy_ewma,
            "outcome recorded"
        );
    }

    /// Apply a probe result. Returns `(previous, current)` status.
    pub(crate) fn record_probe(&self, healthy: bool, offline_after: u32) -> (SystemStatus, SystemStatus) {
        let mut m = self.lock();
        let previous = m.status;
        if healthy {
            m.consecutive_misses = 0;
            m.status = SystemStatus::Healthy;
        } else {
            m.consecutive_misses = m.consecutive_misses.saturating_add(1);
            m.status = previous.after_miss(m.consecutive_misses, offline_after);
        }
        m.last_probe = Some(Utc::now());
        (previous, m.status)
    }
}

/// Registry of pluggable systems, in registration order.
pub struct SystemRegistry {
    systems: RwLock<Vec<Arc<SystemEntry>>>,
    next_seq: AtomicU64,
    ewma_alpha: f64,
    initial_accuracy: f64,
}

impl SystemRegistry {
    /// Create an empty registry.
    ///
    /// # Arguments
    ///
    /// * `ewma_alpha` - Smoothing factor for the response time EWMA
    /// * `initial_accuracy` - Accuracy assigned to newly registered systems
    pub fn new(ewma_alpha: f64, initial_accuracy: f64) -> Self {
        Self {
            systems: RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(0),
            ewma_alpha,
            initial_accuracy: clamp_unit(initial_accuracy),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.ewma_alpha, config.initial_accuracy)
    }

    pub fn ewma_alpha(&self) -> f64 {
        self.ewma_alpha
    }

    /// Register a system. Fails with `DuplicateSystemId` if the id is taken.
    pub fn register(&self, spec: SystemSpec, backend: Arc<dyn Backend>) -> Result<SystemHandle> {
        let mut systems = self.systems.write().unwrap_or_else(PoisonError::into_inner);
        if systems.iter().any(|s| s.spec.id == spec.id) {
            return Err(Error::DuplicateSystemId(spec.id.to_string()));
        }
        let entry = Arc::new(SystemEntry {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            spec,
            backend,
            metrics: Mutex::new(SystemMetrics {
                status: SystemStatus::Healthy,
                load_units: 0,
                response_time_ewma: None,
                accuracy_ewma: self.initial_accuracy,
                last_probe: None,
                consecutive_misses: 0,
            }),
        });
        let handle = entry.handle();
        systems.push(entry);
        info!(
            system = %handle.id,
            capabilities = ?handle.capabilities,
            "system registered"
        );
        Ok(handle)
    }

    /// Remove a system. In-flight calls keep their own reference and finish.
    pub fn unregister(&self, id: &SystemId) -> Result<SystemHandle> {
        let mut systems = self.systems.write().unwrap_or_else(PoisonError::into_inner);
        let pos = systems
            .iter()
            .position(|s| &s.spec.id == id)
            .ok_or_else(|| Error::SystemNotFound(id.to_string()))?;
        let entry = systems.remove(pos);
        info!(system = %id, "system unregistered");
        Ok(entry.handle())
    }

    pub fn get(&self, id: &SystemId) -> Option<SystemHandle> {
        self.entry(id).map(|e| e.handle())
    }

    pub(crate) fn entry(&self, id: &SystemId) -> Option<Arc<SystemEntry>> {
        self.systems
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|s| &s.spec.id == id)
            .cloned()
    }

    pub(crate) fn entries(&self) -> Vec<Arc<SystemEntry>> {
        self.systems
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of every system, in registration order.
    pub fn snapshot(&self) -> Vec<SystemHandle> {
        self.entries().iter().map(|e| e.handle()).collect()
    }

    /// Systems whose status is `healthy`, in registration order.
    pub fn list_healthy(&self) -> Vec<SystemHandle> {
        self.snapshot()
            .into_iter()
            .filter(SystemHandle::is_healthy)
            .collect()
    }

    /// Add `delta` to a system's load. Returns the clamped load.
    pub fn update_load(&self, id: &SystemId, delta: f64) -> Result<f64> {
        let entry = self
            .entry(id)
            .ok_or_else(|| Error::SystemNotFound(id.to_string()))?;
        Ok(entry.adjust_load(delta))
    }

    /// Fold one call result into the system's EWMAs.
    pub fn record_outcome(&self, id: &SystemId, response_time: Duration, success: bool) -> Result<()> {
        let entry = self
            .entry(id)
            .ok_or_else(|| Error::SystemNotFound(id.to_string()))?;
        entry.record_outcome(response_time, success, self.ewma_alpha);
        Ok(())
    }

    /// Apply a probe result to a system's status.
    pub fn record_probe(&self, id: &SystemId, healthy: bool, offline_after: u32) -> Result<SystemStatus> {
        let entry = self
            .entry(id)
            .ok_or_else(|| Error::SystemNotFound(id.to_string()))?;
        let (previous, current) = entry.record_probe(healthy, offline_after);
        if previous != current {
            debug!(system = %id, %previous, %current, "status changed");
        }
        Ok(current)
    }

    pub fn len(&self) -> usize {
        self.systems
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mean exposed load over all registered systems, 0 when empty.
    pub fn average_load(&self) -> f64 {
        let handles = self.snapshot();
        if handles.is_empty() {
            return 0.0;
        }
        handles.iter().map(|h| h.load).sum::<f64>() / handles.len() as f64
    }
}

impl std::fmt::Debug for SystemRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemRegistry")
            .field("systems", &self.len())
            .field("ewma_alpha", &self.ewma_alpha)
            .finish()
    }
}
