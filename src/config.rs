use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::{Error, Result};

/// Scoring constants for the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// How strongly current load lowers a single system's confidence.
    pub load_penalty: f64,
    /// Response time at which the latency factor bottoms out.
    pub latency_ceiling_ms: u64,
    /// Lower bound of the latency factor.
    pub min_latency_factor: f64,
    /// Discount applied to multi-system plans for aggregation overhead.
    pub pair_discount: f64,
    /// Maximum number of pair options kept per decision.
    pub max_pair_options: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            load_penalty: 0.3,
            latency_ceiling_ms: 10_000,
            min_latency_factor: 0.1,
            pair_discount: 0.9,
            max_pair_options: 3,
        }
    }
}

impl RouterConfig {
    pub fn latency_ceiling(&self) -> Duration {
        Duration::from_millis(self.latency_ceiling_ms)
    }
}

/// Probe cadence and scale-signal thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub interval_ms: u64,
    pub probe_timeout_ms: u64,
    /// Average load above which a scale-up signal is emitted.
    pub scale_up_load: f64,
    /// Queue depth above which a scale-up signal is emitted.
    pub scale_up_queue_depth: usize,
    /// Average load below which (with an empty queue) scale-down is possible.
    pub scale_down_load: f64,
    /// Consecutive failed probes after which a system is marked offline.
    pub offline_after_misses: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            probe_timeout_ms: 1_000,
            scale_up_load: 0.8,
            scale_up_queue_depth: 10,
            scale_down_load: 0.2,
            offline_after_misses: 5,
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Coordinator configuration, read from `~/.switchboard/switchboard.toml`.
///
/// Every field has a default, so a partial file (or none at all) is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_concurrent_tasks: usize,
    /// `None` leaves the overflow queue unbounded.
    pub max_queue_size: Option<usize>,
    /// Absorb per-system failures as fallback markers instead of failing the task.
    pub fallback_mode: bool,
    /// Load added to a system for the duration of each call.
    pub load_step: f64,
    /// Smoothing factor for the response time EWMA.
    pub ewma_alpha: f64,
    /// Accuracy assigned to a freshly registered system.
    pub initial_accuracy: f64,
    /// Buffer size of the event broadcast channel.
    pub event_capacity: usize,
    pub router: RouterConfig,
    pub health: HealthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 10,
            max_queue_size: Some(1_000),
            fallback_mode: true,
            load_step: 0.1,
            ewma_alpha: 0.2,
            initial_accuracy: 0.9,
            event_capacity: 256,
            router: RouterConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Config {
    pub fn switchboard_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".switchboard"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::switchboard_dir()?.join("switchboard.toml"))
    }

    /// Load the user config, falling back to defaults when no file exists.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config");
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        debug!(
            max_concurrent_tasks = config.max_concurrent_tasks,
            max_queue_size = ?config.max_queue_size,
            fallback_mode = config.fallback_mode,
            "config loaded"
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(Error::Config(
                "max_concurrent_tasks must be greater than 0".to_string(),
            ));
        }
        if self.max_queue_size == Some(0) {
            return Err(Error::Config(
                "max_queue_size must be greater than 0 (omit it for an unbounded queue)"
                    .to_string(),
            ));
        }
        if !(self.load_step > 0.0 && self.load_step <= 1.0) {
            return Err(Error::Config("load_step must be in (0, 1]".to_string()));
        }
        if !(self.ewma_alpha > 0.0 && self.ewma_alpha <= 1.0) {
            return Err(Error::Config("ewma_alpha must be in (0, 1]".to_string()));
        }
        if !(0.0..=1.0).contains(&self.initial_accuracy) {
            return Err(Error::Config(
                "initial_accuracy must be in [0, 1]".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config(
                "event_capacity must be greater than 0".to_string(),
            ));
        }
        if self.router.latency_ceiling_ms == 0 {
            return Err(Error::Config(
                "router.latency_ceiling_ms must be greater than 0".to_string(),
            ));
        }
        for (name, value) in [
            ("router.load_penalty", self.router.load_penalty),
            ("router.min_latency_factor", self.router.min_latency_factor),
            ("router.pair_discount", self.router.pair_discount),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!("{} must be in [0, 1]", name)));
            }
        }
        if self.health.interval_ms == 0 || self.health.probe_timeout_ms == 0 {
            return Err(Error::Config(
                "health intervals must be greater than 0".to_string(),
            ));
        }
        if self.health.offline_after_misses == 0 {
            return Err(Error::Config(
                "health.offline_after_misses must be greater than 0".to_string(),
            ));
        }
        if self.health.scale_down_load > self.health.scale_up_load {
            return Err(Error::Config(
                "health.scale_down_load must not exceed health.scale_up_load".to_string(),
            ));
        }
        Ok(())
    }
}
