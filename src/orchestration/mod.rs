//! Orchestration layer for the switchboard coordinator.
//!
//! This module provides the components that route, run and observe tasks:
//! the system registry, the capability router, the fan-out dispatcher, the
//! result aggregator, the health monitor, and the `Coordinator` that ties
//! them together behind admission control.

mod aggregator;
mod coordinator;
mod decisions;
mod dispatcher;
mod events;
mod health;
mod metrics;
mod registry;
mod retry;
mod router;

pub use aggregator::{aggregate, consensus, majority, AggregatedResult, Consensus, SystemOutcome, MISSING_CONFIDENCE};
pub use coordinator::{Coordinator, CoordinatorStatus, TaskHandle, TaskResult};
pub use decisions::{DecisionId, DecisionLog, RoutingDecision, RoutingOption};
pub use dispatcher::Dispatcher;
pub use events::{CoordinatorEvent, EventBus};
pub use health::{HealthMonitor, HealthReport, MonitorHandle, ProbeOutcome, ScaleSignal};
pub use metrics::{CoordinatorMetrics, MetricsSnapshot, SystemMetricsSnapshot};
pub use registry::{SystemHandle, SystemRegistry, SystemStatus, ACCURACY_PENALTY, ACCURACY_REWARD};
pub use retry::{run_with_retries, RetryPolicy};
pub use router::Router;
