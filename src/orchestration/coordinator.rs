//! The coordinator.
//!
//! `Coordinator` is the public entry point. It owns a registry, a router, a
//! dispatcher, a decision log, metrics and an event bus, and runs admission
//! control over submitted tasks:
//!
//! 1. `submit` validates the task and either takes a free slot (routing it
//!    right away) or parks it in a FIFO queue.
//! 2. A dispatched task runs on its own tokio task, fans out to its selected
//!    systems and is aggregated into a [`TaskResult`].
//! 3. When a task finishes its slot is released and the oldest queued task is
//!    routed and dispatched.
//!
//! Admission state (active count, queue, task states) sits behind a single
//! mutex that is never held across an await.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::{Task, TaskId, TaskState};
use crate::system::{Backend, SystemId, SystemSpec};
use crate::{Error, Result};

use super::aggregator::{aggregate, AggregatedResult};
use super::decisions::{DecisionId, DecisionLog, RoutingDecision};
use super::dispatcher::{plan_ids, Dispatcher};
use super::events::{CoordinatorEvent, EventBus};
use super::health::{HealthMonitor, HealthReport, MonitorHandle};
use super::metrics::{CoordinatorMetrics, MetricsSnapshot};
use super::registry::{SystemEntry, SystemHandle, SystemRegistry};
use super::router::Router;

/// Successful outcome of a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub decision_id: DecisionId,
    pub systems: Vec<SystemId>,
    pub result: AggregatedResult,
    /// Time from submission to completion, queueing included.
    pub latency: Duration,
}

/// Future resolved when a submitted task reaches a terminal state.
#[derive(Debug)]
pub struct TaskHandle {
    task_id: TaskId,
    rx: oneshot::Receiver<Result<TaskResult>>,
}

impl TaskHandle {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }
}

impl Future for TaskHandle {
    type Output = Result<TaskResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(Error::ShuttingDown)))
    }
}

/// Point-in-time overview of the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinatorStatus {
    pub systems: Vec<SystemHandle>,
    pub active_tasks: usize,
    pub queued_tasks: usize,
    pub max_concurrent_tasks: usize,
    pub fallback_mode: bool,
    pub shutting_down: bool,
}

struct Pending {
    task: Task,
    tx: oneshot::Sender<Result<TaskResult>>,
    submitted_at: Instant,
}

struct Launch {
    task: Arc<Task>,
    decision: RoutingDecision,
    systems: Vec<Arc<SystemEntry>>,
    tx: oneshot::Sender<Result<TaskResult>>,
    submitted_at: Instant,
}

#[derive(Default)]
struct Admission {
    active: usize,
    queue: VecDeque<Pending>,
    /// Every id ever submitted, with its latest state. Never evicted: ids
    /// stay unique for the coordinator's lifetime, so this grows with the
    /// number of distinct ids submitted.
    states: HashMap<TaskId, TaskState>,
    shutting_down: bool,
}

struct Inner {
    config: Config,
    registry: Arc<SystemRegistry>,
    router: Router,
    dispatcher: Dispatcher,
    decisions: DecisionLog,
    metrics: CoordinatorMetrics,
    events: EventBus,
    admission: Mutex<Admission>,
    root: CancellationToken,
}

/// Adaptive multi-backend task coordinator.
///
/// Cheap to clone; clones share the same state. Methods that dispatch work
/// spawn tokio tasks and must be called from within a tokio runtime.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Build a coordinator from a validated config.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(SystemRegistry::from_config(&config));
        let inner = Inner {
            router: Router::new(config.router.clone()),
            dispatcher: Dispatcher::new(config.load_step, config.fallback_mode, config.ewma_alpha),
            decisions: DecisionLog::new(),
            metrics: CoordinatorMetrics::new(),
            events: EventBus::new(config.event_capacity),
            admission: Mutex::new(Admission::default()),
            root: CancellationToken::new(),
            registry,
            config,
        };
        info!(
            max_concurrent_tasks = inner.config.max_concurrent_tasks,
            max_queue_size = ?inner.config.max_queue_size,
            fallback_mode = inner.config.fallback_mode,
            "coordinator created"
        );
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The registry this coordinator routes over.
    pub fn registry(&self) -> &SystemRegistry {
        &self.inner.registry
    }

    /// Submit a task.
    ///
    /// Returns a handle resolving to the task's result. Fails immediately
    /// with `InvalidTask`, `QueueFull`, `NoAvailableSystem` or `ShuttingDown`.
    pub fn submit(&self, task: Task) -> Result<TaskHandle> {
        let inner = &self.inner;
        if let Err(e) = task.validate() {
            inner.metrics.record_rejected();
            return Err(e);
        }

        let (tx, rx) = oneshot::channel();
        let handle = TaskHandle {
            task_id: task.id.clone(),
            rx,
        };
        let submitted_at = Instant::now();

        let mut adm = inner.lock();
        if adm.shutting_down {
            inner.metrics.record_rejected();
            return Err(Error::ShuttingDown);
        }
        if adm.states.contains_key(&task.id) {
            inner.metrics.record_rejected();
            return Err(Error::InvalidTask(format!(
                "task id {} has already been used",
                task.id
            )));
        }

        if adm.active < inner.config.max_concurrent_tasks {
            inner.metrics.record_submitted();
            match inner.try_launch(&mut adm, &task) {
                Ok((decision, systems)) => {
                    drop(adm);
                    inner.spawn(Launch {
                        task: Arc::new(task),
                        decision,
                        systems,
                        tx,
                        submitted_at,
                    });
                    Ok(handle)
                }
                Err(e) => {
                    drop(adm);
                    inner.emit_failed(&task.id, &e);
                    Err(e)
                }
            }
        } else {
            if let Some(max) = inner.config.max_queue_size {
                if adm.queue.len() >= max {
                    inner.metrics.record_rejected();
                    warn!(task = %task.id, max, "queue full, rejecting task");
                    return Err(Error::QueueFull { max });
                }
            }
            inner.metrics.record_submitted();
            let task_id = task.id.clone();
            adm.states.insert(task_id.clone(), TaskState::Queued);
            adm.queue.push_back(Pending {
                task,
                tx,
                submitted_at,
            });
            let queue_depth = adm.queue.len();
            drop(adm);

            debug!(task = %task_id, queue_depth, "task queued");
            inner.events.emit(CoordinatorEvent::TaskQueued {
                task_id,
                queue_depth,
            });
            Ok(handle)
        }
    }

    /// Remove a queued task. Its handle resolves to `Error::Cancelled`.
    ///
    /// Dispatched and finished tasks cannot be cancelled.
    pub fn cancel(&self, task_id: &TaskId) -> Result<()> {
        let inner = &self.inner;
        let mut adm = inner.lock();
        let state = *adm
            .states
            .get(task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        if state != TaskState::Queued {
            return Err(Error::InvalidTask(format!(
                "task {} is {} and cannot be cancelled",
                task_id, state
            )));
        }
        let pos = adm
            .queue
            .iter()
            .position(|p| &p.task.id == task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        let pending = adm.queue.remove(pos);
        adm.states.insert(task_id.clone(), TaskState::Cancelled);
        drop(adm);

        inner.metrics.record_cancelled();
        info!(task = %task_id, "queued task cancelled");
        inner.events.emit(CoordinatorEvent::TaskCancelled {
            task_id: task_id.clone(),
        });
        if let Some(p) = pending {
            let _ = p.tx.send(Err(Error::Cancelled(task_id.to_string())));
        }
        Ok(())
    }

    pub fn register_system(&self, spec: SystemSpec, backend: Arc<dyn Backend>) -> Result<SystemHandle> {
        self.inner.registry.register(spec, backend)
    }

    pub fn unregister_system(&self, id: &SystemId) -> Result<SystemHandle> {
        self.inner.registry.unregister(id)
    }

    pub fn status(&self) -> CoordinatorStatus {
        let (active_tasks, queued_tasks, shutting_down) = {
            let adm = self.inner.lock();
            (adm.active, adm.queue.len(), adm.shutting_down)
        };
        CoordinatorStatus {
            systems: self.inner.registry.snapshot(),
            active_tasks,
            queued_tasks,
            max_concurrent_tasks: self.inner.config.max_concurrent_tasks,
            fallback_mode: self.inner.config.fallback_mode,
            shutting_down,
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner
            .metrics
            .snapshot(&self.inner.registry.snapshot())
    }

    /// Every routing decision so far, oldest first.
    pub fn decisions(&self) -> Vec<RoutingDecision> {
        self.inner.decisions.all()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.inner.events.subscribe()
    }

    pub fn task_state(&self, task_id: &TaskId) -> Option<TaskState> {
        self.inner.lock().states.get(task_id).copied()
    }

    pub fn queue_depth(&self) -> usize {
        self.inner.queue_depth()
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active
    }

    pub fn system(&self, id: &SystemId) -> Option<SystemHandle> {
        self.inner.registry.get(id)
    }

    /// Start the periodic health loop. It stops when the returned handle is
    /// shut down or the coordinator shuts down.
    pub fn start_health_monitor(&self) -> MonitorHandle {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        self.health_monitor().spawn(&self.inner.root, move || {
            weak.upgrade().map(|inner| inner.queue_depth()).unwrap_or(0)
        })
    }

    /// Run one health cycle now.
    pub async fn check_health(&self) -> HealthReport {
        let depth = self.queue_depth();
        self.health_monitor().check(depth).await
    }

    /// Stop admission, cancel every queued task and signal in-flight calls.
    ///
    /// Returns the number of queued tasks that were cancelled.
    pub fn shutdown(&self) -> usize {
        let inner = &self.inner;
        let drained: Vec<Pending> = {
            let mut adm = inner.lock();
            adm.shutting_down = true;
            let drained: Vec<Pending> = adm.queue.drain(..).collect();
            for p in &drained {
                adm.states.insert(p.task.id.clone(), TaskState::Cancelled);
            }
            drained
        };
        inner.root.cancel();

        let count = drained.len();
        for p in drained {
            inner.metrics.record_cancelled();
            inner.events.emit(CoordinatorEvent::TaskCancelled {
                task_id: p.task.id.clone(),
            });
            let _ = p.tx.send(Err(Error::Cancelled(p.task.id.to_string())));
        }
        info!(cancelled = count, "coordinator shut down");
        count
    }

    fn health_monitor(&self) -> HealthMonitor {
        HealthMonitor::new(
            Arc::clone(&self.inner.registry),
            self.inner.events.clone(),
            self.inner.config.health.clone(),
        )
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("registry", &self.inner.registry)
            .field("max_concurrent_tasks", &self.inner.config.max_concurrent_tasks)
            .finish()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Admission> {
        self.admission.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue_depth(&self) -> usize {
        self.lock().queue.len()
    }

    /// Route `task` and take a slot for it. Called with the admission lock
    /// held; on routing failure the task is marked `Failed`.
    fn try_launch(
        &self,
        adm: &mut Admission,
        task: &Task,
    ) -> Result<(RoutingDecision, Vec<Arc<SystemEntry>>)> {
        match self.route(task) {
            Ok(planned) => {
                adm.active += 1;
                adm.states.insert(task.id.clone(), TaskState::Dispatched);
                Ok(planned)
            }
            Err(e) => {
                adm.states.insert(task.id.clone(), TaskState::Failed);
                self.metrics.record_failed(false);
                Err(e)
            }
        }
    }

    /// Rank plans, record the decision and resolve the selected systems.
    fn route(&self, task: &Task) -> Result<(RoutingDecision, Vec<Arc<SystemEntry>>)> {
        let snapshot = self.registry.list_healthy();
        let decision = self.router.route(task, &snapshot);
        self.decisions.append(decision.clone());

        debug!(
            task = %task.id,
            decision = %decision.id.short(),
            candidates = decision.candidate_options.len(),
            selected = ?decision.selected_systems(),
            "routing decision"
        );
        self.events.emit(CoordinatorEvent::RoutingDecision {
            decision_id: decision.id,
            task_id: task.id.clone(),
            selected: decision.selected.as_ref().map(|o| o.systems.clone()),
            confidence: decision.selected.as_ref().map(|o| o.confidence),
        });

        let systems: Vec<Arc<SystemEntry>> = decision
            .selected_systems()
            .iter()
            .filter_map(|id| self.registry.entry(id))
            .collect();
        if systems.is_empty() {
            warn!(task = %task.id, "no available system");
            return Err(Error::NoAvailableSystem {
                task_id: task.id.to_string(),
                required: task.effective_capabilities().into_iter().collect(),
            });
        }
        Ok((decision, systems))
    }

    fn spawn(self: &Arc<Self>, launch: Launch) {
        tokio::spawn(run(Arc::clone(self), launch));
    }

    /// Release a slot, record the final state and start queued work.
    fn finish(self: &Arc<Self>, task_id: &TaskId, state: TaskState) {
        let mut launches = Vec::new();
        let mut failed = Vec::new();
        {
            let mut adm = self.lock();
            adm.active = adm.active.saturating_sub(1);
            adm.states.insert(task_id.clone(), state);
            while adm.active < self.config.max_concurrent_tasks && !adm.shutting_down {
                let Some(pending) = adm.queue.pop_front() else {
                    break;
                };
                match self.try_launch(&mut adm, &pending.task) {
                    Ok((decision, systems)) => launches.push(Launch {
                        task: Arc::new(pending.task),
                        decision,
                        systems,
                        tx: pending.tx,
                        submitted_at: pending.submitted_at,
                    }),
                    Err(e) => failed.push((pending, e)),
                }
            }
        }

        for (pending, e) in failed {
            self.emit_failed(&pending.task.id, &e);
            let _ = pending.tx.send(Err(e));
        }
        for launch in launches {
            self.spawn(launch);
        }
    }

    fn emit_failed(&self, task_id: &TaskId, error: &Error) {
        self.events.emit(CoordinatorEvent::TaskFailed {
            task_id: task_id.clone(),
            error: error.to_string(),
            category: error.category().to_string(),
        });
    }
}

async fn run(inner: Arc<Inner>, launch: Launch) {
    let Launch {
        task,
        decision,
        systems,
        tx,
        submitted_at,
    } = launch;
    let ids = plan_ids(&systems);

    info!(task = %task.id, kind = %task.kind(), systems = ?ids, "task dispatched");
    inner.events.emit(CoordinatorEvent::TaskDispatched {
        task_id: task.id.clone(),
        decision_id: decision.id,
        systems: ids.clone(),
    });

    let token = inner.root.child_token();
    let outcome = inner
        .dispatcher
        .dispatch(Arc::clone(&task), systems, token)
        .await;
    let latency = submitted_at.elapsed();

    let (state, reply) = match outcome {
        Ok(outcomes) => {
            let result = aggregate(outcomes);
            let fallbacks = result.fallback_count();
            inner.metrics.record_completed(latency, fallbacks);
            info!(
                task = %task.id,
                latency_ms = latency.as_millis() as u64,
                fallbacks,
                "task completed"
            );
            inner.events.emit(CoordinatorEvent::TaskCompleted {
                task_id: task.id.clone(),
                latency,
                fallbacks,
            });
            (
                TaskState::Completed,
                Ok(TaskResult {
                    task_id: task.id.clone(),
                    decision_id: decision.id,
                    systems: ids,
                    result,
                    latency,
                }),
            )
        }
        Err(e) => {
            let timed_out = matches!(e, Error::SystemTimeout { .. });
            inner.metrics.record_failed(timed_out);
            error!(task = %task.id, error = %e, category = e.category(), "task failed");
            inner.emit_failed(&task.id, &e);
            let state = if timed_out {
                TaskState::TimedOut
            } else {
                TaskState::Failed
            };
            (state, Err(e))
        }
    };

    inner.finish(&task.id, state);
    let _ = tx.send(reply);
}
