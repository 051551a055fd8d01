//! Capability-based router.
//!
//! The router is a pure function of a registry snapshot and a task: the same
//! inputs always produce the same ranking and the same selection. It scores
//! single-system plans and, for analysis or critical tasks, pairs of systems,
//! then selects the best one.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::Utc;

use crate::config::RouterConfig;
use crate::core::{Priority, Task, TaskKind};
use crate::util::clamp_unit;

use super::decisions::{DecisionId, RoutingDecision, RoutingOption};
use super::registry::SystemHandle;

/// Scores and selects routing plans.
#[derive(Debug, Clone, Default)]
pub struct Router {
    config: RouterConfig,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Confidence of sending a task to one system.
    ///
    /// `accuracy * (1 - load * load_penalty) * max(min_latency_factor, 1 - rt / ceiling)`
    pub fn single_confidence(&self, system: &SystemHandle) -> f64 {
        let ceiling = self.config.latency_ceiling().as_secs_f64();
        let latency_factor = (1.0 - system.response_time_ewma.as_secs_f64() / ceiling)
            .max(self.config.min_latency_factor);
        clamp_unit(
            system.accuracy_ewma * (1.0 - system.load * self.config.load_penalty) * latency_factor,
        )
    }

    /// Confidence of fanning a task out to two systems.
    pub fn pair_confidence(&self, a: &SystemHandle, b: &SystemHandle) -> f64 {
        clamp_unit((a.accuracy_ewma + b.accuracy_ewma) / 2.0 * self.config.pair_discount)
    }

    /// Whether the task warrants multi-system plans.
    pub fn wants_pairs(task: &Task) -> bool {
        task.kind() == TaskKind::Analysis || task.priority == Priority::Critical
    }

    /// Healthy systems able to take the task, in registration order.
    pub fn candidates<'a>(
        &self,
        task: &Task,
        systems: &'a [SystemHandle],
    ) -> Vec<&'a SystemHandle> {
        let required = task.effective_capabilities();
        let mut capable: Vec<&SystemHandle> = systems
            .iter()
            .filter(|s| s.is_healthy() && s.offers_any(&required))
            .collect();
        capable.sort_by_key(|s| s.registration_seq);
        capable
    }

    /// Rank every plan for `task`, best first.
    pub fn rank(&self, task: &Task, systems: &[SystemHandle]) -> Vec<RoutingOption> {
        let required = task.effective_capabilities();
        let capable = self.candidates(task, systems);

        let mut ranked: Vec<(RoutingOption, Vec<u64>)> = capable
            .iter()
            .map(|s| (self.single_option(task, s, &required), vec![s.registration_seq]))
            .collect();

        if Self::wants_pairs(task) && capable.len() >= 2 {
            let mut pairs = Vec::new();
            for (i, a) in capable.iter().enumerate() {
                for b in &capable[i + 1..] {
                    pairs.push((
                        self.pair_option(task, a, b),
                        vec![a.registration_seq, b.registration_seq],
                    ));
                }
            }
            pairs.sort_by(|x, y| compare(x, y));
            pairs.truncate(self.config.max_pair_options);
            ranked.extend(pairs);
        }

        ranked.sort_by(|x, y| compare(x, y));
        ranked.into_iter().map(|(option, _)| option).collect()
    }

    /// Rank plans and build the decision to record. `selected` is `None`
    /// when no healthy system offers a required capability.
    pub fn route(&self, task: &Task, systems: &[SystemHandle]) -> RoutingDecision {
        let candidate_options = self.rank(task, systems);
        let selected = candidate_options.first().cloned();
        RoutingDecision {
            id: DecisionId::new(),
            task_id: task.id.clone(),
            candidate_options,
            selected,
            created_at: Utc::now(),
        }
    }

    fn single_option(
        &self,
        task: &Task,
        system: &SystemHandle,
        required: &BTreeSet<String>,
    ) -> RoutingOption {
        let matched: Vec<&str> = system
            .capabilities
            .iter()
            .filter(|c| required.contains(*c))
            .map(String::as_str)
            .collect();
        RoutingOption {
            systems: vec![system.id.clone()],
            description: format!("single system {}", system.id),
            confidence: self.single_confidence(system),
            impact: task.priority,
            reasoning: format!(
                "matches [{}]; accuracy {:.2}, load {:.2}, response {}ms",
                matched.join(", "),
                system.accuracy_ewma,
                system.load,
                system.response_time_ewma.as_millis()
            ),
            combined_load: system.load,
        }
    }

    fn pair_option(&self, task: &Task, a: &SystemHandle, b: &SystemHandle) -> RoutingOption {
        RoutingOption {
            systems: vec![a.id.clone(), b.id.clone()],
            description: format!("fan out to {} and {}", a.id, b.id),
            confidence: self.pair_confidence(a, b),
            impact: bump(task.priority),
            reasoning: format!(
                "{} task; mean accuracy {:.2} discounted by {:.2} for aggregation",
                if task.kind() == TaskKind::Analysis {
                    "analysis"
                } else {
                    "critical"
                },
                (a.accuracy_ewma + b.accuracy_ewma) / 2.0,
                self.config.pair_discount
            ),
            combined_load: a.load + b.load,
        }
    }
}

/// Higher confidence first, then fewer systems, then lower combined load,
/// then earliest registration.
fn compare(x: &(RoutingOption, Vec<u64>), y: &(RoutingOption, Vec<u64>)) -> Ordering {
    y.0.confidence
        .total_cmp(&x.0.confidence)
        .then_with(|| x.0.systems.len().cmp(&y.0.systems.len()))
        .then_with(|| x.0.combined_load.total_cmp(&y.0.combined_load))
        .then_with(|| x.1.cmp(&y.1))
}

fn bump(priority: Priority) -> Priority {
    match priority {
        Priority::Low => Priority::Medium,
        Priority::Medium => Priority::High,
        Priority::High | Priority::Critical => Priority::Critical,
    }
}
