//! Routing integration tests.
//!
//! These tests verify that routing is deterministic, that tasks with no
//! capable system fail without touching any system, and that every decision
//! lands in the decision log.

use std::sync::Arc;

use switchboard::orchestration::Router;
use switchboard::{Error, Priority, SystemId, SystemSpec, TaskState};

use crate::fixtures::*;

/// Test: Routing determinism
/// Given one registry snapshot and one task
/// When the router runs repeatedly
/// Then it ranks and selects identically every time
#[tokio::test]
async fn test_same_snapshot_same_selection() {
    let coord = coordinator(4);
    for id in ["a1", "a2", "a3", "a4"] {
        coord
            .register_system(analyzer_spec(id), Arc::new(MockSystem::valid(0.9)))
            .unwrap();
    }
    coord
        .registry()
        .update_load(&SystemId::new("a1"), 0.4)
        .unwrap();

    let snapshot = coord.status().systems;
    let router = Router::new(coord.config().router.clone());
    let task = analysis_task("det");
    let first = router.route(&task, &snapshot);
    for _ in 0..20 {
        let again = router.route(&task, &snapshot);
        assert_eq!(again.candidate_options, first.candidate_options);
        assert_eq!(again.selected, first.selected);
    }
}

/// Test: No-candidate failure
/// Given systems that offer none of the required capabilities
/// When a task is submitted
/// Then it fails with NoAvailableSystem and no system handle changes
#[tokio::test]
async fn test_no_candidate_leaves_systems_untouched() {
    let coord = coordinator(2);
    let mock = Arc::new(MockSystem::valid(0.9));
    coord
        .register_system(
            SystemSpec::new("learner").with_capability("pattern_learning"),
            mock.clone(),
        )
        .unwrap();
    let before = coord.status().systems;

    let err = coord.submit(validation_task("orphan")).unwrap_err();
    match err {
        Error::NoAvailableSystem { task_id, required } => {
            assert_eq!(task_id, "orphan");
            assert!(required.contains(&"operation_validation".to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(coord.status().systems, before);
    assert_eq!(mock.calls(), 0);
    assert_eq!(
        coord.task_state(&switchboard::TaskId::new("orphan")),
        Some(TaskState::Failed)
    );
    let decisions = coord.decisions();
    assert_eq!(decisions.len(), 1);
    assert!(decisions[0].selected.is_none());
}

/// Test: Unregistered systems receive no new work
#[tokio::test]
async fn test_unregistered_system_not_routed() {
    let coord = coordinator(2);
    let gone = Arc::new(MockSystem::valid(0.9));
    let stays = Arc::new(MockSystem::valid(0.9));
    coord.register_system(validator_spec("gone"), gone.clone()).unwrap();
    coord.register_system(validator_spec("stays"), stays.clone()).unwrap();
    coord.unregister_system(&SystemId::new("gone")).unwrap();

    let result = coord.submit(validation_task("t")).unwrap().await.unwrap();
    assert_eq!(result.systems, vec![SystemId::new("stays")]);
    assert_eq!(gone.calls(), 0);
    assert!(matches!(
        coord.unregister_system(&SystemId::new("gone")),
        Err(Error::SystemNotFound(_))
    ));
}

/// Test: Duplicate registration fails
#[tokio::test]
async fn test_duplicate_system_id() {
    let coord = coordinator(1);
    coord
        .register_system(validator_spec("v"), Arc::new(MockSystem::valid(0.9)))
        .unwrap();
    let err = coord
        .register_system(validator_spec("v"), Arc::new(MockSystem::valid(0.5)))
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateSystemId(_)));
    assert!(!err.is_retryable());
}

/// Test: Decisions are logged before dispatch
/// Given several completed tasks
/// Then the decision log holds one decision per task, in submission order,
/// and each result points at its decision
#[tokio::test]
async fn test_decision_log_matches_results() {
    let coord = coordinator(1);
    coord
        .register_system(validator_spec("v"), Arc::new(MockSystem::valid(0.9)))
        .unwrap();

    let mut results = Vec::new();
    for id in ["d1", "d2", "d3"] {
        results.push(coord.submit(validation_task(id)).unwrap().await.unwrap());
    }

    let decisions = coord.decisions();
    assert_eq!(decisions.len(), 3);
    for (decision, result) in decisions.iter().zip(&results) {
        assert_eq!(decision.task_id, result.task_id);
        assert_eq!(decision.id, result.decision_id);
        assert_eq!(decision.selected_systems(), result.systems.as_slice());
    }
}

/// Test: Critical tasks consider multi-system plans
#[tokio::test]
async fn test_critical_task_gets_pair_options() {
    let coord = coordinator(2);
    for id in ["v1", "v2", "v3"] {
        coord
            .register_system(validator_spec(id), Arc::new(MockSystem::valid(0.9)))
            .unwrap();
    }
    coord
        .submit(validation_task("urgent").with_priority(Priority::Critical))
        .unwrap()
        .await
        .unwrap();

    let decision = &coord.decisions()[0];
    let pairs = decision
        .candidate_options
        .iter()
        .filter(|o| o.is_multi())
        .count();
    assert_eq!(pairs, 3);
    assert_eq!(decision.candidate_options.len(), 6);
}
