//! Fan-out and aggregation integration tests.
//!
//! These tests push analysis tasks onto two-system plans and verify fallback
//! isolation, voting, suggestion merging and load conservation.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use switchboard::orchestration::{majority, Consensus, SystemOutcome};
use switchboard::{Config, Coordinator, Error, SystemId, TaskState};

use crate::fixtures::*;

/// Raise both analyzers' load so a pair plan outscores either single system.
///
/// Single: 0.9 * (1 - 0.5 * 0.3) = 0.765. Pair: 0.9 * 0.9 = 0.81.
fn favour_pairs(coord: &Coordinator) {
    for id in ["a", "b"] {
        coord
            .registry()
            .update_load(&SystemId::new(id), 0.5)
            .unwrap();
    }
}

fn register_pair(coord: &Coordinator, a: MockSystem, b: MockSystem) {
    coord.register_system(analyzer_spec("a"), Arc::new(a)).unwrap();
    coord.register_system(analyzer_spec("b"), Arc::new(b)).unwrap();
    favour_pairs(coord);
}

/// Test: Fallback isolation
/// Given fallback mode on and a two-system plan where one system errors
/// When the task runs
/// Then it completes with one real outcome and one fallback marker
#[tokio::test]
async fn test_fallback_isolates_failing_system() {
    let coord = coordinator(2);
    register_pair(&coord, MockSystem::valid(0.8), MockSystem::failing());

    let result = coord.submit(analysis_task("iso")).unwrap().await.unwrap();
    assert_eq!(result.systems.len(), 2);

    let outcomes = &result.result.outcomes;
    assert_eq!(outcomes.len(), 2);
    assert!(matches!(outcomes[0], SystemOutcome::Success { .. }));
    match &outcomes[1] {
        SystemOutcome::Fallback {
            system_id,
            error,
            timed_out,
            retryable,
            fallback,
        } => {
            assert_eq!(system_id.as_str(), "b");
            assert!(error.contains("scripted failure"));
            assert!(!timed_out);
            assert!(retryable);
            assert!(fallback);
        }
        other => panic!("expected fallback marker, got {other:?}"),
    }
    assert_eq!(result.result.is_valid, Some(true));
    assert_eq!(result.result.fallback_count(), 1);
    // 0.8 from the real outcome, 0.5 for the marker.
    assert!((result.result.confidence.unwrap() - 0.65).abs() < 1e-9);

    let json = serde_json::to_value(&outcomes[1]).unwrap();
    assert_eq!(json["outcome"], "fallback");
    assert_eq!(json["fallback"], true);
    assert_eq!(coord.metrics().fallbacks, 1);
}

/// Test: Fallback off
/// Given fallback mode off and a two-system plan where one system errors
/// Then the task fails with the system's error and its sibling is cancelled
#[tokio::test]
async fn test_without_fallback_failure_propagates() {
    let coord = coordinator_with(Config {
        fallback_mode: false,
        ..Default::default()
    });
    register_pair(&coord, MockSystem::hanging(), MockSystem::failing());

    let err = coord
        .submit(analysis_task("strict"))
        .unwrap()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SystemExecution { ref system_id, .. } if system_id == "b"));
    assert!(err.is_retryable());
    assert_eq!(
        coord.task_state(&switchboard::TaskId::new("strict")),
        Some(TaskState::Failed)
    );
}

/// Test: Majority vote with a two-way split
/// Given two systems voting valid and invalid
/// Then the tie resolves to invalid with mixed consensus
#[tokio::test]
async fn test_split_vote_is_invalid() {
    let coord = coordinator(2);
    register_pair(
        &coord,
        MockSystem::valid(0.9).with_suggestion("add tests"),
        MockSystem::invalid(0.5)
            .with_suggestion("rename module")
            .with_suggestion("add tests"),
    );

    let result = coord.submit(analysis_task("split")).unwrap().await.unwrap();
    assert_eq!(result.result.is_valid, Some(false));
    assert_eq!(result.result.consensus, Some(Consensus::Mixed));
    assert!((result.result.confidence.unwrap() - 0.7).abs() < 1e-9);
    assert_eq!(
        result.result.suggestions,
        vec!["add tests".to_string(), "rename module".to_string()]
    );
}

/// Test: Majority vote over three verdicts
#[test]
fn test_three_way_majority() {
    assert_eq!(majority(&[true, true, false]), Some(true));
    assert_eq!(majority(&[true, false]), Some(false));
}

/// Test: Unanimous agreement across a pair
#[tokio::test]
async fn test_unanimous_pair() {
    let coord = coordinator(2);
    register_pair(&coord, MockSystem::invalid(0.6), MockSystem::invalid(0.8));
    let result = coord.submit(analysis_task("u")).unwrap().await.unwrap();
    assert_eq!(result.result.consensus, Some(Consensus::UnanimousInvalid));
    assert_eq!(result.result.is_valid, Some(false));
}

/// Test: Load conservation
/// Given a mix of successes, failures and timeouts across many tasks
/// When everything has settled
/// Then every system's load is back where it started
#[tokio::test]
async fn test_load_returns_to_baseline() {
    let coord = coordinator(4);
    register_pair(
        &coord,
        MockSystem::valid(0.9).with_delay(Duration::from_millis(5)),
        MockSystem::failing().with_delay(Duration::from_millis(5)),
    );
    coord
        .register_system(
            validator_spec("slow"),
            Arc::new(MockSystem::hanging()),
        )
        .unwrap();
    coord
        .register_system(validator_spec("quick"), Arc::new(MockSystem::valid(0.7)))
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..10 {
        handles.push(coord.submit(analysis_task(&format!("an{}", i))).unwrap());
        handles.push(
            coord
                .submit(
                    validation_task(&format!("va{}", i)).with_timeout(Duration::from_millis(30)),
                )
                .unwrap(),
        );
    }
    let _ = join_all(handles).await;

    let loads: Vec<(String, f64)> = coord
        .status()
        .systems
        .iter()
        .map(|h| (h.id.to_string(), h.load))
        .collect();
    for (id, load) in loads {
        let expected = if id == "a" || id == "b" { 0.5 } else { 0.0 };
        assert!(
            (load - expected).abs() < 1e-9,
            "system {} ended at load {}",
            id,
            load
        );
    }
}
