//! Event bus integration tests.
//!
//! These tests verify the order in which lifecycle events reach subscribers
//! and that the events agree with the decision log.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::broadcast;
use switchboard::{CoordinatorEvent, TaskId};

use crate::fixtures::*;

fn drain(rx: &mut broadcast::Receiver<CoordinatorEvent>) -> Vec<CoordinatorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn names_for(events: &[CoordinatorEvent], id: &str) -> Vec<&'static str> {
    events
        .iter()
        .filter(|e| e.task_id().map(TaskId::as_str) == Some(id))
        .map(CoordinatorEvent::name)
        .collect()
}

/// Test: Lifecycle order
/// Given a subscriber and a free slot
/// When a task completes
/// Then it sees routing_decision, task_dispatched, task_completed in order
#[tokio::test]
async fn test_completed_task_event_order() {
    let coord = coordinator(2);
    coord
        .register_system(validator_spec("v"), Arc::new(MockSystem::valid(0.9)))
        .unwrap();
    let mut rx = coord.subscribe();

    coord.submit(validation_task("ordered")).unwrap().await.unwrap();

    let events = drain(&mut rx);
    assert_eq!(
        names_for(&events, "ordered"),
        vec!["routing_decision", "task_dispatched", "task_completed"]
    );
}

/// Test: Queued tasks announce themselves first
#[tokio::test]
async fn test_queued_task_event_order() {
    let coord = coordinator(1);
    coord
        .register_system(
            validator_spec("v"),
            Arc::new(MockSystem::valid(0.9).with_delay(Duration::from_millis(10))),
        )
        .unwrap();
    let mut rx = coord.subscribe();

    let first = coord.submit(validation_task("first")).unwrap();
    let second = coord.submit(validation_task("second")).unwrap();
    first.await.unwrap();
    second.await.unwrap();

    let events = drain(&mut rx);
    assert_eq!(
        names_for(&events, "second"),
        vec![
            "task_queued",
            "routing_decision",
            "task_dispatched",
            "task_completed"
        ]
    );
    let queued = events
        .iter()
        .find(|e| e.name() == "task_queued")
        .unwrap();
    assert!(matches!(
        queued,
        CoordinatorEvent::TaskQueued { queue_depth: 1, .. }
    ));
}

/// Test: Failures are broadcast with their category
#[tokio::test]
async fn test_failed_task_event() {
    let coord = coordinator(1);
    coord
        .register_system(validator_spec("v"), Arc::new(MockSystem::failing()))
        .unwrap();
    let mut rx = coord.subscribe();

    coord
        .submit(validation_task("broken"))
        .unwrap()
        .await
        .unwrap_err();

    let events = drain(&mut rx);
    let failed = events
        .iter()
        .find_map(|e| match e {
            CoordinatorEvent::TaskFailed { task_id, category, .. } => {
                Some((task_id.clone(), category.clone()))
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(failed.0.as_str(), "broken");
    assert_eq!(failed.1, "system_execution");
}

/// Test: Dispatch events reference logged decisions
/// Given many concurrent tasks
/// Then every task_dispatched event names a decision in the log for the same task
#[tokio::test]
async fn test_dispatch_events_match_decision_log() {
    let coord = coordinator(3);
    for id in ["v1", "v2"] {
        coord
            .register_system(
                validator_spec(id),
                Arc::new(MockSystem::valid(0.9).with_delay(Duration::from_millis(2))),
            )
            .unwrap();
    }
    let mut rx = coord.subscribe();

    let handles: Vec<_> = (0..20)
        .map(|i| coord.submit(validation_task(&format!("e{}", i))).unwrap())
        .collect();
    for result in join_all(handles).await {
        result.unwrap();
    }

    let decisions: HashMap<_, _> = coord
        .decisions()
        .into_iter()
        .map(|d| (d.id, d.task_id))
        .collect();
    let mut dispatched = 0;
    for event in drain(&mut rx) {
        if let CoordinatorEvent::TaskDispatched {
            task_id,
            decision_id,
            ..
        } = event
        {
            assert_eq!(decisions.get(&decision_id), Some(&task_id));
            dispatched += 1;
        }
    }
    assert_eq!(dispatched, 20);
}

/// Test: Events serialize with their name as the tag
#[test]
fn test_event_json_tag() {
    let event = CoordinatorEvent::TaskCancelled {
        task_id: TaskId::new("gone"),
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["event"], "task_cancelled");
    assert_eq!(json["task_id"], "gone");
}
