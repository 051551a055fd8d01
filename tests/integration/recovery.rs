//! Health monitor and recovery integration tests.
//!
//! These tests verify that failing probes take systems out of rotation,
//! that a single good probe brings them back, that timeouts are reported as
//! such, and that caller-side retries resubmit retryable failures.

use std::sync::Arc;
use std::time::Duration;

use switchboard::orchestration::{run_with_retries, RetryPolicy, ScaleSignal, SystemStatus};
use switchboard::{Config, Error, SystemId, TaskId, TaskState};

use crate::fixtures::*;

/// Test: Health degradation
/// Given a system whose probes fail
/// When three health cycles run
/// Then it is critical and receives no tasks;
/// and after one good probe it is healthy and routable again
#[tokio::test]
async fn test_three_missed_probes_then_recovery() {
    let coord = coordinator(2);
    let mock = Arc::new(MockSystem::valid(0.9));
    coord.register_system(validator_spec("v"), mock.clone()).unwrap();
    let id = SystemId::new("v");

    mock.set_probe_ok(false);
    let mut seen = Vec::new();
    for _ in 0..3 {
        let report = coord.check_health().await;
        seen.push(report.status_of(&id).unwrap());
    }
    assert_eq!(
        seen,
        vec![
            SystemStatus::Warning,
            SystemStatus::Critical,
            SystemStatus::Critical
        ]
    );

    assert!(matches!(
        coord.submit(validation_task("while-down")),
        Err(Error::NoAvailableSystem { .. })
    ));
    assert_eq!(mock.calls(), 0);

    mock.set_probe_ok(true);
    let report = coord.check_health().await;
    assert_eq!(report.status_of(&id), Some(SystemStatus::Healthy));
    coord
        .submit(validation_task("after-recovery"))
        .unwrap()
        .await
        .unwrap();
    assert_eq!(mock.calls(), 1);
}

/// Test: Health events
/// Given a subscriber
/// When a system degrades
/// Then a system_health_update event is broadcast
#[tokio::test]
async fn test_degradation_is_broadcast() {
    let coord = coordinator(1);
    let mock = Arc::new(MockSystem::valid(0.9));
    coord.register_system(validator_spec("v"), mock.clone()).unwrap();
    let mut rx = coord.subscribe();

    mock.set_probe_ok(false);
    coord.check_health().await;

    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.name());
    }
    assert!(names.contains(&"system_health_update"));
}

/// Test: Background health loop
/// Given a running monitor with a short interval
/// When probes fail
/// Then the system degrades without manual checks and the loop stops on shutdown
#[tokio::test]
async fn test_health_loop_runs_until_shutdown() {
    let mut config = Config::default();
    config.health.interval_ms = 10;
    config.health.probe_timeout_ms = 50;
    let coord = coordinator_with(config);
    let mock = Arc::new(MockSystem::valid(0.9));
    coord.register_system(validator_spec("v"), mock.clone()).unwrap();
    mock.set_probe_ok(false);

    let monitor = coord.start_health_monitor();
    tokio::time::sleep(Duration::from_millis(150)).await;
    monitor.shutdown();
    assert!(monitor.is_cancelled());

    let handle = coord.system(&SystemId::new("v")).unwrap();
    assert_ne!(handle.status, SystemStatus::Healthy);
    assert!(handle.last_probe.is_some());
}

/// Test: Scale-up signal from queue depth
#[tokio::test]
async fn test_scale_up_signal_from_backlog() {
    let coord = coordinator(1);
    coord
        .register_system(
            validator_spec("v"),
            Arc::new(MockSystem::valid(0.9).with_delay(Duration::from_millis(50))),
        )
        .unwrap();
    let handles: Vec<_> = (0..13)
        .map(|i| coord.submit(validation_task(&format!("q{}", i))).unwrap())
        .collect();
    assert_eq!(coord.queue_depth(), 12);

    let report = coord.check_health().await;
    assert!(matches!(
        report.signal,
        Some(ScaleSignal::ScaleUp { queue_depth: 12, .. })
    ));
    coord.shutdown();
    drop(handles);
}

/// Test: Per-call timeout
/// Given a system that never answers
/// When the task timeout elapses
/// Then the task ends TimedOut with SystemTimeout and the system is charged
#[tokio::test]
async fn test_timeout_marks_task_timed_out() {
    let coord = coordinator(1);
    coord
        .register_system(validator_spec("stuck"), Arc::new(MockSystem::hanging()))
        .unwrap();

    let task = validation_task("late").with_timeout(Duration::from_millis(40));
    let err = coord.submit(task).unwrap().await.unwrap_err();
    assert!(matches!(err, Error::SystemTimeout { .. }));
    assert_eq!(
        coord.task_state(&TaskId::new("late")),
        Some(TaskState::TimedOut)
    );
    let handle = coord.system(&SystemId::new("stuck")).unwrap();
    assert!(handle.accuracy_ewma < 0.9);
    assert_eq!(handle.load, 0.0);
    assert_eq!(coord.metrics().tasks_timed_out, 1);
}

/// Test: Caller-side retries
/// Given a system that fails twice before succeeding
/// When a task with max_retries = 2 runs through the retry helper
/// Then the third attempt succeeds under id `<id>#retry-2`
#[tokio::test]
async fn test_retry_helper_resubmits() {
    let coord = coordinator(1);
    let mock = Arc::new(MockSystem::valid(0.9).failing_first(2));
    coord.register_system(validator_spec("v"), mock.clone()).unwrap();

    let task = validation_task("job").with_max_retries(2);
    let result = run_with_retries(&coord, task, &RetryPolicy::immediate())
        .await
        .unwrap();
    assert_eq!(result.task_id.as_str(), "job#retry-2");
    assert_eq!(mock.calls(), 3);
    assert_eq!(coord.task_state(&TaskId::new("job")), Some(TaskState::Failed));
    assert_eq!(
        coord.task_state(&TaskId::new("job#retry-1")),
        Some(TaskState::Failed)
    );
}

/// Test: Retries are bounded
#[tokio::test]
async fn test_retry_helper_gives_up() {
    let coord = coordinator(1);
    let mock = Arc::new(MockSystem::failing());
    coord.register_system(validator_spec("v"), mock.clone()).unwrap();

    let task = validation_task("doomed").with_max_retries(1);
    let err = run_with_retries(&coord, task, &RetryPolicy::immediate())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SystemExecution { .. }));
    assert_eq!(mock.calls(), 2);
}

/// Test: Permanent backend errors are not retried
/// Given a system that rejects every call as permanent
/// When a task with max_retries = 3 runs through the retry helper
/// Then it fails after a single call
#[tokio::test]
async fn test_retry_helper_stops_on_permanent_error() {
    let coord = coordinator(1);
    let mock = Arc::new(MockSystem::rejecting());
    coord.register_system(validator_spec("v"), mock.clone()).unwrap();

    let task = validation_task("rejected").with_max_retries(3);
    let err = run_with_retries(&coord, task, &RetryPolicy::immediate())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::SystemExecution { retryable: false, .. }
    ));
    assert!(!err.is_retryable());
    assert_eq!(mock.calls(), 1);
    assert_eq!(
        coord.task_state(&TaskId::new("rejected#retry-1")),
        None
    );
}

/// Test: Non-retryable errors are not retried
#[tokio::test]
async fn test_retry_helper_skips_admission_errors() {
    let coord = coordinator(1);
    let task = validation_task("nowhere").with_max_retries(5);
    let err = run_with_retries(&coord, task, &RetryPolicy::immediate())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoAvailableSystem { .. }));
    assert_eq!(coord.decisions().len(), 1);
}

/// Test: Graceful shutdown
/// Given running and queued tasks
/// When the coordinator shuts down
/// Then queued tasks are cancelled, in-flight calls stop and new work is refused
#[tokio::test]
async fn test_shutdown_drains() {
    let coord = coordinator(1);
    coord
        .register_system(validator_spec("v"), Arc::new(MockSystem::hanging()))
        .unwrap();
    let running = coord.submit(validation_task("running")).unwrap();
    let queued = coord.submit(validation_task("queued")).unwrap();

    assert_eq!(coord.shutdown(), 1);
    assert!(matches!(queued.await, Err(Error::Cancelled(_))));
    assert!(matches!(running.await, Err(Error::Cancelled(_))));
    assert!(matches!(
        coord.submit(validation_task("late")),
        Err(Error::ShuttingDown)
    ));
    assert_eq!(coord.system(&SystemId::new("v")).unwrap().load, 0.0);
}
