//! Integration tests for the admission governor: capacity, escalation,
//! timeouts, the periodic monitor and graceful shutdown.

mod common;

use std::sync::Arc;
use std::time::Duration;
use swarmgate::domain::models::{
    event_types, ActiveTaskRegistryLimits, MonitorConfig, QueueClass, QueuesConfig, TaskState,
};
use swarmgate::services::{
    ActiveTaskRegistry, AdmissionRejection, AdmissionRequest, EmergentMonitor, GovernorSignal,
    LongRunningOutcome, RollingHistory, TerminalOutcome, TimeoutOutcome,
};
use tokio::time::Instant;
use uuid::Uuid;

fn routine(task_id: Uuid) -> AdmissionRequest {
    AdmissionRequest::new(task_id, QueueClass::Routine)
}

#[tokio::test]
async fn test_eleventh_routine_is_rejected_until_a_slot_frees() {
    common::setup_test_logging();
    let governor = common::routine_governor();

    let tickets: Vec<_> = (0..10)
        .map(|_| governor.admit(routine(Uuid::new_v4())).expect("slot available"))
        .collect();
    assert_eq!(governor.active_count(QueueClass::Routine), 10);

    let eleventh = routine(Uuid::new_v4());
    assert_eq!(
        governor.admit(eleventh.clone()).unwrap_err(),
        AdmissionRejection::AtCapacity {
            queue: QueueClass::Routine,
            active: 10,
            max_active: 10,
        }
    );

    assert!(governor.complete(tickets[3].task_id, TerminalOutcome::Completed));
    assert!(!governor.complete(tickets[3].task_id, TerminalOutcome::Completed));
    assert!(governor.admit(eleventh).is_ok());
    assert_eq!(governor.active_count(QueueClass::Routine), 10);
}

#[tokio::test]
async fn test_step_premium_threshold_then_stop() {
    let governor = ActiveTaskRegistry::new(&QueuesConfig::default()).unwrap();
    let request = AdmissionRequest::new(Uuid::new_v4(), QueueClass::Step).premium(true);
    let ticket = governor.admit(request.clone()).unwrap();
    assert!(governor.mark_running(ticket.task_id));
    assert!(!governor.mark_running(ticket.task_id), "already running");

    let started = governor.record(ticket.task_id).unwrap().started_at;
    assert_eq!(
        governor.check_long_running_at(ticket.task_id, started + Duration::from_millis(250_000)),
        LongRunningOutcome::WithinThreshold
    );
    assert_eq!(
        governor.check_long_running_at(ticket.task_id, started + Duration::from_millis(300_001)),
        LongRunningOutcome::Stopped
    );
    assert!(ticket.cancel.is_cancelled());
    assert!(governor.record(ticket.task_id).is_none());
    assert_eq!(
        governor.check_long_running(ticket.task_id),
        LongRunningOutcome::NotTracked
    );

    // Step queues carry no stop retries.
    assert_eq!(
        governor.admit(request).unwrap_err(),
        AdmissionRejection::RetryBudgetExhausted(ticket.task_id)
    );
}

#[tokio::test]
async fn test_free_user_routine_pauses_then_stops() {
    let history = Arc::new(RollingHistory::new(100));
    let governor = common::governor_with_history(&history);
    let ticket = governor.admit(routine(Uuid::new_v4())).unwrap();
    governor.mark_running(ticket.task_id);
    let started = governor.record(ticket.task_id).unwrap().started_at;
    let breach = started + Duration::from_millis(300_001);

    assert_eq!(
        governor.check_long_running_at(ticket.task_id, breach),
        LongRunningOutcome::Paused
    );
    let record = governor.record(ticket.task_id).unwrap();
    assert_eq!(record.state, TaskState::Paused);
    assert_eq!(record.retry_state.label(), "paused_once");
    assert_eq!(governor.snapshot(QueueClass::Routine).unwrap().paused, 1);

    let resumed = governor.resume(ticket.task_id).unwrap();
    assert_eq!(resumed.deadline, ticket.deadline, "deadline survives a pause");
    assert_eq!(
        governor.resume(ticket.task_id).unwrap_err(),
        AdmissionRejection::NotPaused(ticket.task_id)
    );

    // Elapsed time is measured from the original start.
    assert_eq!(
        governor.check_long_running_at(ticket.task_id, breach),
        LongRunningOutcome::Stopped
    );

    let types: Vec<String> = history.snapshot().into_iter().map(|e| e.event_type).collect();
    assert_eq!(
        types,
        vec![
            event_types::TASK_ADMITTED,
            event_types::TASK_PAUSED,
            event_types::TASK_RESUMED,
            event_types::TASK_STOPPED,
        ]
    );
}

#[tokio::test]
async fn test_resume_waits_for_capacity() {
    let governor = ActiveTaskRegistry::with_limits([(
        QueueClass::Routine,
        ActiveTaskRegistryLimits {
            max_active: 1,
            ..common::routine_limits()
        },
    )])
    .unwrap();

    let paused = governor.admit(routine(Uuid::new_v4())).unwrap();
    let started = governor.record(paused.task_id).unwrap().started_at;
    governor.check_long_running_at(paused.task_id, started + Duration::from_millis(300_001));

    // The paused task gave its slot away.
    let other = governor.admit(routine(Uuid::new_v4())).unwrap();
    assert!(matches!(
        governor.resume(paused.task_id),
        Err(AdmissionRejection::AtCapacity { .. })
    ));

    governor.complete(other.task_id, TerminalOutcome::Failed);
    assert!(governor.resume(paused.task_id).is_ok());
}

#[tokio::test]
async fn test_timeout_is_a_hard_ceiling() {
    let governor = common::routine_governor();
    let ticket = governor
        .admit(routine(Uuid::new_v4()).with_max_duration_ms(5_000))
        .unwrap();
    let started = governor.record(ticket.task_id).unwrap().started_at;

    assert_eq!(
        governor.enforce_timeout_at(ticket.task_id, started + Duration::from_millis(4_999)),
        TimeoutOutcome::WithinDeadline
    );
    assert_eq!(
        governor.enforce_timeout_at(ticket.task_id, started + Duration::from_millis(5_000)),
        TimeoutOutcome::TimedOut
    );
    assert!(ticket.cancel.is_cancelled());
    assert_eq!(
        governor.enforce_timeout_at(ticket.task_id, started + Duration::from_millis(5_000)),
        TimeoutOutcome::NotTracked
    );
    assert_eq!(governor.active_count(QueueClass::Routine), 0);
}

#[tokio::test]
async fn test_repeated_timeouts_form_one_cluster() {
    let history = Arc::new(RollingHistory::new(100));
    let governor = common::governor_with_history(&history);

    for _ in 0..3 {
        let ticket = governor
            .admit(routine(Uuid::new_v4()).with_max_duration_ms(1_000))
            .unwrap();
        assert_eq!(
            governor.enforce_timeout_at(ticket.task_id, ticket.deadline),
            TimeoutOutcome::TimedOut
        );
    }

    let timeouts = history.by_type(event_types::TASK_TIMEOUT);
    assert_eq!(timeouts.len(), 3);
    assert_eq!(timeouts[0].data_str("errorType"), Some("timeout"));

    let clusters = EmergentMonitor::new(MonitorConfig::default()).cluster_errors(&history.snapshot());
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].error_type, "timeout");
    assert_eq!(clusters[0].count, 3);
    assert_eq!(clusters[0].components, vec!["admission_governor"]);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_loop_times_out_stalled_tasks() {
    let limits = ActiveTaskRegistryLimits {
        max_active: 2,
        high_load_check_interval_ms: 1_000,
        long_running_threshold_free_ms: 10_000,
        long_running_threshold_premium_ms: 20_000,
        task_timeout_ms: 30_000,
        ..common::routine_limits()
    };
    let governor =
        Arc::new(ActiveTaskRegistry::with_limits([(QueueClass::Routine, limits)]).unwrap());
    let mut signals = governor.subscribe();
    let handles = governor.spawn_monitor();

    let ticket = governor
        .admit(routine(Uuid::new_v4()).with_max_duration_ms(3_000))
        .unwrap();
    governor.mark_running(ticket.task_id);

    tokio::time::timeout(Duration::from_secs(10), ticket.cancel.cancelled())
        .await
        .expect("monitor enforces the deadline");
    assert!(governor.record(ticket.task_id).is_none());

    let mut saw_timeout = false;
    while let Ok(signal) = signals.try_recv() {
        if let GovernorSignal::TimedOut { task_id, .. } = signal {
            assert_eq!(task_id, ticket.task_id);
            saw_timeout = true;
        }
    }
    assert!(saw_timeout);

    governor.stop_monitor();
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_high_load_sweep() {
    let history = Arc::new(RollingHistory::new(100));
    let governor = common::governor_with_history(&history);
    for _ in 0..8 {
        governor.admit(routine(Uuid::new_v4())).unwrap();
    }
    let report = governor.sweep_at(QueueClass::Routine, Instant::now());
    assert!(report.high_load);
    assert!(report.timed_out.is_empty());
    assert_eq!(history.by_type(event_types::GOVERNOR_HIGH_LOAD).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_then_forces() {
    let governor = Arc::new(common::routine_governor());
    let finishing = governor.admit(routine(Uuid::new_v4())).unwrap();
    let stuck = governor.admit(routine(Uuid::new_v4())).unwrap();

    let worker = {
        let governor = Arc::clone(&governor);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            governor.complete(finishing.task_id, TerminalOutcome::Completed);
        })
    };

    let report = governor.shutdown().await;
    worker.await.unwrap();

    assert_eq!(report.drained, 1);
    assert_eq!(report.forced, vec![stuck.task_id]);
    assert!(report.elapsed_ms >= 30_000, "stuck task holds shutdown for the grace period");
    assert!(stuck.cancel.is_cancelled());
    assert!(!governor.is_accepting());
    assert_eq!(
        governor.admit(routine(Uuid::new_v4())).unwrap_err(),
        AdmissionRejection::ShuttingDown
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_of_idle_governor_is_immediate() {
    let governor = common::routine_governor();
    let report = governor.shutdown().await;
    assert_eq!(report.drained, 0);
    assert!(report.forced.is_empty());
    assert_eq!(report.elapsed_ms, 0);
}
