//! Enqueue → dispatch → run callback flows

use std::collections::HashSet;
use std::time::Duration;

use runfleet_common::Pagination;
use runfleet_compute::mock::MockOutcome;
use runfleet_machines::{MachineRegistry, Strategy};
use runfleet_notify::NotificationStatus;
use runfleet_queue::{JobState, ProcessOutcome, RunUpdate, SweeperConfig};
use runfleet_runs::{RunRepository, RunStatus};
use uuid::Uuid;

use crate::common::{fast_dispatch, TestApp, WEBHOOK_URL};

async fn dispatch_one(app: &TestApp) -> runfleet_queue::DispatchReceipt {
    match app.state.pool.process_next().await.unwrap() {
        Some(ProcessOutcome::Dispatched(receipt)) => receipt,
        other => panic!("expected a dispatch, got {:?}", other),
    }
}

async fn report(app: &TestApp, run_id: Uuid, status: RunStatus) {
    app.state
        .completion
        .update_run_status(RunUpdate {
            run_id,
            status: Some(status),
            ..RunUpdate::default()
        })
        .await
        .unwrap();
}

#[test_log::test(tokio::test)]
async fn test_successful_run_completes_job_and_frees_machine() {
    let app = TestApp::new();
    let machine = app.add_machine("gpu-a", Some(2));
    let deployment_id = app.deploy_to(&machine);
    let job = app.enqueue(deployment_id).await;

    let receipt = dispatch_one(&app).await;
    assert_eq!(receipt.machine_id, machine.id);
    assert_eq!(app.load(&machine).await, 1);

    let submissions = app.compute.recorded_submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].submission.run_id, receipt.run_id);
    assert_eq!(
        submissions[0].submission.callback_url,
        "http://runfleet.test/api/update-run"
    );

    let run = app.runs.find(receipt.run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::NotStarted);
    assert_eq!(run.job_id, Some(job.id));

    report(&app, receipt.run_id, RunStatus::Running).await;
    assert_eq!(app.load(&machine).await, 1);
    assert_eq!(app.job(job.id).await.state, JobState::Active);

    report(&app, receipt.run_id, RunStatus::Success).await;
    assert_eq!(app.load(&machine).await, 0);
    assert_eq!(app.job(job.id).await.state, JobState::Completed);

    let sent = app.notify.recorded_for(&receipt.run_id.to_string());
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].status, NotificationStatus::Success);
    assert_eq!(sent[0].webhook_url, WEBHOOK_URL);
}

#[tokio::test]
async fn test_duplicate_terminal_report_releases_exactly_once() {
    let app = TestApp::new();
    let machine = app.add_machine("gpu-a", Some(4));
    let deployment_id = app.deploy_to(&machine);
    app.enqueue(deployment_id).await;
    app.enqueue(deployment_id).await;

    let first = dispatch_one(&app).await;
    dispatch_one(&app).await;
    assert_eq!(app.load(&machine).await, 2);

    report(&app, first.run_id, RunStatus::Success).await;
    report(&app, first.run_id, RunStatus::Success).await;

    // The second job still holds its slot
    assert_eq!(app.load(&machine).await, 1);
    assert_eq!(app.notify.recorded_for(&first.run_id.to_string()).len(), 1);
}

#[tokio::test]
async fn test_failed_run_fails_job_with_message() {
    let app = TestApp::new();
    let machine = app.add_machine("gpu-a", None);
    let deployment_id = app.deploy_to(&machine);
    let job = app.enqueue(deployment_id).await;
    let receipt = dispatch_one(&app).await;

    app.state
        .completion
        .update_run_status(RunUpdate {
            run_id: receipt.run_id,
            status: Some(RunStatus::Failed),
            error_message: Some("CUDA out of memory".to_string()),
            ..RunUpdate::default()
        })
        .await
        .unwrap();

    let job = app.job(job.id).await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.failed_reason.as_deref(), Some("CUDA out of memory"));
    assert_eq!(app.load(&machine).await, 0);

    let sent = app.notify.recorded_for(&receipt.run_id.to_string());
    assert_eq!(sent[0].status, NotificationStatus::Failed);
    assert_eq!(sent[0].error.as_deref(), Some("CUDA out of memory"));
}

#[tokio::test]
async fn test_retry_budget_fails_on_attempt_after_max() {
    let app = TestApp::with_configs(fast_dispatch(200), SweeperConfig::default());
    let machine = app.add_machine("gpu-full", Some(1));
    assert!(app.registry.try_reserve(machine.id).await.unwrap());
    let deployment_id = app.deploy_to(&machine);
    let job = app.enqueue(deployment_id).await;

    let mut last_retry_count = 0;
    for _ in 0..200 {
        match app.state.pool.process_next().await.unwrap() {
            Some(ProcessOutcome::Delayed { retry_count, .. }) => {
                assert!(retry_count > last_retry_count);
                last_retry_count = retry_count;
            }
            other => panic!("expected a delayed requeue, got {:?}", other),
        }
    }
    assert_eq!(last_retry_count, 200);
    assert_eq!(app.job(job.id).await.state, JobState::Delayed);

    let outcome = app.state.pool.process_next().await.unwrap();
    assert_eq!(
        outcome,
        Some(ProcessOutcome::Failed(
            "Machine \"gpu-full\" not available after 200 retries".to_string()
        ))
    );

    let job = app.job(job.id).await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.retry_count, 201);
    assert!(app.compute.recorded_submissions().is_empty());
    // The reservation made by the test is the only one
    assert_eq!(app.load(&machine).await, 1);

    let sent = app.notify.recorded_for(&format!("queue-job-{}", job.id));
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].job_id, Some(job.id));
    assert_eq!(sent[0].deployment_id, Some(deployment_id));
}

#[tokio::test]
async fn test_rejected_submission_rolls_back_and_requeues() {
    let app = TestApp::new();
    let machine = app.add_machine("gpu-a", Some(1));
    let deployment_id = app.deploy_to(&machine);
    let job = app.enqueue(deployment_id).await;
    app.compute.behavior().set_submit_outcome(MockOutcome::Reject);

    let outcome = app.state.pool.process_next().await.unwrap().unwrap();

    assert!(matches!(outcome, ProcessOutcome::Delayed { retry_count: 1, .. }));
    assert_eq!(app.load(&machine).await, 0);
    assert!(app.runs.all().is_empty());
    assert_eq!(app.job(job.id).await.state, JobState::Delayed);
}

#[tokio::test]
async fn test_malformed_submission_fails_without_retry() {
    let app = TestApp::new();
    let machine = app.add_machine("gpu-a", Some(1));
    let deployment_id = app.deploy_to(&machine);
    let job = app.enqueue(deployment_id).await;
    app.compute.behavior().set_submit_outcome(MockOutcome::Malformed);

    let outcome = app.state.pool.process_next().await.unwrap().unwrap();

    assert!(matches!(outcome, ProcessOutcome::Failed(_)));
    assert_eq!(app.job(job.id).await.state, JobState::Failed);
    assert_eq!(app.load(&machine).await, 0);
    assert!(app.runs.all().is_empty());
}

#[tokio::test]
async fn test_unknown_deployment_fails_immediately() {
    let app = TestApp::new();
    let job = app.enqueue(Uuid::new_v4()).await;

    let outcome = app.state.pool.process_next().await.unwrap().unwrap();

    assert!(matches!(outcome, ProcessOutcome::Failed(_)));
    let job = app.job(job.id).await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.retry_count, 0);
}

#[tokio::test]
async fn test_least_load_picks_emptiest_group_member() {
    let app = TestApp::new();
    let a = app.add_machine("gpu-a", None);
    let b = app.add_machine("gpu-b", None);
    let c = app.add_machine("gpu-c", None);
    for _ in 0..2 {
        app.registry.try_reserve(a.id).await.unwrap();
    }
    app.registry.try_reserve(c.id).await.unwrap();

    let deployment_id = app.deploy_to_group(&[&a, &b, &c]);
    app.enqueue(deployment_id).await;

    let receipt = dispatch_one(&app).await;
    assert_eq!(receipt.machine_id, b.id);
}

#[tokio::test]
async fn test_round_robin_visits_every_member_before_repeating() {
    let dispatch = runfleet_queue::DispatchConfig {
        strategy: Strategy::RoundRobin,
        ..fast_dispatch(200)
    };
    let app = TestApp::with_configs(dispatch, SweeperConfig::default());
    let members = [
        app.add_machine("gpu-a", None),
        app.add_machine("gpu-b", None),
        app.add_machine("gpu-c", None),
    ];
    let deployment_id = app.deploy_to_group(&[&members[0], &members[1], &members[2]]);

    let mut chosen = HashSet::new();
    for _ in 0..3 {
        app.enqueue(deployment_id).await;
        chosen.insert(dispatch_one(&app).await.machine_id);
    }
    assert_eq!(chosen.len(), 3);
}

#[tokio::test]
async fn test_group_without_capacity_delays() {
    let app = TestApp::new();
    let a = app.add_machine("gpu-a", Some(1));
    let b = app.add_machine("gpu-b", Some(1));
    app.registry.try_reserve(a.id).await.unwrap();
    app.registry.try_reserve(b.id).await.unwrap();
    let deployment_id = app.deploy_to_group(&[&a, &b]);
    app.enqueue(deployment_id).await;

    let outcome = app.state.pool.process_next().await.unwrap().unwrap();
    assert!(matches!(outcome, ProcessOutcome::Delayed { retry_count: 1, .. }));
}

#[tokio::test]
async fn test_removing_waiting_job_leaves_counters_alone() {
    let app = TestApp::new();
    let machine = app.add_machine("gpu-a", Some(3));
    app.registry.try_reserve(machine.id).await.unwrap();
    let deployment_id = app.deploy_to(&machine);
    let job = app.enqueue(deployment_id).await;

    let result = app.state.queue.remove(job.id).await.unwrap();

    assert!(result.success);
    assert_eq!(app.load(&machine).await, 1);
    assert!(app.state.pool.process_next().await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_running_pool_drains_queue_onto_machine() {
    let dispatch = runfleet_queue::DispatchConfig {
        retry_delay: Duration::from_secs(3600),
        ..fast_dispatch(200)
    };
    let app = TestApp::with_configs(dispatch, SweeperConfig::default());
    let machine = app.add_machine("gpu-a", Some(3));
    let deployment_id = app.deploy_to(&machine);

    app.state.pool.start().await;
    for _ in 0..3 {
        app.enqueue(deployment_id).await;
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let counts = app.state.queue.snapshot(Pagination { limit: Some(10) }).await.unwrap().counts;
        if counts.active == 3 && app.compute.recorded_submissions().len() == 3 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "pool did not dispatch in time: {:?}",
            counts
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    app.state.pool.stop(false).await;

    assert_eq!(app.load(&machine).await, 3);
    assert!(!app.state.pool.status().await.running);
}
