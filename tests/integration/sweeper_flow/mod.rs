//! Stale job sweeping against dispatched work

use chrono::{Duration, Utc};
use runfleet_compute::mock::MockOutcome;
use runfleet_notify::NotificationStatus;
use runfleet_queue::{DispatchReceipt, JobState, ProcessOutcome, RunUpdate, SweepAction};
use runfleet_runs::{RunRepository, RunStatus};

use crate::common::TestApp;

async fn dispatched(app: &TestApp) -> (runfleet_machines::Machine, uuid::Uuid, DispatchReceipt) {
    let machine = app.add_machine("gpu-a", Some(2));
    let deployment_id = app.deploy_to(&machine);
    let job = app.enqueue(deployment_id).await;
    let Some(ProcessOutcome::Dispatched(receipt)) = app.state.pool.process_next().await.unwrap()
    else {
        panic!("job was not dispatched");
    };
    (machine, job.id, receipt)
}

#[tokio::test]
async fn test_job_past_timeout_is_failed_and_cleaned_up() {
    let app = TestApp::new();
    let (machine, job_id, receipt) = dispatched(&app).await;
    let started_at = app.job(job_id).await.started_at.unwrap();

    let early = app
        .state
        .sweeper
        .sweep_at(started_at + Duration::seconds(299))
        .await
        .unwrap();
    assert_eq!(early.checked, 1);
    assert_eq!(early.cleaned, 0);
    assert_eq!(app.job(job_id).await.state, JobState::Active);
    assert_eq!(app.load(&machine).await, 1);

    let late = app
        .state
        .sweeper
        .sweep_at(started_at + Duration::seconds(301))
        .await
        .unwrap();
    assert_eq!(late.cleaned, 1);
    assert_eq!(late.results[0].action, SweepAction::Interrupted);
    assert_eq!(late.results[0].machine_name.as_deref(), Some("gpu-a"));

    let job = app.job(job_id).await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(
        job.failed_reason.as_deref(),
        Some("Job exceeded timeout (301s > 300s). Marked as failed.")
    );
    let run = app.runs.find(receipt.run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(app.load(&machine).await, 0);

    let interrupts = app.compute.recorded_interrupts();
    assert_eq!(interrupts.len(), 1);
    assert_eq!(interrupts[0].run_id, receipt.run_id);

    let sent = app.notify.recorded_for(&receipt.run_id.to_string());
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].status, NotificationStatus::Failed);
}

#[tokio::test]
async fn test_cleanup_does_not_depend_on_interrupt() {
    let app = TestApp::new();
    app.compute
        .behavior()
        .set_interrupt_outcome(MockOutcome::Unreachable);
    let (machine, job_id, _) = dispatched(&app).await;
    let started_at = app.job(job_id).await.started_at.unwrap();

    let report = app
        .state
        .sweeper
        .sweep_at(started_at + Duration::seconds(301))
        .await
        .unwrap();

    assert_eq!(report.results[0].action, SweepAction::Failed);
    assert_eq!(app.job(job_id).await.state, JobState::Failed);
    assert_eq!(app.load(&machine).await, 0);
}

#[tokio::test]
async fn test_late_report_after_sweep_changes_nothing() {
    let app = TestApp::new();
    let (machine, job_id, receipt) = dispatched(&app).await;
    let started_at = app.job(job_id).await.started_at.unwrap();
    app.state
        .sweeper
        .sweep_at(started_at + Duration::seconds(400))
        .await
        .unwrap();

    let outcome = app
        .state
        .completion
        .update_run_status(RunUpdate {
            run_id: receipt.run_id,
            status: Some(RunStatus::Success),
            ..RunUpdate::default()
        })
        .await
        .unwrap();

    assert!(!outcome.completed);
    assert_eq!(outcome.run.status, RunStatus::Failed);
    assert_eq!(app.job(job_id).await.state, JobState::Failed);
    assert_eq!(app.load(&machine).await, 0);
    assert_eq!(app.notify.recorded_for(&receipt.run_id.to_string()).len(), 1);
}

#[tokio::test]
async fn test_run_finished_before_sweep_is_left_alone() {
    let app = TestApp::new();
    let (machine, job_id, receipt) = dispatched(&app).await;
    let started_at = app.job(job_id).await.started_at.unwrap();
    app.state
        .completion
        .update_run_status(RunUpdate {
            run_id: receipt.run_id,
            status: Some(RunStatus::Success),
            ..RunUpdate::default()
        })
        .await
        .unwrap();

    let report = app
        .state
        .sweeper
        .sweep_at(started_at + Duration::seconds(400))
        .await
        .unwrap();

    assert_eq!(report.checked, 0);
    assert_eq!(app.job(job_id).await.state, JobState::Completed);
    assert_eq!(app.load(&machine).await, 0);
    assert!(app.compute.recorded_interrupts().is_empty());
}

#[tokio::test]
async fn test_sweep_is_isolated_per_job() {
    let app = TestApp::new();
    let (machine, first, _) = dispatched(&app).await;
    let deployment_id = app.deploy_to(&machine);
    let second = app.enqueue(deployment_id).await;
    app.state.pool.process_next().await.unwrap();

    let now = Utc::now() + Duration::seconds(600);
    let report = app.state.sweeper.sweep_at(now).await.unwrap();

    assert_eq!(report.checked, 2);
    assert_eq!(report.cleaned, 2);
    assert_eq!(app.job(first).await.state, JobState::Failed);
    assert_eq!(app.job(second.id).await.state, JobState::Failed);
    assert_eq!(app.load(&machine).await, 0);
}
