//! Stale job sweeper
//!
//! Every `interval` the sweeper inspects active jobs. One that has been
//! active for at least `timeout` is presumed abandoned: it is force-failed
//! regardless of who holds its lease, its machine gets a best-effort
//! interrupt, and its run is failed through the completion path so the
//! reservation is released and the notification sent exactly once.
//!
//! A job that finished between listing and failing is left alone; the
//! conditional `force_fail` is the guard against racing its own worker.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use runfleet_common::Result;
use runfleet_compute::ComputeService;
use runfleet_machines::{Machine, MachineRegistry};
use runfleet_runs::RunRepository;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::completion::CompletionHandler;
use crate::config::SweeperConfig;
use crate::domain::entities::{Job, Lifecycle};
use crate::domain::state::JobState;
use crate::notifications::NotificationTrigger;
use crate::repository::JobStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepAction {
    /// Failed, and the machine acknowledged the interrupt
    Interrupted,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepResult {
    pub job_id: Uuid,
    pub run_id: Option<Uuid>,
    pub machine_id: Option<Uuid>,
    pub machine_name: Option<String>,
    pub running_time_ms: i64,
    pub action: SweepAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SweepResult {
    fn skipped(job: &Job, running_time_ms: i64, error: Option<String>) -> Self {
        Self {
            job_id: job.id,
            run_id: job.receipt().map(|r| r.run_id),
            machine_id: job.receipt().map(|r| r.machine_id),
            machine_name: None,
            running_time_ms,
            action: SweepAction::Skipped,
            error,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    /// Results other than `skipped`
    pub cleaned: usize,
    pub results: Vec<SweepResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweeperStatus {
    pub running: bool,
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

struct SweeperInner {
    jobs: Arc<dyn JobStore>,
    runs: Arc<dyn RunRepository>,
    registry: Arc<dyn MachineRegistry>,
    compute: Arc<dyn ComputeService>,
    completion: CompletionHandler,
    notifications: NotificationTrigger,
    config: SweeperConfig,
}

struct Armed {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct StaleJobSweeper {
    inner: Arc<SweeperInner>,
    armed: Mutex<Option<Armed>>,
}

impl StaleJobSweeper {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        runs: Arc<dyn RunRepository>,
        registry: Arc<dyn MachineRegistry>,
        compute: Arc<dyn ComputeService>,
        completion: CompletionHandler,
        notifications: NotificationTrigger,
        config: SweeperConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SweeperInner {
                jobs,
                runs,
                registry,
                compute,
                completion,
                notifications,
                config,
            }),
            armed: Mutex::new(None),
        }
    }

    /// Sweep once right away, then every `interval`
    pub async fn start(&self) -> Lifecycle {
        let mut armed = self.armed.lock().await;
        if armed.is_some() {
            tracing::warn!("Stale job sweeper already running");
            return Lifecycle::AlreadyRunning;
        }

        let cancel = CancellationToken::new();
        let inner = self.inner.clone();
        let handle = tokio::spawn(inner.run(cancel.clone()));
        *armed = Some(Armed { cancel, handle });

        tracing::info!(
            interval_ms = millis(self.inner.config.interval),
            timeout_ms = millis(self.inner.config.timeout),
            "Stale job sweeper started"
        );
        Lifecycle::Started
    }

    /// Disarm the timer. A sweep already in progress is allowed to finish.
    pub async fn stop(&self) -> Lifecycle {
        let Some(Armed { cancel, handle }) = self.armed.lock().await.take() else {
            return Lifecycle::NotRunning;
        };

        cancel.cancel();
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Stale job sweeper task ended abnormally");
        }
        tracing::info!("Stale job sweeper stopped");
        Lifecycle::Stopped
    }

    pub async fn status(&self) -> SweeperStatus {
        SweeperStatus {
            running: self.armed.lock().await.is_some(),
            interval_ms: millis(self.inner.config.interval),
            timeout_ms: millis(self.inner.config.timeout),
        }
    }

    pub async fn run_now(&self) -> Result<SweepReport> {
        self.inner.sweep_at(Utc::now()).await
    }

    /// Sweep as if the clock read `now`
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        self.inner.sweep_at(now).await
    }
}

impl SweeperInner {
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_at(Utc::now()).await {
                        tracing::error!(error = %e, "Stale job sweep failed");
                    }
                }
            }
        }
    }

    async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let active = self
            .jobs
            .list_by_state(JobState::Active, self.config.scan_limit)
            .await?;

        let mut report = SweepReport {
            checked: active.len(),
            ..SweepReport::default()
        };
        for job in &active {
            let result = match self.sweep_job(job, now).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to sweep job");
                    SweepResult::skipped(job, job.active_for(now).num_milliseconds(), Some(e.to_string()))
                }
            };
            report.results.push(result);
        }
        report.cleaned = report
            .results
            .iter()
            .filter(|r| r.action != SweepAction::Skipped)
            .count();

        if report.cleaned > 0 {
            tracing::warn!(checked = report.checked, cleaned = report.cleaned, "Stale jobs cleaned");
        } else {
            tracing::debug!(checked = report.checked, "No stale jobs");
        }
        Ok(report)
    }

    async fn sweep_job(&self, job: &Job, now: DateTime<Utc>) -> Result<SweepResult> {
        let elapsed = job.active_for(now);
        let running_time_ms = elapsed.num_milliseconds();
        let timeout_ms = i64::try_from(self.config.timeout.as_millis()).unwrap_or(i64::MAX);
        if running_time_ms < timeout_ms {
            return Ok(SweepResult::skipped(job, running_time_ms, None));
        }

        let elapsed_secs = elapsed.num_seconds();
        tracing::warn!(job_id = %job.id, elapsed_secs, "Job is stale");

        let receipt = job.receipt();
        let run = match receipt {
            Some(r) => match self.runs.find(r.run_id).await {
                Ok(run) => run,
                Err(e) => {
                    tracing::error!(job_id = %job.id, run_id = %r.run_id, error = %e, "Run lookup failed, using dispatch receipt");
                    None
                }
            },
            None => None,
        };
        let machine_id = run.as_ref().map(|r| r.machine_id).or(receipt.map(|r| r.machine_id));
        let machine = match machine_id {
            Some(id) => match self.registry.find(id).await {
                Ok(machine) => machine,
                Err(e) => {
                    tracing::error!(job_id = %job.id, machine_id = %id, error = %e, "Machine lookup failed, skipping interrupt");
                    None
                }
            },
            None => None,
        };

        let reason = format!(
            "Job exceeded timeout ({}s > {}s). Marked as failed.",
            elapsed_secs,
            timeout_ms / 1000
        );
        let Some(failed) = self.jobs.force_fail(job.id, &reason, now).await? else {
            tracing::info!(job_id = %job.id, "Job finished before it could be swept");
            return Ok(SweepResult::skipped(
                job,
                running_time_ms,
                Some("job is no longer active".to_string()),
            ));
        };

        let interrupted = match (&machine, receipt) {
            (Some(machine), Some(receipt)) => self.interrupt(machine, receipt.run_id).await,
            _ => false,
        };

        let run_id = run.as_ref().map(|r| r.id).or(receipt.map(|r| r.run_id));
        self.settle(&failed, run_id, machine_id, elapsed_secs, &reason)
            .await;

        Ok(SweepResult {
            job_id: job.id,
            run_id: receipt.map(|r| r.run_id),
            machine_id,
            machine_name: machine.map(|m| m.name),
            running_time_ms,
            action: if interrupted {
                SweepAction::Interrupted
            } else {
                SweepAction::Failed
            },
            error: None,
        })
    }

    async fn interrupt(&self, machine: &Machine, run_id: Uuid) -> bool {
        match self.compute.interrupt(&machine.endpoint(), run_id).await {
            Ok(()) => {
                tracing::info!(machine_id = %machine.id, run_id = %run_id, "Interrupted stale run");
                true
            }
            Err(e) => {
                tracing::warn!(machine_id = %machine.id, run_id = %run_id, error = %e, "Interrupt failed, continuing cleanup");
                false
            }
        }
    }

    /// Run, reservation and notification for a job that was just failed.
    ///
    /// A recorded run is failed through the completion path, which owns the
    /// release and the notification. A job whose run was never recorded
    /// releases its machine here.
    async fn settle(
        &self,
        job: &Job,
        run_id: Option<Uuid>,
        machine_id: Option<Uuid>,
        elapsed_secs: i64,
        reason: &str,
    ) {
        if let Some(run_id) = run_id {
            let message = format!(
                "Job exceeded timeout ({}s). Forcefully terminated.",
                elapsed_secs
            );
            match self.completion.fail_run(run_id, &message).await {
                Ok(Some(_)) => return,
                Ok(None) => {}
                Err(e) => {
                    // The run may still hold the reservation, so it is left for sync
                    tracing::error!(run_id = %run_id, error = %e, "Failed to fail stale run");
                    self.notifications.job_failed(job, reason).await;
                    return;
                }
            }
        }

        if let Some(machine_id) = machine_id {
            if let Err(e) = self.registry.release(machine_id).await {
                tracing::error!(machine_id = %machine_id, error = %e, "Failed to release machine reservation");
            }
        }
        self.notifications.job_failed(job, reason).await;
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
