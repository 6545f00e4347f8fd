//! Run status ingestion and terminal side effects
//!
//! Machines report progress through [`CompletionHandler::update_run_status`].
//! The run repository's conditional write tells us whether *this* call is
//! the one that moved the run into a terminal status; only that call
//! releases the machine, resolves the job and fires the notification.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use runfleet_common::{Error, Result};
use runfleet_machines::MachineRegistry;
use runfleet_runs::{Run, RunRepository, RunStateMachine, RunStatus, StatusWrite};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::entities::JobOutcome;
use crate::notifications::NotificationTrigger;
use crate::repository::JobStore;

/// One status report for a run
#[derive(Debug, Clone, Default)]
pub struct RunUpdate {
    pub run_id: Uuid,
    pub status: Option<RunStatus>,
    pub output: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunUpdateOutcome {
    pub run: Run,
    /// True only for the report that finished the run
    pub completed: bool,
    pub output_recorded: bool,
}

#[derive(Clone)]
pub struct CompletionHandler {
    runs: Arc<dyn RunRepository>,
    registry: Arc<dyn MachineRegistry>,
    jobs: Arc<dyn JobStore>,
    notifications: NotificationTrigger,
}

impl CompletionHandler {
    pub fn new(
        runs: Arc<dyn RunRepository>,
        registry: Arc<dyn MachineRegistry>,
        jobs: Arc<dyn JobStore>,
        notifications: NotificationTrigger,
    ) -> Self {
        Self {
            runs,
            registry,
            jobs,
            notifications,
        }
    }

    /// Record output and/or a status change. Safe to call repeatedly; a
    /// status write to a finished run changes nothing.
    pub async fn update_run_status(&self, update: RunUpdate) -> Result<RunUpdateOutcome> {
        let run = self
            .runs
            .find(update.run_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Run {} not found", update.run_id)))?;

        // Rejected status reports leave no output behind
        let status = match update.status {
            Some(status) if !run.is_terminal() => {
                RunStateMachine::transition(run.status, status)?;
                Some(status)
            }
            Some(status) => {
                tracing::debug!(
                    run_id = %run.id,
                    current = %run.status,
                    reported = %status,
                    "Ignoring status report for finished run"
                );
                None
            }
            None => None,
        };

        let output_recorded = match update.output {
            Some(data) => {
                self.runs.add_output(run.id, data).await?;
                true
            }
            None => false,
        };

        let Some(status) = status else {
            return Ok(RunUpdateOutcome {
                run,
                completed: false,
                output_recorded,
            });
        };

        let write = self
            .write_status(run.id, status, update.error_message, Utc::now())
            .await?;
        let completed = write.completed();
        let run = match write {
            StatusWrite::Applied { run, .. } | StatusWrite::AlreadyTerminal(run) => run,
            StatusWrite::NotFound => {
                return Err(Error::NotFound(format!("Run {} not found", update.run_id)))
            }
        };

        Ok(RunUpdateOutcome {
            run,
            completed,
            output_recorded,
        })
    }

    /// Fail a run on the sweeper's behalf. `None` when the run does not exist.
    pub async fn fail_run(&self, run_id: Uuid, message: &str) -> Result<Option<StatusWrite>> {
        let write = self
            .write_status(run_id, RunStatus::Failed, Some(message.to_string()), Utc::now())
            .await?;
        Ok(match write {
            StatusWrite::NotFound => None,
            write => Some(write),
        })
    }

    async fn write_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<StatusWrite> {
        let write = self
            .runs
            .update_status(run_id, status, error_message, at)
            .await?;

        if let StatusWrite::Applied {
            run,
            completed: true,
        } = &write
        {
            self.finish(run).await;
        }
        Ok(write)
    }

    /// Side effects of a run's single terminal transition
    async fn finish(&self, run: &Run) {
        tracing::info!(
            run_id = %run.id,
            machine_id = %run.machine_id,
            status = %run.status,
            "Run finished"
        );

        match self.registry.release(run.machine_id).await {
            Ok(Some(machine)) => tracing::info!(
                machine_id = %machine.id,
                current_queue_size = machine.current_queue_size,
                "Released machine reservation"
            ),
            Ok(None) => tracing::warn!(machine_id = %run.machine_id, "Machine vanished before release"),
            Err(e) => tracing::error!(
                machine_id = %run.machine_id,
                error = %e,
                "Failed to release machine reservation"
            ),
        }

        if let Some(job_id) = run.job_id {
            let outcome = match run.status {
                RunStatus::Success => JobOutcome::Completed,
                _ => JobOutcome::Failed(
                    run.error_message
                        .clone()
                        .unwrap_or_else(|| "Run failed".to_string()),
                ),
            };
            match self.jobs.resolve_active(job_id, &outcome, Utc::now()).await {
                Ok(true) => tracing::info!(job_id = %job_id, ?outcome, "Resolved job from run status"),
                Ok(false) => tracing::debug!(job_id = %job_id, "Job already resolved"),
                Err(e) => tracing::error!(job_id = %job_id, error = %e, "Failed to resolve job"),
            }
        }

        self.notifications.run_finished(run).await;
    }
}
