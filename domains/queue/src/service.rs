//! Operator-facing queue operations: enqueue, inspect, remove, clean

use std::sync::Arc;

use runfleet_common::{Error, Pagination, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::domain::entities::{CallerIdentity, Job, QueueCounts, RemoveOutcome};
use crate::domain::state::JobState;
use crate::repository::JobStore;

/// Counts plus the jobs in each state, in processing order
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueSnapshot {
    pub counts: QueueCounts,
    pub waiting: Vec<Job>,
    pub delayed: Vec<Job>,
    pub active: Vec<Job>,
    pub completed: Vec<Job>,
    pub failed: Vec<Job>,
}

impl QueueSnapshot {
    fn slot(&mut self, state: JobState) -> &mut Vec<Job> {
        match state {
            JobState::Waiting => &mut self.waiting,
            JobState::Delayed => &mut self.delayed,
            JobState::Active => &mut self.active,
            JobState::Completed => &mut self.completed,
            JobState::Failed => &mut self.failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoveResult {
    pub success: bool,
    pub message: String,
}

/// Target of a clean request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanTarget {
    Waiting,
    Delayed,
    Completed,
    Failed,
    /// Every state that holds no lease
    All,
}

impl CleanTarget {
    pub fn states(&self) -> Vec<JobState> {
        match self {
            Self::Waiting => vec![JobState::Waiting],
            Self::Delayed => vec![JobState::Delayed],
            Self::Completed => vec![JobState::Completed],
            Self::Failed => vec![JobState::Failed],
            Self::All => JobState::ALL
                .into_iter()
                .filter(|s| *s != JobState::Active)
                .collect(),
        }
    }
}

#[derive(Clone)]
pub struct QueueService {
    jobs: Arc<dyn JobStore>,
    wake: Option<Arc<Notify>>,
}

impl QueueService {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs, wake: None }
    }

    /// Wake idle worker slots whenever a job is enqueued
    pub fn with_waker(mut self, wake: Arc<Notify>) -> Self {
        self.wake = Some(wake);
        self
    }

    pub async fn enqueue(
        &self,
        deployment_id: Uuid,
        inputs: Option<serde_json::Value>,
        origin: &str,
        caller: CallerIdentity,
    ) -> Result<Job> {
        let job = Job::new(deployment_id, inputs, origin, caller)?;
        let job = self.jobs.enqueue(&job).await?;
        tracing::info!(job_id = %job.id, deployment_id = %deployment_id, "Job enqueued");

        if let Some(wake) = &self.wake {
            wake.notify_one();
        }
        Ok(job)
    }

    pub async fn snapshot(&self, page: Pagination) -> Result<QueueSnapshot> {
        let limit = page.limit();
        let mut snapshot = QueueSnapshot {
            counts: self.jobs.counts().await?,
            ..QueueSnapshot::default()
        };
        for state in JobState::ALL {
            *snapshot.slot(state) = self.jobs.list_by_state(state, limit).await?;
        }
        Ok(snapshot)
    }

    /// Remove a job that holds no lease. Waiting and delayed jobs never
    /// reserved a machine, so no counter moves.
    pub async fn remove(&self, job_id: Uuid) -> Result<RemoveResult> {
        match self.jobs.remove(job_id).await? {
            RemoveOutcome::Removed(job) => {
                tracing::info!(job_id = %job.id, state = %job.state, "Job removed");
                Ok(RemoveResult {
                    success: true,
                    message: format!("Job {} removed", job.id),
                })
            }
            RemoveOutcome::Active => Err(Error::Conflict(format!(
                "Job {} is active and cannot be removed",
                job_id
            ))),
            RemoveOutcome::NotFound => Err(Error::NotFound(format!("Job {} not found", job_id))),
        }
    }

    pub async fn clean(&self, target: CleanTarget) -> Result<u64> {
        let cleaned = self.jobs.clean(&target.states()).await?;
        tracing::info!(?target, cleaned, "Queue cleaned");
        Ok(cleaned)
    }
}
