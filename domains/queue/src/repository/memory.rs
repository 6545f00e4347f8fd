//! In-memory job store for local runs and tests
//!
//! One mutex guards the whole table so every operation is a single atomic
//! step, matching the conditional statements of the Postgres store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use runfleet_common::{Error, Result};
use sqlx::types::Json;
use uuid::Uuid;

use super::{lease_expiry, JobStore};
use crate::domain::entities::{DispatchReceipt, Job, JobOutcome, QueueCounts, RemoveOutcome};
use crate::domain::state::{JobEvent, JobState, JobStateMachine};

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    offline: AtomicBool,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backing store being unreachable
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Overwrite a stored job; lets tests age jobs or plant odd states
    pub fn put(&self, job: Job) {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job.id, job);
    }

    fn jobs(&self) -> Result<MutexGuard<'_, HashMap<Uuid, Job>>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("job store is offline".to_string()));
        }
        Ok(self.jobs.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Apply `event` to the job if it is active under `token` (any token when `None`)
    fn with_active<F>(&self, id: Uuid, token: Option<Uuid>, event: JobEvent, apply: F) -> Result<Option<Job>>
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs()?;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        if job.state != JobState::Active {
            return Ok(None);
        }
        if token.is_some() && job.lease_token != token {
            return Ok(None);
        }

        job.state = JobStateMachine::transition(job.state, event)?;
        if job.state != JobState::Active {
            job.lease_token = None;
            job.lease_expires_at = None;
        }
        apply(job);
        Ok(Some(job.clone()))
    }
}

fn process_order(state: JobState) -> impl Fn(&Job, &Job) -> std::cmp::Ordering {
    move |a, b| match state {
        JobState::Waiting | JobState::Delayed => (a.available_at, a.enqueued_at, a.id)
            .cmp(&(b.available_at, b.enqueued_at, b.id)),
        JobState::Active => (a.started_at, a.id).cmp(&(b.started_at, b.id)),
        JobState::Completed | JobState::Failed => (b.finished_at, b.id).cmp(&(a.finished_at, a.id)),
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, job: &Job) -> Result<Job> {
        self.jobs()?.insert(job.id, job.clone());
        Ok(job.clone())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs()?.get(&id).cloned())
    }

    async fn lease_next(
        &self,
        worker_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        let mut jobs = self.jobs()?;
        let next = jobs
            .values()
            .filter(|j| {
                j.state == JobState::Waiting
                    || (j.state == JobState::Delayed && j.available_at <= now)
            })
            .min_by(|a, b| process_order(JobState::Waiting)(a, b))
            .map(|j| j.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };

        job.state = JobStateMachine::transition(job.state, JobEvent::Lease)?;
        job.lease_token = Some(Uuid::new_v4());
        job.lease_expires_at = Some(lease_expiry(now, ttl));
        job.worker_id = Some(worker_id.to_string());
        job.started_at = Some(now);
        Ok(Some(job.clone()))
    }

    async fn renew_lease(
        &self,
        id: Uuid,
        token: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut jobs = self.jobs()?;
        match jobs.get_mut(&id) {
            Some(job) if job.state == JobState::Active && job.lease_token == Some(token) => {
                job.lease_expires_at = Some(lease_expiry(now, ttl));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_dispatched(
        &self,
        id: Uuid,
        token: Uuid,
        receipt: DispatchReceipt,
    ) -> Result<bool> {
        let mut jobs = self.jobs()?;
        match jobs.get_mut(&id) {
            Some(job) if job.state == JobState::Active && job.lease_token == Some(token) => {
                job.return_value = Some(Json(receipt));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn move_to_delayed(
        &self,
        id: Uuid,
        token: Uuid,
        retry_count: i32,
        available_at: DateTime<Utc>,
    ) -> Result<bool> {
        let moved = self.with_active(id, Some(token), JobEvent::Retry, |job| {
            job.retry_count = job.retry_count.max(retry_count);
            job.available_at = available_at;
            job.worker_id = None;
        })?;
        Ok(moved.is_some())
    }

    async fn fail_leased(
        &self,
        id: Uuid,
        token: Uuid,
        reason: &str,
        retry_count: i32,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let failed = self.with_active(id, Some(token), JobEvent::Fail, |job| {
            job.retry_count = job.retry_count.max(retry_count);
            job.failed_reason = Some(reason.to_string());
            job.finished_at = Some(now);
        })?;
        Ok(failed.is_some())
    }

    async fn force_fail(&self, id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<Option<Job>> {
        self.with_active(id, None, JobEvent::Fail, |job| {
            job.failed_reason = Some(reason.to_string());
            job.finished_at = Some(now);
        })
    }

    async fn resolve_active(
        &self,
        id: Uuid,
        outcome: &JobOutcome,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let event = match outcome {
            JobOutcome::Completed => JobEvent::Complete,
            JobOutcome::Failed(_) => JobEvent::Fail,
        };
        let resolved = self.with_active(id, None, event, |job| {
            if let JobOutcome::Failed(reason) = outcome {
                job.failed_reason = Some(reason.clone());
            }
            job.finished_at = Some(now);
        })?;
        Ok(resolved.is_some())
    }

    async fn list_by_state(&self, state: JobState, limit: i64) -> Result<Vec<Job>> {
        let jobs = self.jobs()?;
        let mut matching: Vec<Job> = jobs.values().filter(|j| j.state == state).cloned().collect();
        matching.sort_by(process_order(state));
        matching.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(matching)
    }

    async fn counts(&self) -> Result<QueueCounts> {
        let jobs = self.jobs()?;
        let mut counts = QueueCounts::default();
        for job in jobs.values() {
            counts.set(job.state, counts.get(job.state) + 1);
        }
        Ok(counts)
    }

    async fn remove(&self, id: Uuid) -> Result<RemoveOutcome> {
        let mut jobs = self.jobs()?;
        match jobs.get(&id).map(|j| j.state) {
            None => Ok(RemoveOutcome::NotFound),
            Some(JobState::Active) => Ok(RemoveOutcome::Active),
            Some(_) => Ok(jobs
                .remove(&id)
                .map(RemoveOutcome::Removed)
                .unwrap_or(RemoveOutcome::NotFound)),
        }
    }

    async fn clean(&self, states: &[JobState]) -> Result<u64> {
        let mut jobs = self.jobs()?;
        let before = jobs.len();
        jobs.retain(|_, j| j.state == JobState::Active || !states.contains(&j.state));
        Ok((before - jobs.len()) as u64)
    }
}
