//! Job store implementations for the Queue domain
//!
//! Every mutation of a leased job is conditioned on its lease token, so a
//! worker that lost its lease cannot clobber a newer owner. The sweeper's
//! forced failure is the one path that ignores the token.

pub mod jobs;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use runfleet_common::Result;
use uuid::Uuid;

use crate::domain::entities::{DispatchReceipt, Job, JobOutcome, QueueCounts, RemoveOutcome};
use crate::domain::state::JobState;

pub use jobs::PgJobStore;
pub use memory::InMemoryJobStore;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn enqueue(&self, job: &Job) -> Result<Job>;

    async fn find(&self, id: Uuid) -> Result<Option<Job>>;

    /// Atomically move the oldest leasable job (waiting, or delayed and due
    /// at `now`) to active under a fresh lease token.
    async fn lease_next(
        &self,
        worker_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>>;

    /// Push the lease expiry out by `ttl`. `false` means the lease is gone.
    async fn renew_lease(
        &self,
        id: Uuid,
        token: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Record which run and machine took the job; the job stays active.
    async fn mark_dispatched(&self, id: Uuid, token: Uuid, receipt: DispatchReceipt)
        -> Result<bool>;

    /// Park the job until `available_at`, clearing the lease.
    /// `retry_count` never moves backwards.
    async fn move_to_delayed(
        &self,
        id: Uuid,
        token: Uuid,
        retry_count: i32,
        available_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Fail a job this worker still holds
    async fn fail_leased(
        &self,
        id: Uuid,
        token: Uuid,
        reason: &str,
        retry_count: i32,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Fail an active job regardless of who holds the lease
    async fn force_fail(&self, id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<Option<Job>>;

    /// Finish an active job from its run's terminal status.
    /// `false` when the job is no longer active.
    async fn resolve_active(&self, id: Uuid, outcome: &JobOutcome, now: DateTime<Utc>)
        -> Result<bool>;

    /// Jobs in one state, in the order they would be processed
    async fn list_by_state(&self, state: JobState, limit: i64) -> Result<Vec<Job>>;

    async fn counts(&self) -> Result<QueueCounts>;

    /// Delete a job that does not hold a lease
    async fn remove(&self, id: Uuid) -> Result<RemoveOutcome>;

    /// Delete every job in the given states; active jobs are never cleaned
    async fn clean(&self, states: &[JobState]) -> Result<u64>;
}

pub(crate) fn lease_expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(30))
}
