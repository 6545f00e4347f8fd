//! Job store backed by Postgres

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use runfleet_common::Result;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{lease_expiry, JobStore};
use crate::domain::entities::{DispatchReceipt, Job, JobOutcome, QueueCounts, RemoveOutcome};
use crate::domain::state::JobState;

const JOB_COLUMNS: &str = "id, deployment_id, inputs, origin, caller, state, enqueued_at, \
     available_at, started_at, finished_at, retry_count, lease_token, lease_expires_at, \
     worker_id, return_value, failed_reason";

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, job: &Job) -> Result<Job> {
        let row = sqlx::query_as::<_, Job>(&format!(
            r#"
            INSERT INTO queue_jobs (id, deployment_id, inputs, origin, caller, state,
                                    enqueued_at, available_at, retry_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job.id)
        .bind(job.deployment_id)
        .bind(&job.inputs)
        .bind(&job.origin)
        .bind(&job.caller)
        .bind(job.state)
        .bind(job.enqueued_at)
        .bind(job.available_at)
        .bind(job.retry_count)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, Job>(&format!(
            "SELECT {JOB_COLUMNS} FROM queue_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn lease_next(
        &self,
        worker_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, Job>(&format!(
            r#"
            UPDATE queue_jobs SET
                state = 'active',
                lease_token = $1,
                lease_expires_at = $2,
                worker_id = $3,
                started_at = $4
            WHERE id = (
                SELECT id FROM queue_jobs
                WHERE state = 'waiting' OR (state = 'delayed' AND available_at <= $4)
                ORDER BY available_at ASC, enqueued_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(lease_expiry(now, ttl))
        .bind(worker_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn renew_lease(
        &self,
        id: Uuid,
        token: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue_jobs SET lease_expires_at = $3
            WHERE id = $1 AND lease_token = $2 AND state = 'active'
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(lease_expiry(now, ttl))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_dispatched(
        &self,
        id: Uuid,
        token: Uuid,
        receipt: DispatchReceipt,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue_jobs SET return_value = $3
            WHERE id = $1 AND lease_token = $2 AND state = 'active'
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(Json(receipt))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn move_to_delayed(
        &self,
        id: Uuid,
        token: Uuid,
        retry_count: i32,
        available_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue_jobs SET
                state = 'delayed',
                retry_count = GREATEST(retry_count, $3),
                available_at = $4,
                lease_token = NULL,
                lease_expires_at = NULL,
                worker_id = NULL
            WHERE id = $1 AND lease_token = $2 AND state = 'active'
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(retry_count)
        .bind(available_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail_leased(
        &self,
        id: Uuid,
        token: Uuid,
        reason: &str,
        retry_count: i32,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue_jobs SET
                state = 'failed',
                retry_count = GREATEST(retry_count, $4),
                failed_reason = $3,
                finished_at = $5,
                lease_token = NULL,
                lease_expires_at = NULL
            WHERE id = $1 AND lease_token = $2 AND state = 'active'
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(reason)
        .bind(retry_count)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn force_fail(&self, id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, Job>(&format!(
            r#"
            UPDATE queue_jobs SET
                state = 'failed',
                failed_reason = $2,
                finished_at = $3,
                lease_token = NULL,
                lease_expires_at = NULL
            WHERE id = $1 AND state = 'active'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(reason)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn resolve_active(
        &self,
        id: Uuid,
        outcome: &JobOutcome,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let (state, reason) = match outcome {
            JobOutcome::Completed => (JobState::Completed, None),
            JobOutcome::Failed(reason) => (JobState::Failed, Some(reason.as_str())),
        };

        let result = sqlx::query(
            r#"
            UPDATE queue_jobs SET
                state = $2,
                failed_reason = $3,
                finished_at = $4,
                lease_token = NULL,
                lease_expires_at = NULL
            WHERE id = $1 AND state = 'active'
            "#,
        )
        .bind(id)
        .bind(state)
        .bind(reason)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_by_state(&self, state: JobState, limit: i64) -> Result<Vec<Job>> {
        let order = match state {
            JobState::Waiting | JobState::Delayed => "available_at ASC, enqueued_at ASC",
            JobState::Active => "started_at ASC",
            JobState::Completed | JobState::Failed => "finished_at DESC",
        };
        let rows = sqlx::query_as::<_, Job>(&format!(
            "SELECT {JOB_COLUMNS} FROM queue_jobs WHERE state = $1 ORDER BY {order} LIMIT $2"
        ))
        .bind(state)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn counts(&self) -> Result<QueueCounts> {
        let rows = sqlx::query_as::<_, (JobState, i64)>(
            "SELECT state, COUNT(*) FROM queue_jobs GROUP BY state",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = QueueCounts::default();
        for (state, count) in rows {
            counts.set(state, count);
        }
        Ok(counts)
    }

    async fn remove(&self, id: Uuid) -> Result<RemoveOutcome> {
        let removed = sqlx::query_as::<_, Job>(&format!(
            "DELETE FROM queue_jobs WHERE id = $1 AND state <> 'active' RETURNING {JOB_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(job) = removed {
            return Ok(RemoveOutcome::Removed(job));
        }

        Ok(match self.find(id).await? {
            Some(_) => RemoveOutcome::Active,
            None => RemoveOutcome::NotFound,
        })
    }

    async fn clean(&self, states: &[JobState]) -> Result<u64> {
        let states: Vec<JobState> = states
            .iter()
            .copied()
            .filter(|s| *s != JobState::Active)
            .collect();
        if states.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM queue_jobs WHERE state = ANY($1)")
            .bind(&states)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
