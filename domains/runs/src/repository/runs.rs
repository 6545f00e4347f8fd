//! Run repository backed by Postgres

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use runfleet_common::Result;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{RunRepository, StatusWrite};
use crate::domain::entities::{Run, RunOutput, RunStatus};

const RUN_COLUMNS: &str = "id, deployment_id, machine_id, job_id, status, origin, error_message, \
     started_at, ended_at, created_at, updated_at";

#[derive(Clone)]
pub struct PgRunRepository {
    pool: PgPool,
}

impl PgRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunRepository for PgRunRepository {
    async fn create(&self, run: &Run) -> Result<Run> {
        let row = sqlx::query_as::<_, Run>(&format!(
            r#"
            INSERT INTO workflow_runs (id, deployment_id, machine_id, job_id, status, origin,
                                       error_message, started_at, ended_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(run.id)
        .bind(run.deployment_id)
        .bind(run.machine_id)
        .bind(run.job_id)
        .bind(run.status)
        .bind(&run.origin)
        .bind(&run.error_message)
        .bind(run.started_at)
        .bind(run.ended_at)
        .bind(run.created_at)
        .bind(run.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Run>> {
        let row = sqlx::query_as::<_, Run>(&format!(
            "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        // Outputs first (FK constraint)
        sqlx::query("DELETE FROM workflow_run_outputs WHERE run_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let result = sqlx::query("DELETE FROM workflow_runs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: RunStatus,
        error_message: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<StatusWrite> {
        let updated = sqlx::query_as::<_, Run>(&format!(
            r#"
            UPDATE workflow_runs SET
                status = $2,
                error_message = COALESCE($3, error_message),
                ended_at = CASE WHEN $2 IN ('success', 'failed') THEN $4 ELSE ended_at END,
                updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('success', 'failed')
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status)
        .bind(error_message)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(run) = updated {
            return Ok(StatusWrite::Applied {
                completed: status.is_terminal(),
                run,
            });
        }

        Ok(match self.find(id).await? {
            Some(run) => StatusWrite::AlreadyTerminal(run),
            None => StatusWrite::NotFound,
        })
    }

    async fn add_output(&self, run_id: Uuid, data: serde_json::Value) -> Result<RunOutput> {
        let output = RunOutput::new(run_id, data);
        let row = sqlx::query_as::<_, RunOutput>(
            r#"
            INSERT INTO workflow_run_outputs (id, run_id, data, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, run_id, data, created_at
            "#,
        )
        .bind(output.id)
        .bind(output.run_id)
        .bind(Json(&output.data.0))
        .bind(output.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn outputs(&self, run_id: Uuid) -> Result<Vec<RunOutput>> {
        let rows = sqlx::query_as::<_, RunOutput>(
            r#"
            SELECT id, run_id, data, created_at
            FROM workflow_run_outputs WHERE run_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
