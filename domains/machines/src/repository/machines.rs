//! Machine registry backed by Postgres

use async_trait::async_trait;
use runfleet_common::Result;
use sqlx::PgPool;
use uuid::Uuid;

use super::MachineRegistry;
use crate::domain::entities::{DeploymentTarget, Machine};

const MACHINE_COLUMNS: &str = "id, name, base_url, auth_token, max_queue_size, \
     current_queue_size, operational_status, created_at, updated_at";

#[derive(Clone)]
pub struct PgMachineRegistry {
    pool: PgPool,
}

impl PgMachineRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a machine (administrative, out-of-band)
    pub async fn create(&self, machine: &Machine) -> Result<Machine> {
        let row = sqlx::query_as::<_, Machine>(&format!(
            r#"
            INSERT INTO machines (id, name, base_url, auth_token, max_queue_size,
                                  current_queue_size, operational_status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {MACHINE_COLUMNS}
            "#
        ))
        .bind(machine.id)
        .bind(&machine.name)
        .bind(&machine.base_url)
        .bind(&machine.auth_token)
        .bind(machine.max_queue_size)
        .bind(machine.current_queue_size)
        .bind(machine.operational_status)
        .bind(machine.created_at)
        .bind(machine.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl MachineRegistry for PgMachineRegistry {
    async fn find(&self, id: Uuid) -> Result<Option<Machine>> {
        let row = sqlx::query_as::<_, Machine>(&format!(
            "SELECT {MACHINE_COLUMNS} FROM machines WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn candidates(&self, target: &DeploymentTarget) -> Result<Vec<Machine>> {
        let rows = match target {
            DeploymentTarget::Machine(id) => {
                sqlx::query_as::<_, Machine>(&format!(
                    "SELECT {MACHINE_COLUMNS} FROM machines WHERE id = $1"
                ))
                .bind(id)
                .fetch_all(&self.pool)
                .await?
            }
            DeploymentTarget::Group(group_id) => {
                sqlx::query_as::<_, Machine>(
                    r#"
                    SELECT m.id, m.name, m.base_url, m.auth_token, m.max_queue_size,
                           m.current_queue_size, m.operational_status, m.created_at, m.updated_at
                    FROM machines m
                    JOIN machine_group_members g ON g.machine_id = m.id
                    WHERE g.group_id = $1
                    ORDER BY m.id
                    "#,
                )
                .bind(group_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    async fn try_reserve(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE machines SET
                current_queue_size = current_queue_size + 1,
                operational_status = 'busy',
                updated_at = NOW()
            WHERE id = $1
              AND (max_queue_size IS NULL OR current_queue_size < max_queue_size)
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        let reserved = result.rows_affected() == 1;
        tracing::debug!(machine_id = %id, reserved, "Machine reservation attempt");
        Ok(reserved)
    }

    async fn release(&self, id: Uuid) -> Result<Option<Machine>> {
        // Right-hand sides see the pre-update row
        let row = sqlx::query_as::<_, Machine>(&format!(
            r#"
            UPDATE machines SET
                current_queue_size = GREATEST(0, current_queue_size - 1),
                operational_status = CASE
                    WHEN current_queue_size - 1 <= 0 THEN 'idle'::machine_operational_status
                    ELSE 'busy'::machine_operational_status
                END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {MACHINE_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(machine) = &row {
            tracing::debug!(
                machine_id = %id,
                current_queue_size = machine.current_queue_size,
                "Machine reservation released"
            );
        }
        Ok(row)
    }

    async fn sync(&self, id: Uuid, actual_size: i32) -> Result<Option<Machine>> {
        let row = sqlx::query_as::<_, Machine>(&format!(
            r#"
            UPDATE machines SET
                current_queue_size = GREATEST(0, $2),
                operational_status = CASE
                    WHEN $2 <= 0 THEN 'idle'::machine_operational_status
                    ELSE 'busy'::machine_operational_status
                END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {MACHINE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(actual_size)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn force_idle(&self, id: Uuid) -> Result<Option<Machine>> {
        let row = sqlx::query_as::<_, Machine>(&format!(
            r#"
            UPDATE machines SET
                current_queue_size = 0,
                operational_status = 'idle',
                updated_at = NOW()
            WHERE id = $1
            RETURNING {MACHINE_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
