//! Deployment resolution backed by Postgres

use async_trait::async_trait;
use runfleet_common::Result;
use sqlx::PgPool;
use uuid::Uuid;

use super::DeploymentResolver;
use crate::domain::entities::{Deployment, DeploymentRow};

#[derive(Clone)]
pub struct PgDeploymentResolver {
    pool: PgPool,
}

impl PgDeploymentResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeploymentResolver for PgDeploymentResolver {
    async fn resolve(&self, deployment_id: Uuid) -> Result<Option<Deployment>> {
        let row = sqlx::query_as::<_, DeploymentRow>(
            r#"
            SELECT id, machine_id, machine_group_id, org_id, user_id
            FROM deployments WHERE id = $1
            "#,
        )
        .bind(deployment_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Deployment::try_from).transpose()
    }
}
