//! Run domain entities for Runfleet
//!
//! A run is the execution-tracking record for one dispatched job. It is
//! created when a machine is reserved and finished by the machine's status
//! callbacks or by the stale job sweeper.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "workflow_run_status", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    #[default]
    NotStarted,
    Running,
    Uploading,
    Success,
    Failed,
}

impl RunStatus {
    pub const ALL: [RunStatus; 5] = [
        Self::NotStarted,
        Self::Running,
        Self::Uploading,
        Self::Success,
        Self::Failed,
    ];

    /// Check if status is terminal (run has finished)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not-started"),
            Self::Running => write!(f, "running"),
            Self::Uploading => write!(f, "uploading"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Run entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Run {
    pub id: Uuid,
    pub deployment_id: Uuid,
    pub machine_id: Uuid,
    pub job_id: Option<Uuid>,
    pub status: RunStatus,
    pub origin: String,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    /// Set once, on the first transition into a terminal status
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// A run bound to the machine that was just reserved for it
    pub fn dispatched(
        deployment_id: Uuid,
        machine_id: Uuid,
        job_id: Uuid,
        origin: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            deployment_id,
            machine_id,
            job_id: Some(job_id),
            status: RunStatus::NotStarted,
            origin: origin.into(),
            error_message: None,
            started_at: Some(now),
            ended_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Output reported by a machine, stored independently of status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RunOutput {
    pub id: Uuid,
    pub run_id: Uuid,
    pub data: Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl RunOutput {
    pub fn new(run_id: Uuid, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            data: Json(data),
            created_at: Utc::now(),
        }
    }
}
