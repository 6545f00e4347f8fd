//! Queue domain entities for Runfleet
//!
//! A job is one run request waiting for (or holding) a machine. Jobs live in
//! the job store; the run record is created only once a machine accepts.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;
use validator::ValidationError;

use runfleet_common::{Error, Result};

use crate::domain::state::JobState;

/// Who asked for the job. Recorded, never checked here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub user_id: Option<String>,
    pub org_id: Option<String>,
}

/// What the worker recorded when a machine accepted the job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReceipt {
    pub run_id: Uuid,
    pub machine_id: Uuid,
}

/// Job entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub deployment_id: Uuid,
    pub inputs: Json<serde_json::Value>,
    pub origin: String,
    pub caller: Json<CallerIdentity>,
    pub state: JobState,
    pub enqueued_at: DateTime<Utc>,
    /// Earliest time a delayed job may be leased again
    pub available_at: DateTime<Utc>,
    /// When the job last became active
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    #[serde(skip_serializing)]
    pub lease_token: Option<Uuid>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub return_value: Option<Json<DispatchReceipt>>,
    pub failed_reason: Option<String>,
}

impl Job {
    /// Create a new waiting job with validated inputs
    pub fn new(
        deployment_id: Uuid,
        inputs: Option<serde_json::Value>,
        origin: impl Into<String>,
        caller: CallerIdentity,
    ) -> Result<Self> {
        let inputs = inputs.unwrap_or_else(|| serde_json::json!({}));
        validate_inputs(&inputs).map_err(|e| Error::Validation(e.to_string()))?;

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            deployment_id,
            inputs: Json(inputs),
            origin: origin.into(),
            caller: Json(caller),
            state: JobState::Waiting,
            enqueued_at: now,
            available_at: now,
            started_at: None,
            finished_at: None,
            retry_count: 0,
            lease_token: None,
            lease_expires_at: None,
            worker_id: None,
            return_value: None,
            failed_reason: None,
        })
    }

    pub fn receipt(&self) -> Option<DispatchReceipt> {
        self.return_value.as_ref().map(|r| r.0)
    }

    /// How long the job has been active at `now`
    pub fn active_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.started_at.unwrap_or(self.enqueued_at)
    }
}

/// Inputs are a flat map of scalar values.
///
/// Usable as a `#[validate(custom(function = "validate_inputs"))]` rule.
pub fn validate_inputs(inputs: &serde_json::Value) -> std::result::Result<(), ValidationError> {
    let Some(map) = inputs.as_object() else {
        return Err(ValidationError::new("scalar_inputs")
            .with_message(Cow::Borrowed("inputs must be an object of scalar values")));
    };

    for (key, value) in map {
        if !(value.is_string() || value.is_number() || value.is_boolean()) {
            return Err(ValidationError::new("scalar_inputs").with_message(Cow::Owned(
                format!("input '{}' must be a string, number or boolean", key),
            )));
        }
    }
    Ok(())
}

/// Job counts per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: i64,
    pub delayed: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
}

impl QueueCounts {
    pub fn get(&self, state: JobState) -> i64 {
        match state {
            JobState::Waiting => self.waiting,
            JobState::Delayed => self.delayed,
            JobState::Active => self.active,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
        }
    }

    pub fn set(&mut self, state: JobState, count: i64) {
        match state {
            JobState::Waiting => self.waiting = count,
            JobState::Delayed => self.delayed = count,
            JobState::Active => self.active = count,
            JobState::Completed => self.completed = count,
            JobState::Failed => self.failed = count,
        }
    }

    pub fn total(&self) -> i64 {
        JobState::ALL.iter().map(|s| self.get(*s)).sum()
    }
}

/// How a job left the store, when it did
#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    Removed(Job),
    /// Active jobs hold a lease and possibly a machine reservation
    Active,
    NotFound,
}

/// Terminal resolution of an active job
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed,
    Failed(String),
}

/// Result of a start/stop request on a background service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Started,
    AlreadyRunning,
    Stopped,
    NotRunning,
}

impl Lifecycle {
    /// Whether the request changed anything
    pub fn changed(&self) -> bool {
        matches!(self, Self::Started | Self::Stopped)
    }
}
