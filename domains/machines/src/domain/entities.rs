//! Machine domain entities for Runfleet
//!
//! Machines are long-lived execution nodes created out-of-band. This crate only
//! owns their admission counters and operational status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use runfleet_common::{Error, Result};
use runfleet_compute::MachineEndpoint;

/// Machine operational status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "machine_operational_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OperationalStatus {
    #[default]
    Idle,
    Busy,
}

impl OperationalStatus {
    /// Status implied by a queue size: idle iff nothing is queued
    pub fn for_queue_size(size: i32) -> Self {
        if size <= 0 {
            Self::Idle
        } else {
            Self::Busy
        }
    }
}

impl std::fmt::Display for OperationalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Busy => write!(f, "busy"),
        }
    }
}

/// Machine entity
#[derive(Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Machine {
    pub id: Uuid,
    pub name: String,
    pub base_url: String,
    #[serde(skip_serializing, default)]
    pub auth_token: Option<String>,
    pub max_queue_size: Option<i32>,
    pub current_queue_size: i32,
    pub operational_status: OperationalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("max_queue_size", &self.max_queue_size)
            .field("current_queue_size", &self.current_queue_size)
            .field("operational_status", &self.operational_status)
            .finish()
    }
}

impl Machine {
    /// Create a new idle machine with validation
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        max_queue_size: Option<i32>,
    ) -> Result<Self> {
        let name = name.into();
        let base_url = base_url.into();

        if name.trim().is_empty() {
            return Err(Error::Validation("Machine name cannot be empty".to_string()));
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::Validation(format!(
                "Machine base URL must be http(s): {}",
                base_url
            )));
        }
        if let Some(max) = max_queue_size {
            if max < 1 {
                return Err(Error::Validation(
                    "Machine max_queue_size must be at least 1".to_string(),
                ));
            }
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            base_url,
            auth_token: None,
            max_queue_size,
            current_queue_size: 0,
            operational_status: OperationalStatus::Idle,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Whether one more reservation would stay within the admission limit
    pub fn has_capacity(&self) -> bool {
        match self.max_queue_size {
            Some(max) => self.current_queue_size < max,
            None => true,
        }
    }

    /// Connection details for the compute client
    pub fn endpoint(&self) -> MachineEndpoint {
        MachineEndpoint {
            machine_id: self.id,
            base_url: self.base_url.clone(),
            auth_token: self.auth_token.clone(),
        }
    }
}

/// What a deployment runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum DeploymentTarget {
    Machine(Uuid),
    Group(Uuid),
}

/// Deployment as resolved for dispatch.
///
/// Ownership is carried for the record only; authorization happens upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: Uuid,
    pub target: DeploymentTarget,
    pub org_id: Option<String>,
    pub user_id: Option<String>,
}

/// Raw deployment row, with exactly one of the two targets set
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeploymentRow {
    pub id: Uuid,
    pub machine_id: Option<Uuid>,
    pub machine_group_id: Option<Uuid>,
    pub org_id: Option<String>,
    pub user_id: Option<String>,
}

impl TryFrom<DeploymentRow> for Deployment {
    type Error = Error;

    fn try_from(row: DeploymentRow) -> Result<Self> {
        let target = match (row.machine_id, row.machine_group_id) {
            (Some(machine_id), None) => DeploymentTarget::Machine(machine_id),
            (None, Some(group_id)) => DeploymentTarget::Group(group_id),
            _ => {
                return Err(Error::Validation(format!(
                    "Deployment {} must target exactly one machine or machine group",
                    row.id
                )))
            }
        };

        Ok(Self {
            id: row.id,
            target,
            org_id: row.org_id,
            user_id: row.user_id,
        })
    }
}
