//! Machine administration API handlers

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use runfleet_common::{Error, Result, ValidatedJson};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::api::middleware::MachinesState;
use crate::domain::entities::{Machine, OperationalStatus};

/// Machine response DTO (never carries the auth token)
#[derive(Debug, Serialize)]
pub struct MachineResponse {
    pub id: Uuid,
    pub name: String,
    pub base_url: String,
    pub max_queue_size: Option<i32>,
    pub current_queue_size: i32,
    pub operational_status: OperationalStatus,
    pub updated_at: DateTime<Utc>,
}

impl From<Machine> for MachineResponse {
    fn from(m: Machine) -> Self {
        Self {
            id: m.id,
            name: m.name,
            base_url: m.base_url,
            max_queue_size: m.max_queue_size,
            current_queue_size: m.current_queue_size,
            operational_status: m.operational_status,
            updated_at: m.updated_at,
        }
    }
}

/// Request for reconciling a machine counter
#[derive(Debug, Deserialize, Validate)]
pub struct SyncMachineRequest {
    #[validate(range(min = 0, message = "actual_size cannot be negative"))]
    pub actual_size: i32,
}

fn not_found(id: Uuid) -> Error {
    Error::NotFound(format!("Machine {} not found", id))
}

/// Get a machine's current load
pub async fn get_machine(
    State(state): State<MachinesState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MachineResponse>> {
    let machine = state.registry.find(id).await?.ok_or_else(|| not_found(id))?;
    Ok(Json(machine.into()))
}

/// Overwrite a machine's counter after detected drift
pub async fn sync_machine(
    State(state): State<MachinesState>,
    Path(id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<SyncMachineRequest>,
) -> Result<Json<MachineResponse>> {
    let machine = state
        .registry
        .sync(id, request.actual_size)
        .await?
        .ok_or_else(|| not_found(id))?;

    tracing::info!(
        machine_id = %id,
        current_queue_size = machine.current_queue_size,
        "Machine counter synced"
    );
    Ok(Json(machine.into()))
}

/// Reset a machine to idle
pub async fn force_idle_machine(
    State(state): State<MachinesState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MachineResponse>> {
    let machine = state
        .registry
        .force_idle(id)
        .await?
        .ok_or_else(|| not_found(id))?;

    tracing::warn!(machine_id = %id, "Machine forced idle");
    Ok(Json(machine.into()))
}
