//! Queue operation handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use runfleet_common::{Pagination, Result, ValidatedJson};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::api::middleware::QueueState;
use crate::domain::entities::{validate_inputs, CallerIdentity};
use crate::service::{CleanTarget, QueueSnapshot, RemoveResult};

/// Request for enqueueing a run
#[derive(Debug, Deserialize, Validate)]
pub struct AddJobRequest {
    pub deployment_id: Uuid,
    #[validate(custom(function = "validate_inputs"))]
    pub inputs: Option<serde_json::Value>,
    #[validate(length(max = 2048))]
    pub origin: Option<String>,
    /// Identity of the caller, recorded as given
    #[serde(default)]
    pub caller: CallerIdentity,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddJobResponse {
    pub job_id: Uuid,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CleanJobsRequest {
    /// Defaults to `waiting`
    pub state: Option<CleanTarget>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanJobsResponse {
    pub cleaned_count: u64,
}

/// Enqueue a run request
pub async fn add_job(
    State(state): State<QueueState>,
    ValidatedJson(req): ValidatedJson<AddJobRequest>,
) -> Result<(StatusCode, Json<AddJobResponse>)> {
    let origin = req
        .origin
        .filter(|o| !o.trim().is_empty())
        .unwrap_or_else(|| state.default_origin.clone());

    let job = state
        .queue
        .enqueue(req.deployment_id, req.inputs, &origin, req.caller)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(AddJobResponse {
            job_id: job.id,
            status: "queued".to_string(),
            message: "Job added to queue successfully".to_string(),
        }),
    ))
}

/// Counts and jobs per state
pub async fn list_jobs(
    State(state): State<QueueState>,
    Query(page): Query<Pagination>,
) -> Result<Json<QueueSnapshot>> {
    Ok(Json(state.queue.snapshot(page).await?))
}

/// Remove a job that is not active
pub async fn remove_job(
    State(state): State<QueueState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<RemoveResult>> {
    Ok(Json(state.queue.remove(job_id).await?))
}

/// Delete jobs in one state, or in every state that holds no lease
pub async fn clean_jobs(
    State(state): State<QueueState>,
    ValidatedJson(req): ValidatedJson<CleanJobsRequest>,
) -> Result<Json<CleanJobsResponse>> {
    let target = req.state.unwrap_or(CleanTarget::Waiting);
    let cleaned_count = state.queue.clean(target).await?;
    Ok(Json(CleanJobsResponse { cleaned_count }))
}
