//! Run status callback (internal, called by machines)

use axum::{extract::State, Json};
use runfleet_common::{Result, ValidatedJson};
use runfleet_runs::RunStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::api::middleware::QueueState;
use crate::completion::RunUpdate;

/// Status report from a machine
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateRunRequest {
    pub run_id: Uuid,
    pub status: Option<RunStatus>,
    #[serde(alias = "output")]
    pub output_data: Option<serde_json::Value>,
    #[validate(length(max = 10000))]
    pub error_message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateRunResponse {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// Whether this report finished the run
    pub completed: bool,
    pub output_recorded: bool,
}

pub async fn update_run(
    State(state): State<QueueState>,
    ValidatedJson(req): ValidatedJson<UpdateRunRequest>,
) -> Result<Json<UpdateRunResponse>> {
    let outcome = state
        .completion
        .update_run_status(RunUpdate {
            run_id: req.run_id,
            status: req.status,
            output: req.output_data,
            error_message: req.error_message,
        })
        .await?;

    Ok(Json(UpdateRunResponse {
        run_id: outcome.run.id,
        status: outcome.run.status,
        completed: outcome.completed,
        output_recorded: outcome.output_recorded,
    }))
}
