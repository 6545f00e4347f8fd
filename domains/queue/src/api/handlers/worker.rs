//! Worker pool lifecycle handlers

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::QueueState;
use crate::domain::entities::Lifecycle;
use crate::pool::WorkerPoolStatus;

#[derive(Debug, Default, Deserialize)]
pub struct StopWorkerParams {
    /// Abort in-flight dispatches instead of letting them finish
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct WorkerLifecycleResponse {
    pub success: bool,
    pub result: Lifecycle,
    pub status: WorkerPoolStatus,
}

pub async fn start_worker(State(state): State<QueueState>) -> Json<WorkerLifecycleResponse> {
    let result = state.pool.start().await;
    Json(WorkerLifecycleResponse {
        success: result.changed(),
        result,
        status: state.pool.status().await,
    })
}

pub async fn stop_worker(
    State(state): State<QueueState>,
    Query(params): Query<StopWorkerParams>,
) -> Json<WorkerLifecycleResponse> {
    let result = state.pool.stop(params.force).await;
    Json(WorkerLifecycleResponse {
        success: result.changed(),
        result,
        status: state.pool.status().await,
    })
}

pub async fn worker_status(State(state): State<QueueState>) -> Json<WorkerPoolStatus> {
    Json(state.pool.status().await)
}
