//! Stale job sweeper handlers

use axum::{extract::State, Json};
use runfleet_common::Result;
use serde::Serialize;

use crate::api::middleware::QueueState;
use crate::domain::entities::Lifecycle;
use crate::sweeper::{SweepReport, SweeperStatus};

#[derive(Debug, Serialize)]
pub struct SweeperLifecycleResponse {
    pub success: bool,
    pub result: Lifecycle,
    pub status: SweeperStatus,
}

pub async fn start_sweeper(State(state): State<QueueState>) -> Json<SweeperLifecycleResponse> {
    let result = state.sweeper.start().await;
    Json(SweeperLifecycleResponse {
        success: result.changed(),
        result,
        status: state.sweeper.status().await,
    })
}

pub async fn stop_sweeper(State(state): State<QueueState>) -> Json<SweeperLifecycleResponse> {
    let result = state.sweeper.stop().await;
    Json(SweeperLifecycleResponse {
        success: result.changed(),
        result,
        status: state.sweeper.status().await,
    })
}

/// Sweep once, now, whether or not the timer is armed
pub async fn run_sweep(State(state): State<QueueState>) -> Result<Json<SweepReport>> {
    Ok(Json(state.sweeper.run_now().await?))
}

pub async fn sweeper_status(State(state): State<QueueState>) -> Json<SweeperStatus> {
    Json(state.sweeper.status().await)
}
