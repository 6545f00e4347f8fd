//! Route definitions for Machines domain API

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::machines;
use super::middleware::MachinesState;

/// Create all Machines domain API routes
pub fn routes() -> Router<MachinesState> {
    Router::new()
        .route("/machines/{id}", get(machines::get_machine))
        .route("/machines/{id}/sync", post(machines::sync_machine))
        .route("/machines/{id}/force-idle", post(machines::force_idle_machine))
}
