//! Route definitions for Queue domain API

use axum::{
    routing::{delete, get, post},
    Router,
};

use super::handlers::{queue, runs, sweeper, worker};
use super::middleware::QueueState;

/// Create all Queue domain API routes
pub fn routes() -> Router<QueueState> {
    Router::new()
        .route("/queue/add", post(queue::add_job))
        .route("/queue/list", get(queue::list_jobs))
        .route("/queue/job/{job_id}", delete(queue::remove_job))
        .route("/queue/clean", post(queue::clean_jobs))
        .route("/worker/start", post(worker::start_worker))
        .route("/worker/stop", post(worker::stop_worker))
        .route("/worker/status", get(worker::worker_status))
        .route("/sweeper/start", post(sweeper::start_sweeper))
        .route("/sweeper/stop", post(sweeper::stop_sweeper))
        .route("/sweeper/run", post(sweeper::run_sweep))
        .route("/sweeper/status", get(sweeper::sweeper_status))
        .route("/api/update-run", post(runs::update_run))
}
