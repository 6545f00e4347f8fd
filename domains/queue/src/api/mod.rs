//! API layer for the Queue domain
//!
//! Queue operations, worker pool and sweeper lifecycle, and the run status
//! callback machines report to.

pub mod handlers;
pub mod middleware;
pub mod routes;

pub use middleware::QueueState;
pub use routes::routes;
