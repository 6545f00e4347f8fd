//! API layer for the Machines domain
//!
//! Administrative endpoints for inspecting and reconciling machine counters.

pub mod handlers;
pub mod middleware;
pub mod routes;

pub use middleware::MachinesState;
pub use routes::routes;
