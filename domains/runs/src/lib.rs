//! Runs domain: run records, run status state machine, run outputs

pub mod domain;
pub mod repository;

// Re-export domain types at the crate root for convenience
pub use domain::entities::*;
pub use domain::state::RunStateMachine;
pub use repository::{InMemoryRunRepository, PgRunRepository, RunRepository, StatusWrite};
