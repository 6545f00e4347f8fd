//! Queue domain: job store, dispatch worker pool, stale job sweeper,
//! run completion and notifications

pub mod api;
pub mod completion;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod notifications;
pub mod pool;
pub mod repository;
pub mod service;
pub mod sweeper;

// Re-export domain types at the crate root for convenience
pub use api::QueueState;
pub use completion::{CompletionHandler, RunUpdate, RunUpdateOutcome};
pub use config::{DispatchConfig, SweeperConfig};
pub use dispatch::{DispatchError, Dispatcher};
pub use domain::entities::*;
pub use domain::state::{JobEvent, JobState, JobStateMachine};
pub use notifications::NotificationTrigger;
pub use pool::{ProcessOutcome, WorkerPool, WorkerPoolStatus};
pub use repository::{InMemoryJobStore, JobStore, PgJobStore};
pub use service::{CleanTarget, QueueService, QueueSnapshot, RemoveResult};
pub use sweeper::{StaleJobSweeper, SweepAction, SweepReport, SweepResult, SweeperStatus};
