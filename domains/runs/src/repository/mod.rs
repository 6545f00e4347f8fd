//! Repository implementations for the Runs domain

pub mod memory;
pub mod runs;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use runfleet_common::Result;
use uuid::Uuid;

use crate::domain::entities::{Run, RunOutput, RunStatus};

pub use memory::InMemoryRunRepository;
pub use runs::PgRunRepository;

/// Result of a conditional status write
#[derive(Debug, Clone, PartialEq)]
pub enum StatusWrite {
    /// The write landed. `completed` is true only for the single write that
    /// moved the run into a terminal status.
    Applied { run: Run, completed: bool },
    /// The run was already terminal; nothing changed
    AlreadyTerminal(Run),
    NotFound,
}

impl StatusWrite {
    /// Whether this write is the one that should trigger terminal side effects
    pub fn completed(&self) -> bool {
        matches!(self, Self::Applied { completed: true, .. })
    }

    pub fn run(&self) -> Option<&Run> {
        match self {
            Self::Applied { run, .. } | Self::AlreadyTerminal(run) => Some(run),
            Self::NotFound => None,
        }
    }
}

#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn create(&self, run: &Run) -> Result<Run>;

    async fn find(&self, id: Uuid) -> Result<Option<Run>>;

    /// Remove a run that never reached its machine
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Write `status` unless the run is already terminal. `ended_at` is set
    /// to `at` on the transition into a terminal status and never again.
    async fn update_status(
        &self,
        id: Uuid,
        status: RunStatus,
        error_message: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<StatusWrite>;

    async fn add_output(&self, run_id: Uuid, data: serde_json::Value) -> Result<RunOutput>;

    async fn outputs(&self, run_id: Uuid) -> Result<Vec<RunOutput>>;
}
