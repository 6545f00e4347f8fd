//! Repository implementations for the Machines domain
//!
//! Every counter mutation is a single conditional statement against the
//! store. Nothing here caches load in process memory.

pub mod deployments;
pub mod machines;
pub mod memory;

use async_trait::async_trait;
use runfleet_common::Result;
use uuid::Uuid;

use crate::domain::entities::{Deployment, DeploymentTarget, Machine};

pub use deployments::PgDeploymentResolver;
pub use machines::PgMachineRegistry;
pub use memory::InMemoryMachineRegistry;

/// Per-machine admission capacity and load
#[async_trait]
pub trait MachineRegistry: Send + Sync {
    async fn find(&self, id: Uuid) -> Result<Option<Machine>>;

    /// Machines a deployment target expands to, ordered by id
    async fn candidates(&self, target: &DeploymentTarget) -> Result<Vec<Machine>>;

    /// Compare-and-increment against the stored `max_queue_size`.
    /// `false` means the machine is full (or gone) and nothing changed.
    async fn try_reserve(&self, id: Uuid) -> Result<bool>;

    /// Decrement with a floor of zero, recomputing status.
    /// Returns the updated machine, `None` if it does not exist.
    async fn release(&self, id: Uuid) -> Result<Option<Machine>>;

    /// Administrative override of the counter
    async fn sync(&self, id: Uuid, actual_size: i32) -> Result<Option<Machine>>;

    /// Administrative reset to size 0 / idle
    async fn force_idle(&self, id: Uuid) -> Result<Option<Machine>>;
}

/// Maps a deployment to what it runs on
#[async_trait]
pub trait DeploymentResolver: Send + Sync {
    async fn resolve(&self, deployment_id: Uuid) -> Result<Option<Deployment>>;
}
