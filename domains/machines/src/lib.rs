//! Machines domain: machine registry, deployments, load balancing

pub mod api;
pub mod domain;
pub mod repository;

// Re-export domain types at the crate root for convenience
pub use api::MachinesState;
pub use domain::balancer::{LoadBalancer, Strategy};
pub use domain::entities::*;
pub use repository::{
    DeploymentResolver, InMemoryMachineRegistry, MachineRegistry, PgDeploymentResolver,
    PgMachineRegistry,
};
