//! Machines domain state

use crate::repository::MachineRegistry;
use std::sync::Arc;

/// Application state for the Machines domain
#[derive(Clone)]
pub struct MachinesState {
    pub registry: Arc<dyn MachineRegistry>,
}
