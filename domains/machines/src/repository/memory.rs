//! In-memory machine registry and deployment resolver
//!
//! Each operation runs under one mutex, which gives the same all-or-nothing
//! conditional updates as the Postgres statements. Used by local runs and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use runfleet_common::{Error, Result};
use uuid::Uuid;

use super::{DeploymentResolver, MachineRegistry};
use crate::domain::entities::{Deployment, DeploymentTarget, Machine, OperationalStatus};

#[derive(Default)]
struct Tables {
    machines: HashMap<Uuid, Machine>,
    groups: HashMap<Uuid, Vec<Uuid>>,
    deployments: HashMap<Uuid, Deployment>,
}

#[derive(Default)]
pub struct InMemoryMachineRegistry {
    tables: Mutex<Tables>,
    offline: AtomicBool,
}

impl InMemoryMachineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_machine(&self, machine: Machine) {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .machines
            .insert(machine.id, machine);
    }

    pub fn add_group_member(&self, group_id: Uuid, machine_id: Uuid) {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .groups
            .entry(group_id)
            .or_default()
            .push(machine_id);
    }

    pub fn insert_deployment(&self, deployment: Deployment) {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .deployments
            .insert(deployment.id, deployment);
    }

    /// Simulate the backing store being unreachable
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("machine registry is offline".to_string()));
        }
        Ok(self.tables.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn update<F>(&self, id: Uuid, apply: F) -> Result<Option<Machine>>
    where
        F: FnOnce(&mut Machine),
    {
        let mut tables = self.tables()?;
        Ok(tables.machines.get_mut(&id).map(|machine| {
            apply(machine);
            machine.operational_status =
                OperationalStatus::for_queue_size(machine.current_queue_size);
            machine.updated_at = Utc::now();
            machine.clone()
        }))
    }
}

#[async_trait]
impl MachineRegistry for InMemoryMachineRegistry {
    async fn find(&self, id: Uuid) -> Result<Option<Machine>> {
        Ok(self.tables()?.machines.get(&id).cloned())
    }

    async fn candidates(&self, target: &DeploymentTarget) -> Result<Vec<Machine>> {
        let tables = self.tables()?;
        let mut machines: Vec<Machine> = match target {
            DeploymentTarget::Machine(id) => tables.machines.get(id).cloned().into_iter().collect(),
            DeploymentTarget::Group(group_id) => tables
                .groups
                .get(group_id)
                .map(|members| {
                    members
                        .iter()
                        .filter_map(|id| tables.machines.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default(),
        };
        machines.sort_by_key(|m| m.id);
        Ok(machines)
    }

    async fn try_reserve(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables()?;
        let Some(machine) = tables.machines.get_mut(&id) else {
            return Ok(false);
        };
        if !machine.has_capacity() {
            return Ok(false);
        }
        machine.current_queue_size += 1;
        machine.operational_status = OperationalStatus::Busy;
        machine.updated_at = Utc::now();
        Ok(true)
    }

    async fn release(&self, id: Uuid) -> Result<Option<Machine>> {
        self.update(id, |m| m.current_queue_size = (m.current_queue_size - 1).max(0))
    }

    async fn sync(&self, id: Uuid, actual_size: i32) -> Result<Option<Machine>> {
        self.update(id, |m| m.current_queue_size = actual_size.max(0))
    }

    async fn force_idle(&self, id: Uuid) -> Result<Option<Machine>> {
        self.update(id, |m| m.current_queue_size = 0)
    }
}

#[async_trait]
impl DeploymentResolver for InMemoryMachineRegistry {
    async fn resolve(&self, deployment_id: Uuid) -> Result<Option<Deployment>> {
        Ok(self.tables()?.deployments.get(&deployment_id).cloned())
    }
}
