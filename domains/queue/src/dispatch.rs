//! One dispatch attempt: resolve, select, reserve, create the run, forward
//!
//! A reservation is rolled back (run deleted, machine released) whenever the
//! machine does not accept, so a failed attempt leaves counters where it
//! found them.

use std::sync::Arc;

use runfleet_common::Error;
use runfleet_compute::{ComputeService, RunSubmission};
use runfleet_machines::{
    DeploymentResolver, DeploymentTarget, LoadBalancer, Machine, MachineRegistry, Strategy,
};
use runfleet_runs::{Run, RunRepository};
use thiserror::Error;

use crate::domain::entities::{validate_inputs, DispatchReceipt, Job};

/// Path machines report run status to
pub const RUN_CALLBACK_PATH: &str = "/api/update-run";

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Nothing could take the job right now; retry later
    #[error("Machine \"{machine}\" not available: {reason}")]
    MachineUnavailable { machine: String, reason: String },

    /// Retrying would fail the same way
    #[error("{0}")]
    Fatal(String),

    #[error(transparent)]
    Store(#[from] Error),
}

pub struct Dispatcher {
    deployments: Arc<dyn DeploymentResolver>,
    registry: Arc<dyn MachineRegistry>,
    runs: Arc<dyn RunRepository>,
    compute: Arc<dyn ComputeService>,
    balancer: LoadBalancer,
    callback_url: String,
}

impl Dispatcher {
    pub fn new(
        deployments: Arc<dyn DeploymentResolver>,
        registry: Arc<dyn MachineRegistry>,
        runs: Arc<dyn RunRepository>,
        compute: Arc<dyn ComputeService>,
        strategy: Strategy,
        api_url: &str,
    ) -> Self {
        Self {
            deployments,
            registry,
            runs,
            compute,
            balancer: LoadBalancer::new(strategy),
            callback_url: format!("{}{}", api_url.trim_end_matches('/'), RUN_CALLBACK_PATH),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.balancer.strategy()
    }

    pub async fn dispatch(&self, job: &Job) -> Result<DispatchReceipt, DispatchError> {
        validate_inputs(&job.inputs.0).map_err(|e| DispatchError::Fatal(e.to_string()))?;

        let deployment = self
            .deployments
            .resolve(job.deployment_id)
            .await?
            .ok_or_else(|| {
                DispatchError::Fatal(format!("Deployment {} not found", job.deployment_id))
            })?;

        let candidates = self.registry.candidates(&deployment.target).await?;
        if candidates.is_empty() {
            return Err(DispatchError::Fatal(match deployment.target {
                DeploymentTarget::Machine(id) => format!("Machine {} not found", id),
                DeploymentTarget::Group(id) => format!("Machine group {} has no machines", id),
            }));
        }

        let machine = self
            .balancer
            .select(&candidates)
            .cloned()
            .ok_or_else(|| DispatchError::MachineUnavailable {
                machine: target_label(&deployment.target, &candidates),
                reason: "all candidates at capacity".to_string(),
            })?;

        if !self.registry.try_reserve(machine.id).await? {
            return Err(DispatchError::MachineUnavailable {
                machine: machine.name,
                reason: "admission limit reached".to_string(),
            });
        }

        let run = Run::dispatched(deployment.id, machine.id, job.id, job.origin.clone());
        if let Err(e) = self.runs.create(&run).await {
            self.release(&machine).await;
            return Err(e.into());
        }

        let submission = RunSubmission {
            run_id: run.id,
            deployment_id: deployment.id,
            inputs: job.inputs.0.clone(),
            callback_url: self.callback_url.clone(),
        };

        match self.compute.submit_run(&machine.endpoint(), &submission).await {
            Ok(()) => {
                tracing::info!(
                    job_id = %job.id,
                    run_id = %run.id,
                    machine_id = %machine.id,
                    machine = %machine.name,
                    "Machine accepted run"
                );
                Ok(DispatchReceipt {
                    run_id: run.id,
                    machine_id: machine.id,
                })
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job.id,
                    machine_id = %machine.id,
                    error = %e,
                    "Machine did not accept run, rolling back"
                );
                if let Err(delete_err) = self.runs.delete(run.id).await {
                    tracing::error!(run_id = %run.id, error = %delete_err, "Failed to delete orphaned run");
                }
                self.release(&machine).await;

                if e.is_retryable() {
                    Err(DispatchError::MachineUnavailable {
                        machine: machine.name,
                        reason: e.to_string(),
                    })
                } else {
                    Err(DispatchError::Fatal(e.to_string()))
                }
            }
        }
    }

    async fn release(&self, machine: &Machine) {
        if let Err(e) = self.registry.release(machine.id).await {
            tracing::error!(machine_id = %machine.id, error = %e, "Failed to release machine reservation");
        }
    }
}

/// Name used in "not available" messages
fn target_label(target: &DeploymentTarget, candidates: &[Machine]) -> String {
    match (target, candidates) {
        (DeploymentTarget::Machine(_), [only]) => only.name.clone(),
        (DeploymentTarget::Machine(id), _) => id.to_string(),
        (DeploymentTarget::Group(id), _) => format!("group {}", id),
    }
}
