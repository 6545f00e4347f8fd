//! Mock Compute Service Implementation
//!
//! Programmable mock for testing dispatch workflows:
//! - `MockComputeService`: configurable mock with request recording
//! - `MockComputeBehavior`: controls submit/interrupt outcomes, optionally per machine
//! - `MockOutcome`: Accept, Reject, Unreachable, or Malformed

use crate::{ComputeError, ComputeService, MachineEndpoint, RunSubmission};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

/// What a mocked machine answers
#[derive(Debug, Clone, Default, PartialEq)]
pub enum MockOutcome {
    /// Machine accepts the call
    #[default]
    Accept,
    /// Machine answers with a non-2xx status
    Reject,
    /// Machine cannot be reached
    Unreachable,
    /// Machine refuses the request as malformed
    Malformed,
}

impl MockOutcome {
    fn into_result(self, what: &str) -> Result<(), ComputeError> {
        match self {
            Self::Accept => Ok(()),
            Self::Reject => Err(ComputeError::Rejected(format!("mock {what} rejected"))),
            Self::Unreachable => Err(ComputeError::Unreachable(format!(
                "mock {what}: connection refused"
            ))),
            Self::Malformed => Err(ComputeError::MalformedRequest(format!(
                "mock {what}: invalid payload"
            ))),
        }
    }
}

/// Programmable behavior for the mock compute service
#[derive(Debug, Default)]
pub struct MockComputeBehavior {
    submit: RwLock<MockOutcome>,
    interrupt: RwLock<MockOutcome>,
    per_machine: RwLock<HashMap<Uuid, MockOutcome>>,
}

impl MockComputeBehavior {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcome of every `submit_run` without a per-machine override
    pub fn set_submit_outcome(&self, outcome: MockOutcome) {
        *self.submit.write().unwrap_or_else(|e| e.into_inner()) = outcome;
    }

    /// Outcome of every `interrupt`
    pub fn set_interrupt_outcome(&self, outcome: MockOutcome) {
        *self.interrupt.write().unwrap_or_else(|e| e.into_inner()) = outcome;
    }

    /// Override the submit outcome for one machine
    pub fn set_machine_outcome(&self, machine_id: Uuid, outcome: MockOutcome) {
        self.per_machine
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(machine_id, outcome);
    }

    /// Reset to default behavior
    pub fn reset(&self) {
        self.set_submit_outcome(MockOutcome::Accept);
        self.set_interrupt_outcome(MockOutcome::Accept);
        self.per_machine
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn submit_outcome_for(&self, machine_id: Uuid) -> MockOutcome {
        let overrides = self.per_machine.read().unwrap_or_else(|e| e.into_inner());
        match overrides.get(&machine_id) {
            Some(outcome) => outcome.clone(),
            None => self.submit.read().unwrap_or_else(|e| e.into_inner()).clone(),
        }
    }

    fn interrupt_outcome(&self) -> MockOutcome {
        self.interrupt
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// A recorded submission for test assertions
#[derive(Debug, Clone)]
pub struct RecordedSubmission {
    pub machine_id: Uuid,
    pub submission: RunSubmission,
    pub accepted: bool,
}

/// A recorded interrupt for test assertions
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedInterrupt {
    pub machine_id: Uuid,
    pub run_id: Uuid,
}

/// Mock compute service with programmable behavior
#[derive(Debug, Clone, Default)]
pub struct MockComputeService {
    behavior: Arc<MockComputeBehavior>,
    submissions: Arc<Mutex<Vec<RecordedSubmission>>>,
    interrupts: Arc<Mutex<Vec<RecordedInterrupt>>>,
}

impl MockComputeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: Arc<MockComputeBehavior>) -> Self {
        Self {
            behavior,
            ..Self::default()
        }
    }

    /// Shared behavior handle for reconfiguring mid-test
    pub fn behavior(&self) -> &Arc<MockComputeBehavior> {
        &self.behavior
    }

    pub fn recorded_submissions(&self) -> Vec<RecordedSubmission> {
        self.submissions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn recorded_interrupts(&self) -> Vec<RecordedInterrupt> {
        self.interrupts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Clear history
    pub fn reset_history(&self) {
        self.submissions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.interrupts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[async_trait::async_trait]
impl ComputeService for MockComputeService {
    async fn submit_run(
        &self,
        endpoint: &MachineEndpoint,
        submission: &RunSubmission,
    ) -> Result<(), ComputeError> {
        let outcome = self.behavior.submit_outcome_for(endpoint.machine_id);
        tracing::info!(
            machine_id = %endpoint.machine_id,
            run_id = %submission.run_id,
            ?outcome,
            "Mock compute: received run"
        );

        self.submissions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedSubmission {
                machine_id: endpoint.machine_id,
                submission: submission.clone(),
                accepted: outcome == MockOutcome::Accept,
            });

        outcome.into_result("submit")
    }

    async fn interrupt(
        &self,
        endpoint: &MachineEndpoint,
        run_id: Uuid,
    ) -> Result<(), ComputeError> {
        self.interrupts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedInterrupt {
                machine_id: endpoint.machine_id,
                run_id,
            });

        self.behavior.interrupt_outcome().into_result("interrupt")
    }
}
