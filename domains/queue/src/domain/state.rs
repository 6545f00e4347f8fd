//! State machine for queue jobs
//!
//! ```text
//! waiting ──lease──▶ active ──complete──▶ completed
//! delayed ──lease──▶ active ──fail──────▶ failed
//!                    active ──retry─────▶ delayed
//! ```
//!
//! `active` is the only state that carries a lease token.

use runfleet_common::StateError;
use serde::{Deserialize, Serialize};

/// Job state
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "queue_job_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        Self::Waiting,
        Self::Delayed,
        Self::Active,
        Self::Completed,
        Self::Failed,
    ];

    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// States a worker may lease from
    pub fn is_leasable(&self) -> bool {
        matches!(self, Self::Waiting | Self::Delayed)
    }

    /// Get all valid next states from current state
    pub fn valid_transitions(&self) -> &'static [JobState] {
        match self {
            Self::Waiting | Self::Delayed => &[Self::Active],
            Self::Active => &[Self::Delayed, Self::Completed, Self::Failed],
            Self::Completed | Self::Failed => &[],
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Delayed => write!(f, "delayed"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.to_string() == s)
            .ok_or_else(|| StateError::GuardFailed(format!("unknown job state '{}'", s)))
    }
}

/// Events that trigger job state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// A worker slot takes the lease
    Lease,
    /// Machine unavailable; park the job until its delay elapses
    Retry,
    /// The run finished successfully
    Complete,
    /// Dispatch failed for good, the run failed, or the job went stale
    Fail,
}

impl std::fmt::Display for JobEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lease => write!(f, "lease"),
            Self::Retry => write!(f, "retry"),
            Self::Complete => write!(f, "complete"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// Job state machine
pub struct JobStateMachine;

impl JobStateMachine {
    /// Attempt a state transition
    pub fn transition(current: JobState, event: JobEvent) -> Result<JobState, StateError> {
        if current.is_terminal() {
            return Err(StateError::TerminalState(current.to_string()));
        }

        let next = match (&current, &event) {
            (JobState::Waiting | JobState::Delayed, JobEvent::Lease) => JobState::Active,
            (JobState::Active, JobEvent::Retry) => JobState::Delayed,
            (JobState::Active, JobEvent::Complete) => JobState::Completed,
            (JobState::Active, JobEvent::Fail) => JobState::Failed,
            _ => {
                return Err(StateError::InvalidTransition {
                    from: current.to_string(),
                    event: event.to_string(),
                });
            }
        };

        Ok(next)
    }
}
