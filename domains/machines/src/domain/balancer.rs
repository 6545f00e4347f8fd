//! Load balancing across a deployment's candidate machines
//!
//! Selection is a pure function of the candidate snapshot plus, for
//! round-robin, the last machine this balancer handed out. Capacity is only
//! pre-filtered here; the registry's conditional reserve is what enforces it.

use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::entities::Machine;
use runfleet_common::Error;

/// Load balancing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[default]
    LeastLoad,
    RoundRobin,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LeastLoad => write!(f, "least-load"),
            Self::RoundRobin => write!(f, "round-robin"),
        }
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "least-load" => Ok(Self::LeastLoad),
            "round-robin" => Ok(Self::RoundRobin),
            other => Err(Error::Validation(format!(
                "Unknown load balancer strategy: {}. Supported: least-load, round-robin",
                other
            ))),
        }
    }
}

/// Candidate with the smallest queue, ties broken by ascending id
pub fn least_loaded(candidates: &[Machine]) -> Option<&Machine> {
    candidates
        .iter()
        .filter(|m| m.has_capacity())
        .min_by_key(|m| (m.current_queue_size, m.id))
}

/// First eligible candidate strictly after `last` in ascending-id order,
/// wrapping around to the start.
pub fn next_in_rotation(candidates: &[Machine], last: Option<Uuid>) -> Option<&Machine> {
    let mut ordered: Vec<&Machine> = candidates.iter().filter(|m| m.has_capacity()).collect();
    ordered.sort_by_key(|m| m.id);

    let after_last = last.and_then(|last| ordered.iter().find(|m| m.id > last).copied());
    after_last.or_else(|| ordered.first().copied())
}

/// Stateful selector; round-robin position lives as long as the balancer.
#[derive(Debug, Default)]
pub struct LoadBalancer {
    strategy: Strategy,
    last: Mutex<Option<Uuid>>,
}

impl LoadBalancer {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            last: Mutex::new(None),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Pick a machine, or `None` when no candidate currently has room
    pub fn select<'a>(&self, candidates: &'a [Machine]) -> Option<&'a Machine> {
        match self.strategy {
            Strategy::LeastLoad => least_loaded(candidates),
            Strategy::RoundRobin => {
                let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
                let chosen = next_in_rotation(candidates, *last)?;
                *last = Some(chosen.id);
                Some(chosen)
            }
        }
    }
}
