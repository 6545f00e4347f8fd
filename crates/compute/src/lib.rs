//! Runfleet Compute Service
//!
//! Talks to the remote execution nodes ("machines") that actually run workloads:
//! - HTTP client forwarding runs to `{base_url}/run` and interrupts to `{base_url}/interrupt`
//! - Mock compute service for testing and development
//! - Configurable provider and per-call network timeouts

pub mod client;
pub mod mock;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComputeError {
    #[error("Compute configuration error: {0}")]
    Configuration(String),

    #[error("Machine rejected the run: {0}")]
    Rejected(String),

    #[error("Machine unreachable: {0}")]
    Unreachable(String),

    #[error("Machine did not answer in time: {0}")]
    Timeout(String),

    #[error("Machine refused a malformed request: {0}")]
    MalformedRequest(String),
}

impl ComputeError {
    /// Rejections and transport failures mean "try another time", a malformed
    /// request will fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Rejected(_) | Self::Unreachable(_) | Self::Timeout(_)
        )
    }
}

/// Where a machine can be reached
#[derive(Clone, PartialEq)]
pub struct MachineEndpoint {
    pub machine_id: Uuid,
    pub base_url: String,
    pub auth_token: Option<String>,
}

impl std::fmt::Debug for MachineEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineEndpoint")
            .field("machine_id", &self.machine_id)
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl MachineEndpoint {
    /// Join a path onto the machine's base URL
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Request forwarded to a machine to start one run.
/// The machine reports progress by POSTing to `callback_url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSubmission {
    pub run_id: Uuid,
    pub deployment_id: Uuid,
    pub inputs: serde_json::Value,
    pub callback_url: String,
}

/// Compute service configuration
#[derive(Debug, Clone)]
pub struct ComputeConfig {
    pub provider: String,
    /// Upper bound on waiting for a machine to accept or reject a run
    pub dispatch_timeout: Duration,
    /// Upper bound on a best-effort interrupt call
    pub interrupt_timeout: Duration,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            provider: "http".to_string(),
            dispatch_timeout: Duration::from_secs(30),
            interrupt_timeout: Duration::from_secs(10),
        }
    }
}

impl ComputeConfig {
    /// Create compute config from environment variables
    pub fn from_env() -> Result<Self, ComputeError> {
        let defaults = Self::default();
        let provider = std::env::var("COMPUTE_PROVIDER").unwrap_or(defaults.provider);
        let dispatch_timeout = duration_ms_var("DISPATCH_TIMEOUT", defaults.dispatch_timeout)?;
        let interrupt_timeout = duration_ms_var("INTERRUPT_TIMEOUT", defaults.interrupt_timeout)?;

        Ok(Self {
            provider,
            dispatch_timeout,
            interrupt_timeout,
        })
    }
}

fn duration_ms_var(key: &str, default: Duration) -> Result<Duration, ComputeError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ComputeError::Configuration(format!("{key} must be milliseconds, got '{raw}'"))),
        Err(_) => Ok(default),
    }
}

/// Compute service trait for different machine backends
#[async_trait::async_trait]
pub trait ComputeService: Send + Sync {
    /// Forward a run to a machine. `Ok` means the machine accepted it;
    /// the outcome arrives later through the run callback.
    async fn submit_run(
        &self,
        endpoint: &MachineEndpoint,
        submission: &RunSubmission,
    ) -> Result<(), ComputeError>;

    /// Ask a machine to abandon whatever it is running for `run_id`.
    /// Idempotent on the machine side; callers treat failure as non-fatal.
    async fn interrupt(&self, endpoint: &MachineEndpoint, run_id: Uuid)
        -> Result<(), ComputeError>;
}

/// Factory for creating ComputeService implementations
pub struct ComputeServiceFactory;

impl ComputeServiceFactory {
    pub fn create(config: ComputeConfig) -> Result<Box<dyn ComputeService>, ComputeError> {
        match config.provider.as_str() {
            "http" => {
                tracing::info!(
                    dispatch_timeout_ms = config.dispatch_timeout.as_millis() as u64,
                    interrupt_timeout_ms = config.interrupt_timeout.as_millis() as u64,
                    "Creating HTTP compute service"
                );
                Ok(Box::new(client::HttpComputeClient::new(&config)?))
            }
            "mock" => {
                tracing::info!("Creating mock compute service");
                Ok(Box::new(mock::MockComputeService::new()))
            }
            provider => Err(ComputeError::Configuration(format!(
                "Unknown compute provider: {}. Supported providers: http, mock",
                provider
            ))),
        }
    }
}
