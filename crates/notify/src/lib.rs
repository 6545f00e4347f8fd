//! Runfleet Notification Service
//!
//! Hands terminal run events to an external delivery subsystem:
//! - HTTP client that POSTs payloads to the delivery endpoint
//! - Mock notification service for testing and development
//! - Configurable provider and delivery URL

pub mod client;
pub mod mock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification configuration error: {0}")]
    Configuration(String),

    #[error("Notification request error: {0}")]
    Request(String),

    #[error("Notification response error: {0}")]
    Response(String),
}

/// Terminal outcome being announced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Success,
    Failed,
}

/// Reference to a job that failed before any run existed for it
pub fn synthetic_job_ref(job_id: Uuid) -> String {
    format!("queue-job-{}", job_id)
}

/// Payload enqueued for delivery.
///
/// `run_id` is either a run id or a synthetic job reference
/// (see [`synthetic_job_ref`]) when the job never produced a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub run_id: String,
    pub status: NotificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub webhook_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_auth_header: Option<String>,
}

/// Notification service configuration
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Provider (http, mock)
    pub provider: String,
    /// Endpoint of the delivery subsystem
    pub delivery_url: String,
}

impl NotifyConfig {
    /// Create notification config from environment variables
    pub fn from_env() -> Result<Self, NotifyError> {
        let provider = std::env::var("NOTIFY_PROVIDER").unwrap_or_else(|_| "mock".to_string());
        let delivery_url = std::env::var("NOTIFY_DELIVERY_URL").unwrap_or_default();

        if provider == "http" && delivery_url.trim().is_empty() {
            return Err(NotifyError::Configuration(
                "NOTIFY_DELIVERY_URL is required for http provider".to_string(),
            ));
        }

        Ok(Self {
            provider,
            delivery_url,
        })
    }
}

/// Notification delivery trait
#[async_trait::async_trait]
pub trait NotificationService: Send + Sync {
    /// Fire-and-forget from the caller's point of view; the error only
    /// reports that the hand-off itself failed.
    async fn enqueue(&self, payload: NotificationPayload) -> Result<(), NotifyError>;
}

/// Factory for creating NotificationService implementations
pub struct NotificationServiceFactory;

impl NotificationServiceFactory {
    pub fn create(config: NotifyConfig) -> Result<Box<dyn NotificationService>, NotifyError> {
        match config.provider.as_str() {
            "http" => {
                tracing::info!("Creating HTTP notification service");
                if config.delivery_url.trim().is_empty() {
                    return Err(NotifyError::Configuration(
                        "NOTIFY_DELIVERY_URL is required for http provider".to_string(),
                    ));
                }
                Ok(Box::new(client::HttpNotificationClient::new(config)))
            }
            "mock" => {
                tracing::info!("Creating mock notification service");
                Ok(Box::new(mock::MockNotificationService::new()))
            }
            provider => Err(NotifyError::Configuration(format!(
                "Unknown notification provider: {}. Supported providers: http, mock",
                provider
            ))),
        }
    }
}
