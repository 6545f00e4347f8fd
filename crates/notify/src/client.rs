//! Notification HTTP Client Implementation
//!
//! POSTs each payload as JSON to the configured delivery endpoint.

use std::time::Duration;

use crate::{NotificationPayload, NotificationService, NotifyConfig, NotifyError};

/// Real HTTP client for the notification delivery subsystem
pub struct HttpNotificationClient {
    http: reqwest::Client,
    delivery_url: String,
}

impl HttpNotificationClient {
    pub fn new(config: NotifyConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            delivery_url: config.delivery_url,
        }
    }
}

#[async_trait::async_trait]
impl NotificationService for HttpNotificationClient {
    async fn enqueue(&self, payload: NotificationPayload) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(&self.delivery_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read response body".to_string());
            return Err(NotifyError::Response(format!(
                "Delivery endpoint returned {}: {}",
                status, body
            )));
        }

        tracing::debug!(run_id = %payload.run_id, "Notification enqueued");
        Ok(())
    }
}
