//! HTTP Compute Client Implementation
//!
//! POSTs run submissions to `{base_url}/run` and interrupts to
//! `{base_url}/interrupt`, classifying every failure so the dispatcher can
//! tell "machine unavailable" apart from "request is broken".

use std::time::Duration;

use reqwest::StatusCode;
use uuid::Uuid;

use crate::{ComputeConfig, ComputeError, ComputeService, MachineEndpoint, RunSubmission};

/// Real HTTP client for machine endpoints
pub struct HttpComputeClient {
    http: reqwest::Client,
    dispatch_timeout: Duration,
    interrupt_timeout: Duration,
}

impl HttpComputeClient {
    pub fn new(config: &ComputeConfig) -> Result<Self, ComputeError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.dispatch_timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| ComputeError::Configuration(e.to_string()))?;

        Ok(Self {
            http,
            dispatch_timeout: config.dispatch_timeout,
            interrupt_timeout: config.interrupt_timeout,
        })
    }

    fn request(
        &self,
        endpoint: &MachineEndpoint,
        path: &str,
        timeout: Duration,
    ) -> reqwest::RequestBuilder {
        let builder = self.http.post(endpoint.url(path)).timeout(timeout);
        match &endpoint.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

fn classify_transport(err: reqwest::Error) -> ComputeError {
    if err.is_timeout() {
        ComputeError::Timeout(err.to_string())
    } else {
        ComputeError::Unreachable(err.to_string())
    }
}

async fn classify_status(response: reqwest::Response) -> Result<(), ComputeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read response body".to_string());
    let detail = format!("machine returned {}: {}", status, body);

    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            Err(ComputeError::MalformedRequest(detail))
        }
        _ => Err(ComputeError::Rejected(detail)),
    }
}

#[async_trait::async_trait]
impl ComputeService for HttpComputeClient {
    async fn submit_run(
        &self,
        endpoint: &MachineEndpoint,
        submission: &RunSubmission,
    ) -> Result<(), ComputeError> {
        let response = self
            .request(endpoint, "run", self.dispatch_timeout)
            .json(submission)
            .send()
            .await
            .map_err(classify_transport)?;

        classify_status(response).await?;

        tracing::debug!(
            machine_id = %endpoint.machine_id,
            run_id = %submission.run_id,
            "Machine accepted run"
        );
        Ok(())
    }

    async fn interrupt(
        &self,
        endpoint: &MachineEndpoint,
        run_id: Uuid,
    ) -> Result<(), ComputeError> {
        let response = self
            .request(endpoint, "interrupt", self.interrupt_timeout)
            .json(&serde_json::json!({ "run_id": run_id }))
            .send()
            .await
            .map_err(classify_transport)?;

        classify_status(response).await
    }
}
