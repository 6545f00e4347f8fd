//! Notification trigger for terminal outcomes
//!
//! Callers invoke this only on the write that actually moved a run or job
//! into a terminal state, so each outcome is announced at most once.
//! Delivery problems are logged and never reach the caller.

use std::sync::Arc;

use chrono::Utc;
use runfleet_notify::{synthetic_job_ref, NotificationPayload, NotificationService, NotificationStatus};
use runfleet_runs::{Run, RunStatus};

use crate::domain::entities::Job;

#[derive(Clone)]
pub struct NotificationTrigger {
    service: Arc<dyn NotificationService>,
    webhook_url: Option<String>,
    auth_header: Option<String>,
}

impl NotificationTrigger {
    /// Without a webhook URL every trigger is a no-op
    pub fn new(
        service: Arc<dyn NotificationService>,
        webhook_url: Option<String>,
        auth_header: Option<String>,
    ) -> Self {
        Self {
            service,
            webhook_url,
            auth_header,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// A run just reached success or failed
    pub async fn run_finished(&self, run: &Run) {
        let status = match run.status {
            RunStatus::Success => NotificationStatus::Success,
            _ => NotificationStatus::Failed,
        };
        let error = match status {
            NotificationStatus::Failed => run.error_message.clone(),
            NotificationStatus::Success => None,
        };

        self.send(|webhook_url, webhook_auth_header| NotificationPayload {
            run_id: run.id.to_string(),
            status,
            job_id: run.job_id,
            deployment_id: Some(run.deployment_id),
            error,
            completed_at: run.ended_at.unwrap_or_else(Utc::now),
            webhook_url,
            webhook_auth_header,
        })
        .await;
    }

    /// A job failed before any run existed for it
    pub async fn job_failed(&self, job: &Job, reason: &str) {
        self.send(|webhook_url, webhook_auth_header| NotificationPayload {
            run_id: synthetic_job_ref(job.id),
            status: NotificationStatus::Failed,
            job_id: Some(job.id),
            deployment_id: Some(job.deployment_id),
            error: Some(reason.to_string()),
            completed_at: job.finished_at.unwrap_or_else(Utc::now),
            webhook_url,
            webhook_auth_header,
        })
        .await;
    }

    async fn send<F>(&self, build: F)
    where
        F: FnOnce(String, Option<String>) -> NotificationPayload,
    {
        let Some(webhook_url) = self.webhook_url.clone() else {
            tracing::debug!("No webhook configured, skipping notification");
            return;
        };

        let payload = build(webhook_url, self.auth_header.clone());
        let run_ref = payload.run_id.clone();
        match self.service.enqueue(payload).await {
            Ok(()) => tracing::info!(run_ref = %run_ref, "Notification enqueued"),
            Err(e) => tracing::error!(run_ref = %run_ref, error = %e, "Failed to enqueue notification"),
        }
    }
}
