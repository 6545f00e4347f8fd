//! Mock Notification Service Implementation
//!
//! Stores payloads in memory for test assertions.
//! Thread-safe via `Arc<Mutex<>>`.

use crate::{NotificationPayload, NotificationService, NotifyError};
use std::sync::{Arc, Mutex};

/// Mock notification service that records payloads for test assertions.
#[derive(Debug, Clone, Default)]
pub struct MockNotificationService {
    payloads: Arc<Mutex<Vec<NotificationPayload>>>,
}

impl MockNotificationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return all recorded payloads.
    pub fn recorded(&self) -> Vec<NotificationPayload> {
        self.payloads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Payloads recorded for one run reference
    pub fn recorded_for(&self, run_id: &str) -> Vec<NotificationPayload> {
        self.recorded()
            .into_iter()
            .filter(|p| p.run_id == run_id)
            .collect()
    }

    /// Clear all recorded payloads.
    pub fn reset(&self) {
        self.payloads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[async_trait::async_trait]
impl NotificationService for MockNotificationService {
    async fn enqueue(&self, payload: NotificationPayload) -> Result<(), NotifyError> {
        tracing::debug!(run_id = %payload.run_id, status = ?payload.status, "Mock notify: recording payload");
        self.payloads
            .lock()
            .map_err(|e| NotifyError::Request(format!("payload lock poisoned: {e}")))?
            .push(payload);
        Ok(())
    }
}
