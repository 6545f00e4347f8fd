//! Dispatch worker pool
//!
//! `concurrency` slots each lease one job at a time, dispatch it, and settle
//! the lease: recorded as dispatched (the job stays active until its run
//! reports in), parked as delayed for another attempt, or failed. The lease
//! is renewed at half its TTL while the machine call is in flight.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use runfleet_machines::Strategy;
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::dispatch::{DispatchError, Dispatcher};
use crate::domain::entities::{DispatchReceipt, Job, Lifecycle};
use crate::notifications::NotificationTrigger;
use crate::repository::JobStore;

/// How one leased job was settled
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Dispatched(DispatchReceipt),
    Delayed {
        retry_count: i32,
        available_at: DateTime<Utc>,
    },
    Failed(String),
    /// Someone else settled the job first; nothing was written
    LeaseLost,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerPoolStatus {
    pub running: bool,
    pub concurrency: usize,
    pub strategy: Strategy,
    /// Slots currently holding a job
    pub in_flight: usize,
}

struct PoolInner {
    jobs: Arc<dyn JobStore>,
    dispatcher: Dispatcher,
    notifications: NotificationTrigger,
    config: DispatchConfig,
    wake: Arc<Notify>,
    in_flight: AtomicUsize,
    instance: String,
}

#[derive(Default)]
struct Slots {
    cancel: Option<CancellationToken>,
    handles: Vec<JoinHandle<()>>,
}

pub struct WorkerPool {
    inner: Arc<PoolInner>,
    slots: Mutex<Slots>,
}

impl WorkerPool {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        dispatcher: Dispatcher,
        notifications: NotificationTrigger,
        config: DispatchConfig,
    ) -> Self {
        let instance = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            inner: Arc::new(PoolInner {
                jobs,
                dispatcher,
                notifications,
                config,
                wake: Arc::new(Notify::new()),
                in_flight: AtomicUsize::new(0),
                instance,
            }),
            slots: Mutex::new(Slots::default()),
        }
    }

    /// Handle the enqueue path uses to wake idle slots
    pub fn waker(&self) -> Arc<Notify> {
        self.inner.wake.clone()
    }

    pub async fn start(&self) -> Lifecycle {
        let mut slots = self.slots.lock().await;
        if slots.cancel.is_some() {
            return Lifecycle::AlreadyRunning;
        }

        let cancel = CancellationToken::new();
        slots.handles = (0..self.inner.config.concurrency)
            .map(|slot| {
                let inner = self.inner.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { inner.run_slot(slot, cancel).await })
            })
            .collect();
        slots.cancel = Some(cancel);

        tracing::info!(
            concurrency = self.inner.config.concurrency,
            strategy = %self.inner.dispatcher.strategy(),
            "Worker pool started"
        );
        Lifecycle::Started
    }

    /// Stop leasing. Without `force` in-flight dispatches finish first;
    /// with it they are aborted and left for the sweeper.
    pub async fn stop(&self, force: bool) -> Lifecycle {
        let mut slots = self.slots.lock().await;
        let Some(cancel) = slots.cancel.take() else {
            return Lifecycle::NotRunning;
        };

        cancel.cancel();
        let handles = std::mem::take(&mut slots.handles);
        if force {
            for handle in &handles {
                handle.abort();
            }
        }
        for handle in handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::error!(error = %e, "Worker slot panicked");
                }
            }
        }
        if force {
            self.inner.in_flight.store(0, Ordering::SeqCst);
        }

        tracing::info!(force, "Worker pool stopped");
        Lifecycle::Stopped
    }

    pub async fn status(&self) -> WorkerPoolStatus {
        let running = self.slots.lock().await.cancel.is_some();
        WorkerPoolStatus {
            running,
            concurrency: self.inner.config.concurrency,
            strategy: self.inner.dispatcher.strategy(),
            in_flight: self.inner.in_flight.load(Ordering::SeqCst),
        }
    }

    /// Lease and settle a single job on the caller's task
    pub async fn process_next(&self) -> runfleet_common::Result<Option<ProcessOutcome>> {
        let worker_id = self.inner.worker_id("manual");
        let leased = self
            .inner
            .jobs
            .lease_next(&worker_id, self.inner.config.lease_ttl, Utc::now())
            .await?;
        match leased {
            Some(job) => Ok(Some(self.inner.process(job).await)),
            None => Ok(None),
        }
    }
}

impl PoolInner {
    fn worker_id(&self, slot: impl std::fmt::Display) -> String {
        format!("{}-{}", self.instance, slot)
    }

    async fn run_slot(&self, slot: usize, cancel: CancellationToken) {
        let worker_id = self.worker_id(slot);
        tracing::debug!(worker_id = %worker_id, "Worker slot started");

        while !cancel.is_cancelled() {
            match self
                .jobs
                .lease_next(&worker_id, self.config.lease_ttl, Utc::now())
                .await
            {
                Ok(Some(job)) => {
                    self.in_flight.fetch_add(1, Ordering::SeqCst);
                    self.process(job).await;
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    continue;
                }
                Ok(None) => {}
                Err(e) => tracing::error!(worker_id = %worker_id, error = %e, "Failed to lease job"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        tracing::debug!(worker_id = %worker_id, "Worker slot stopped");
    }

    async fn process(&self, job: Job) -> ProcessOutcome {
        let Some(token) = job.lease_token else {
            tracing::error!(job_id = %job.id, "Leased job has no lease token");
            return ProcessOutcome::LeaseLost;
        };
        tracing::info!(
            job_id = %job.id,
            deployment_id = %job.deployment_id,
            retry_count = job.retry_count,
            "Processing job"
        );

        match self.dispatch_holding_lease(&job, token).await {
            Ok(receipt) => match self.jobs.mark_dispatched(job.id, token, receipt).await {
                Ok(true) => ProcessOutcome::Dispatched(receipt),
                Ok(false) => {
                    tracing::warn!(job_id = %job.id, run_id = %receipt.run_id, "Lease lost before recording dispatch");
                    ProcessOutcome::LeaseLost
                }
                Err(e) => {
                    // The run exists and will still report in through its callback
                    tracing::error!(job_id = %job.id, error = %e, "Failed to record dispatch");
                    ProcessOutcome::Dispatched(receipt)
                }
            },
            Err(DispatchError::MachineUnavailable { machine, reason }) => {
                tracing::info!(job_id = %job.id, machine = %machine, reason = %reason, "Machine unavailable");
                self.retry_or_fail(&job, token, &machine).await
            }
            Err(DispatchError::Store(e)) => {
                tracing::error!(job_id = %job.id, error = %e, "Store error during dispatch, retrying later");
                self.retry_or_fail(&job, token, "unknown").await
            }
            Err(DispatchError::Fatal(reason)) => self.fail(&job, token, &reason, job.retry_count).await,
        }
    }

    async fn dispatch_holding_lease(
        &self,
        job: &Job,
        token: Uuid,
    ) -> Result<DispatchReceipt, DispatchError> {
        let every = self.config.renew_every();
        let mut renew = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        let dispatch = self.dispatcher.dispatch(job);
        tokio::pin!(dispatch);

        loop {
            tokio::select! {
                result = &mut dispatch => return result,
                _ = renew.tick() => {
                    match self.jobs.renew_lease(job.id, token, self.config.lease_ttl, Utc::now()).await {
                        Ok(true) => tracing::debug!(job_id = %job.id, "Lease renewed"),
                        Ok(false) => tracing::warn!(job_id = %job.id, "Lease no longer held"),
                        Err(e) => tracing::warn!(job_id = %job.id, error = %e, "Failed to renew lease"),
                    }
                }
            }
        }
    }

    /// Count this attempt; park the job or give up once the budget is spent
    async fn retry_or_fail(&self, job: &Job, token: Uuid, machine: &str) -> ProcessOutcome {
        let attempts = job.retry_count.saturating_add(1);
        if attempts > self.config.max_retries {
            let reason = format!(
                "Machine \"{}\" not available after {} retries",
                machine, self.config.max_retries
            );
            return self.fail(job, token, &reason, attempts).await;
        }

        let available_at = Utc::now()
            + chrono::Duration::from_std(self.config.retry_delay)
                .unwrap_or_else(|_| chrono::Duration::seconds(30));
        match self
            .jobs
            .move_to_delayed(job.id, token, attempts, available_at)
            .await
        {
            Ok(true) => {
                tracing::info!(
                    job_id = %job.id,
                    retry_count = attempts,
                    max_retries = self.config.max_retries,
                    %available_at,
                    "Job delayed"
                );
                ProcessOutcome::Delayed {
                    retry_count: attempts,
                    available_at,
                }
            }
            Ok(false) => {
                tracing::warn!(job_id = %job.id, "Lease lost before delaying job");
                ProcessOutcome::LeaseLost
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to delay job");
                ProcessOutcome::LeaseLost
            }
        }
    }

    async fn fail(&self, job: &Job, token: Uuid, reason: &str, retry_count: i32) -> ProcessOutcome {
        let now = Utc::now();
        match self
            .jobs
            .fail_leased(job.id, token, reason, retry_count, now)
            .await
        {
            Ok(true) => {
                tracing::warn!(job_id = %job.id, reason = %reason, "Job failed");
                let mut failed = job.clone();
                failed.finished_at = Some(now);
                self.notifications.job_failed(&failed, reason).await;
                ProcessOutcome::Failed(reason.to_string())
            }
            Ok(false) => {
                tracing::warn!(job_id = %job.id, "Lease lost before failing job");
                ProcessOutcome::LeaseLost
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to mark job failed");
                ProcessOutcome::LeaseLost
            }
        }
    }
}
