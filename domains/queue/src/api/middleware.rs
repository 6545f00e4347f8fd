//! Queue domain state

use std::sync::Arc;

use runfleet_common::Config;
use runfleet_compute::ComputeService;
use runfleet_machines::{DeploymentResolver, MachineRegistry};
use runfleet_notify::NotificationService;
use runfleet_runs::RunRepository;

use crate::completion::CompletionHandler;
use crate::config::{DispatchConfig, SweeperConfig};
use crate::dispatch::Dispatcher;
use crate::notifications::NotificationTrigger;
use crate::pool::WorkerPool;
use crate::repository::JobStore;
use crate::service::QueueService;
use crate::sweeper::StaleJobSweeper;

/// Stores and collaborators the queue runs against
#[derive(Clone)]
pub struct QueueBackends {
    pub jobs: Arc<dyn JobStore>,
    pub runs: Arc<dyn RunRepository>,
    pub registry: Arc<dyn MachineRegistry>,
    pub deployments: Arc<dyn DeploymentResolver>,
    pub compute: Arc<dyn ComputeService>,
    pub notifications: Arc<dyn NotificationService>,
}

/// Application state for the Queue domain
#[derive(Clone)]
pub struct QueueState {
    pub queue: QueueService,
    pub pool: Arc<WorkerPool>,
    pub sweeper: Arc<StaleJobSweeper>,
    pub completion: CompletionHandler,
    /// Origin recorded on jobs whose caller did not send one
    pub default_origin: String,
}

impl QueueState {
    pub fn new(
        backends: QueueBackends,
        config: &Config,
        dispatch: DispatchConfig,
        sweeper: SweeperConfig,
    ) -> Self {
        let trigger = NotificationTrigger::new(
            backends.notifications.clone(),
            config.webhook_notification_url.clone(),
            config.webhook_authorization_header.clone(),
        );
        let completion = CompletionHandler::new(
            backends.runs.clone(),
            backends.registry.clone(),
            backends.jobs.clone(),
            trigger.clone(),
        );
        let dispatcher = Dispatcher::new(
            backends.deployments.clone(),
            backends.registry.clone(),
            backends.runs.clone(),
            backends.compute.clone(),
            dispatch.strategy,
            &config.api_url,
        );
        let pool = Arc::new(WorkerPool::new(
            backends.jobs.clone(),
            dispatcher,
            trigger.clone(),
            dispatch,
        ));
        let sweeper = Arc::new(StaleJobSweeper::new(
            backends.jobs.clone(),
            backends.runs,
            backends.registry,
            backends.compute,
            completion.clone(),
            trigger,
            sweeper,
        ));

        Self {
            queue: QueueService::new(backends.jobs).with_waker(pool.waker()),
            pool,
            sweeper,
            completion,
            default_origin: config.api_url.clone(),
        }
    }
}
