//! Runfleet application composition root
//!
//! Composes the domain routers into a single application and wires the
//! Postgres stores and collaborator clients behind them.

use std::sync::Arc;

use axum::Router;
use runfleet_common::Config;
use runfleet_compute::{ComputeConfig, ComputeServiceFactory};
use runfleet_machines::{MachinesState, PgDeploymentResolver, PgMachineRegistry};
use runfleet_notify::{NotificationServiceFactory, NotifyConfig};
use runfleet_queue::api::middleware::QueueBackends;
use runfleet_queue::{DispatchConfig, PgJobStore, QueueState, SweeperConfig};
use runfleet_runs::PgRunRepository;
use sqlx::PgPool;

/// Router plus the handles the binary needs for background services
pub struct Application {
    pub router: Router,
    pub queue: QueueState,
}

/// Build the application against Postgres and the configured collaborators
pub async fn create_app(config: &Config, pool: PgPool) -> Result<Application, anyhow::Error> {
    let registry = Arc::new(PgMachineRegistry::new(pool.clone()));

    let compute = ComputeServiceFactory::create(ComputeConfig::from_env()?)?;
    let notifications = NotificationServiceFactory::create(NotifyConfig::from_env()?)?;
    if config.webhook_notification_url.is_none() {
        tracing::warn!("WEBHOOK_NOTIFICATION_URL not set, run notifications are disabled");
    }

    let backends = QueueBackends {
        jobs: Arc::new(PgJobStore::new(pool.clone())),
        runs: Arc::new(PgRunRepository::new(pool.clone())),
        registry: registry.clone(),
        deployments: Arc::new(PgDeploymentResolver::new(pool)),
        compute: Arc::from(compute),
        notifications: Arc::from(notifications),
    };

    let queue = QueueState::new(
        backends,
        config,
        DispatchConfig::from_env()?,
        SweeperConfig::from_env(),
    );
    let machines = MachinesState { registry };

    Ok(Application {
        router: compose(queue.clone(), machines),
        queue,
    })
}

/// Compose domain routers with shared infrastructure routes
pub fn compose(queue: QueueState, machines: MachinesState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health_check))
        .route(
            "/",
            axum::routing::get(|| async { "Runfleet API v0.0.1-SNAPSHOT" }),
        )
        .merge(runfleet_queue::api::routes().with_state(queue))
        .merge(runfleet_machines::api::routes().with_state(machines))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
