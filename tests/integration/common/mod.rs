//! Common test utilities and fixtures for integration tests
//!
//! Every test app runs against the in-memory stores and the mock compute and
//! notification clients, so no database or network is needed. The Postgres
//! store tests connect through [`test_pool`] instead.

use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, http::Request, Router};
use runfleet_common::Config;
use runfleet_compute::mock::MockComputeService;
use runfleet_machines::{
    Deployment, DeploymentTarget, InMemoryMachineRegistry, Machine, MachineRegistry, MachinesState,
};
use runfleet_notify::mock::MockNotificationService;
use runfleet_queue::api::middleware::QueueBackends;
use runfleet_queue::{
    CallerIdentity, DispatchConfig, InMemoryJobStore, Job, JobStore, QueueState, SweeperConfig,
};
use runfleet_runs::InMemoryRunRepository;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

pub const WEBHOOK_URL: &str = "https://hooks.runfleet.test/notify";

pub fn test_config() -> Config {
    Config {
        database_url: String::new(),
        api_url: "http://runfleet.test".to_string(),
        webhook_notification_url: Some(WEBHOOK_URL.to_string()),
        webhook_authorization_header: Some("Bearer test-hook".to_string()),
        auto_start_worker: false,
        auto_start_sweeper: false,
        rust_log: "runfleet=debug".to_string(),
        log_format: "pretty".to_string(),
        port: 0,
    }
}

/// Dispatch settings that never sleep between retries
pub fn fast_dispatch(max_retries: i32) -> DispatchConfig {
    DispatchConfig {
        concurrency: 4,
        max_retries,
        retry_delay: Duration::ZERO,
        poll_interval: Duration::from_millis(5),
        ..DispatchConfig::default()
    }
}

/// Test application wired to in-memory backends
#[allow(dead_code)]
pub struct TestApp {
    pub state: QueueState,
    pub jobs: Arc<InMemoryJobStore>,
    pub runs: Arc<InMemoryRunRepository>,
    pub registry: Arc<InMemoryMachineRegistry>,
    pub compute: Arc<MockComputeService>,
    pub notify: Arc<MockNotificationService>,
}

#[allow(dead_code)]
impl TestApp {
    pub fn new() -> Self {
        Self::with_configs(fast_dispatch(200), SweeperConfig::default())
    }

    pub fn with_configs(dispatch: DispatchConfig, sweeper: SweeperConfig) -> Self {
        let jobs = Arc::new(InMemoryJobStore::new());
        let runs = Arc::new(InMemoryRunRepository::new());
        let registry = Arc::new(InMemoryMachineRegistry::new());
        let compute = Arc::new(MockComputeService::new());
        let notify = Arc::new(MockNotificationService::new());

        let state = QueueState::new(
            QueueBackends {
                jobs: jobs.clone(),
                runs: runs.clone(),
                registry: registry.clone(),
                deployments: registry.clone(),
                compute: compute.clone(),
                notifications: notify.clone(),
            },
            &test_config(),
            dispatch,
            sweeper,
        );

        Self {
            state,
            jobs,
            runs,
            registry,
            compute,
            notify,
        }
    }

    /// Full HTTP surface over this app's state
    pub fn router(&self) -> Router {
        runfleet_app::compose(
            self.state.clone(),
            MachinesState {
                registry: self.registry.clone(),
            },
        )
    }

    pub fn add_machine(&self, name: &str, max_queue_size: Option<i32>) -> Machine {
        let machine = Machine::new(name, format!("http://{}.runfleet.test", name), max_queue_size)
            .unwrap();
        self.registry.insert_machine(machine.clone());
        tracing::debug!(machine_id = %machine.id, name, ?max_queue_size, "Seeded test machine");
        machine
    }

    /// Deployment pinned to one machine
    pub fn deploy_to(&self, machine: &Machine) -> Uuid {
        self.deploy(DeploymentTarget::Machine(machine.id))
    }

    /// Deployment spread over a new group holding `members`
    pub fn deploy_to_group(&self, members: &[&Machine]) -> Uuid {
        let group_id = Uuid::new_v4();
        for machine in members {
            self.registry.add_group_member(group_id, machine.id);
        }
        self.deploy(DeploymentTarget::Group(group_id))
    }

    fn deploy(&self, target: DeploymentTarget) -> Uuid {
        let id = Uuid::new_v4();
        self.registry.insert_deployment(Deployment {
            id,
            target,
            org_id: Some("org_test".to_string()),
            user_id: Some("user_test".to_string()),
        });
        tracing::debug!(deployment_id = %id, ?target, "Seeded test deployment");
        id
    }

    pub async fn enqueue(&self, deployment_id: Uuid) -> Job {
        self.state
            .queue
            .enqueue(
                deployment_id,
                Some(serde_json::json!({ "prompt": "a lighthouse at dusk" })),
                "http://runfleet.test",
                CallerIdentity::default(),
            )
            .await
            .unwrap()
    }

    pub async fn job(&self, id: Uuid) -> Job {
        self.jobs.find(id).await.unwrap().unwrap()
    }

    pub async fn load(&self, machine: &Machine) -> i32 {
        self.registry
            .find(machine.id)
            .await
            .unwrap()
            .unwrap()
            .current_queue_size
    }
}

/// Migrated pool for `TEST_DATABASE_URL` (or `DATABASE_URL`).
///
/// `None` when neither is set, so the Postgres tests are skipped on machines
/// without a database.
#[allow(dead_code)]
pub async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()?;

    let pool = PgPool::connect(&url).await.unwrap();
    sqlx::migrate!("../../migrations").run(&pool).await.unwrap();
    Some(pool)
}

/// Build a JSON request
#[allow(dead_code)]
pub fn json_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&b).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Build a request with a raw, possibly malformed JSON body
#[allow(dead_code)]
pub fn raw_json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Parse response body as JSON Value
#[allow(dead_code)]
pub async fn parse_body(response: axum::http::Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
