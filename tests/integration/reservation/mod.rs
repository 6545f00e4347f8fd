//! Machine admission counter under contention

use std::sync::Arc;
use std::time::Duration;

use runfleet_common::Pagination;
use runfleet_machines::{InMemoryMachineRegistry, Machine, MachineRegistry, OperationalStatus};
use runfleet_queue::{DispatchConfig, SweeperConfig};
use tokio::task::JoinSet;

use crate::common::{fast_dispatch, TestApp};

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_reservations_never_exceed_limit() {
    let registry = Arc::new(InMemoryMachineRegistry::new());
    let machine = Machine::new("gpu-a", "http://gpu-a.runfleet.test", Some(5)).unwrap();
    registry.insert_machine(machine.clone());

    let mut attempts = JoinSet::new();
    for _ in 0..64 {
        let registry = registry.clone();
        attempts.spawn(async move { registry.try_reserve(machine.id).await.unwrap() });
    }

    let mut granted = 0;
    while let Some(result) = attempts.join_next().await {
        if result.unwrap() {
            granted += 1;
        }
    }

    let stored = registry.find(machine.id).await.unwrap().unwrap();
    assert_eq!(granted, 5);
    assert_eq!(stored.current_queue_size, 5);
    assert_eq!(stored.operational_status, OperationalStatus::Busy);
}

#[tokio::test]
async fn test_release_floors_at_zero() {
    let registry = InMemoryMachineRegistry::new();
    let machine = Machine::new("gpu-a", "http://gpu-a.runfleet.test", Some(2)).unwrap();
    registry.insert_machine(machine.clone());

    assert!(registry.try_reserve(machine.id).await.unwrap());
    registry.release(machine.id).await.unwrap();
    let released = registry.release(machine.id).await.unwrap().unwrap();

    assert_eq!(released.current_queue_size, 0);
    assert_eq!(released.operational_status, OperationalStatus::Idle);
}

#[tokio::test]
async fn test_sync_and_force_idle_correct_drift() {
    let registry = InMemoryMachineRegistry::new();
    let machine = Machine::new("gpu-a", "http://gpu-a.runfleet.test", Some(4)).unwrap();
    registry.insert_machine(machine.clone());
    for _ in 0..3 {
        registry.try_reserve(machine.id).await.unwrap();
    }

    let synced = registry.sync(machine.id, 1).await.unwrap().unwrap();
    assert_eq!(synced.current_queue_size, 1);
    assert_eq!(synced.operational_status, OperationalStatus::Busy);

    let idle = registry.force_idle(machine.id).await.unwrap().unwrap();
    assert_eq!(idle.current_queue_size, 0);
    assert_eq!(idle.operational_status, OperationalStatus::Idle);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_pool_slots_share_machine_capacity() {
    let dispatch = DispatchConfig {
        concurrency: 8,
        retry_delay: Duration::from_secs(3600),
        ..fast_dispatch(200)
    };
    let app = TestApp::with_configs(dispatch, SweeperConfig::default());
    let machine = app.add_machine("gpu-a", Some(3));
    let deployment_id = app.deploy_to(&machine);
    for _ in 0..12 {
        app.enqueue(deployment_id).await;
    }

    app.state.pool.start().await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        assert!(app.load(&machine).await <= 3);
        let counts = app.state.queue.snapshot(Pagination { limit: Some(20) }).await.unwrap().counts;
        if counts.waiting == 0 && counts.active + counts.delayed == 12 && counts.active == 3 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "queue did not settle: {:?}",
            counts
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    app.state.pool.stop(false).await;

    assert_eq!(app.load(&machine).await, 3);
    assert_eq!(app.compute.recorded_submissions().len(), 3);
}
