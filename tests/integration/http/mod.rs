//! HTTP endpoint tests (queue, worker, sweeper, run callback, machines)

use axum::http::StatusCode;
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;

use runfleet_queue::{JobState, ProcessOutcome};

use crate::common::{json_request, parse_body, raw_json_request, TestApp};

#[tokio::test]
async fn test_add_job_then_list() {
    let app = TestApp::new();
    let machine = app.add_machine("gpu-a", Some(1));
    let deployment_id = app.deploy_to(&machine);

    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            "/queue/add",
            Some(json!({
                "deployment_id": deployment_id,
                "inputs": { "seed": 42, "prompt": "fog" },
                "caller": { "user_id": "user_1", "org_id": null }
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = parse_body(response).await;
    assert_eq!(body["status"], "queued");
    let job_id: Uuid = serde_json::from_value(body["job_id"].clone()).unwrap();

    let job = app.job(job_id).await;
    assert_eq!(job.state, JobState::Waiting);
    assert_eq!(job.origin, "http://runfleet.test");
    assert_eq!(job.caller.user_id.as_deref(), Some("user_1"));

    let response = app
        .router()
        .oneshot(json_request("GET", "/queue/list?limit=5", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_body(response).await;
    assert_eq!(body["counts"]["waiting"], 1);
    assert_eq!(body["waiting"][0]["id"], json!(job_id));
}

#[tokio::test]
async fn test_add_job_rejects_nested_inputs() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            "/queue/add",
            Some(json!({
                "deployment_id": Uuid::new_v4(),
                "inputs": { "nested": { "a": 1 } }
            })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = parse_body(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_add_job_malformed_body_uses_error_envelope() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(raw_json_request("POST", "/queue/add", "{"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = parse_body(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(body["error"]["message"].is_string());
    assert!(app.state.pool.process_next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_run_callback_rejects_unknown_status() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            "/api/update-run",
            Some(json!({ "run_id": Uuid::new_v4(), "status": "exploded" })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(parse_body(response).await["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_remove_job() {
    let app = TestApp::new();
    let machine = app.add_machine("gpu-a", Some(1));
    let deployment_id = app.deploy_to(&machine);
    let waiting = app.enqueue(deployment_id).await;

    let response = app
        .router()
        .oneshot(json_request(
            "DELETE",
            &format!("/queue/job/{}", waiting.id),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(parse_body(response).await["success"], true);

    let response = app
        .router()
        .oneshot(json_request(
            "DELETE",
            &format!("/queue/job/{}", waiting.id),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_remove_active_job_conflicts() {
    let app = TestApp::new();
    let machine = app.add_machine("gpu-a", Some(1));
    let deployment_id = app.deploy_to(&machine);
    let job = app.enqueue(deployment_id).await;
    app.state.pool.process_next().await.unwrap();

    let response = app
        .router()
        .oneshot(json_request("DELETE", &format!("/queue/job/{}", job.id), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(app.job(job.id).await.state, JobState::Active);
}

#[tokio::test]
async fn test_clean_all_keeps_active_jobs() {
    let app = TestApp::new();
    let machine = app.add_machine("gpu-a", Some(1));
    let deployment_id = app.deploy_to(&machine);
    let active = app.enqueue(deployment_id).await;
    app.state.pool.process_next().await.unwrap();
    app.enqueue(deployment_id).await;
    app.enqueue(deployment_id).await;

    let response = app
        .router()
        .oneshot(json_request("POST", "/queue/clean", Some(json!({ "state": "all" }))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(parse_body(response).await["cleaned_count"], 2);
    assert_eq!(app.job(active.id).await.state, JobState::Active);
}

#[tokio::test]
async fn test_run_callback_completes_run() {
    let app = TestApp::new();
    let machine = app.add_machine("gpu-a", Some(1));
    let deployment_id = app.deploy_to(&machine);
    let job = app.enqueue(deployment_id).await;
    let Some(ProcessOutcome::Dispatched(receipt)) = app.state.pool.process_next().await.unwrap()
    else {
        panic!("job was not dispatched");
    };

    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            "/api/update-run",
            Some(json!({
                "run_id": receipt.run_id,
                "status": "success",
                "output_data": { "images": ["out_0001.png"] }
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_body(response).await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["completed"], true);
    assert_eq!(body["output_recorded"], true);
    assert_eq!(app.job(job.id).await.state, JobState::Completed);

    let response = app
        .router()
        .oneshot(json_request("GET", &format!("/machines/{}", machine.id), None))
        .await
        .unwrap();
    let body = parse_body(response).await;
    assert_eq!(body["current_queue_size"], 0);
    assert_eq!(body["operational_status"], "idle");
}

#[tokio::test]
async fn test_run_callback_for_unknown_run() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            "/api/update-run",
            Some(json!({ "run_id": Uuid::new_v4(), "status": "running" })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(parse_body(response).await["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_worker_lifecycle_endpoints() {
    let app = TestApp::new();
    let router = app.router();

    let response = router
        .clone()
        .oneshot(json_request("POST", "/worker/start", None))
        .await
        .unwrap();
    let body = parse_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["status"]["running"], true);
    assert_eq!(body["status"]["strategy"], "least-load");

    let response = router
        .clone()
        .oneshot(json_request("POST", "/worker/start", None))
        .await
        .unwrap();
    assert_eq!(parse_body(response).await["success"], false);

    let response = router
        .clone()
        .oneshot(json_request("POST", "/worker/stop?force=true", None))
        .await
        .unwrap();
    let body = parse_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["status"]["running"], false);

    let response = router
        .oneshot(json_request("GET", "/worker/status", None))
        .await
        .unwrap();
    assert_eq!(parse_body(response).await["running"], false);
}

#[tokio::test]
async fn test_sweeper_endpoints() {
    let app = TestApp::new();
    let router = app.router();

    let response = router
        .clone()
        .oneshot(json_request("POST", "/sweeper/run", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_body(response).await;
    assert_eq!(body["checked"], 0);
    assert_eq!(body["cleaned"], 0);

    let response = router
        .clone()
        .oneshot(json_request("POST", "/sweeper/start", None))
        .await
        .unwrap();
    let body = parse_body(response).await;
    assert_eq!(body["result"], "started");
    assert_eq!(body["status"]["timeout_ms"], 300_000);

    let response = router
        .clone()
        .oneshot(json_request("POST", "/sweeper/stop", None))
        .await
        .unwrap();
    assert_eq!(parse_body(response).await["result"], "stopped");

    let response = router
        .oneshot(json_request("GET", "/sweeper/status", None))
        .await
        .unwrap();
    assert_eq!(parse_body(response).await["running"], false);
}

#[tokio::test]
async fn test_machine_sync_endpoint() {
    let app = TestApp::new();
    let machine = app.add_machine("gpu-a", Some(4));

    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            &format!("/machines/{}/sync", machine.id),
            Some(json!({ "actual_size": 2 })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_body(response).await;
    assert_eq!(body["current_queue_size"], 2);
    assert_eq!(body["operational_status"], "busy");
    assert!(body.get("auth_token").is_none());

    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            &format!("/machines/{}/sync", machine.id),
            Some(json!({ "actual_size": -1 })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(parse_body(response).await["error"]["code"], "VALIDATION_ERROR");

    let response = app
        .router()
        .oneshot(raw_json_request(
            "POST",
            &format!("/machines/{}/sync", machine.id),
            "{",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(parse_body(response).await["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(app.load(&machine).await, 2);

    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            &format!("/machines/{}/force-idle", machine.id),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(parse_body(response).await["current_queue_size"], 0);
}
