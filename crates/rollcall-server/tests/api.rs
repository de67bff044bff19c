//! End-to-end tests for the HTTP API over a simulated radio.

use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use rollcall_core::{Config, DiscoveryMode};
use rollcall_server::api::create_router;
use rollcall_server::state::AppState;
use serde_json::{json, Value};
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.session.scan_duration_secs = 1;
    config.session.wait_interval_secs = 0;
    config.session.threshold = 0.5;
    config.discovery.mode = DiscoveryMode::Simulated;
    config.discovery.detection_probability = 1.0;
    config.discovery.failure_probability = 0.0;
    config.discovery.seed = Some(7);
    config.storage.registry_path = dir.path().join("registered_participants.json");
    config.storage.export_dir = dir.path().join("exports");
    config
}

async fn test_server(dir: &TempDir) -> TestServer {
    let state = AppState::from_config(test_config(dir)).await.unwrap().into_shared();
    TestServer::new(create_router(state)).unwrap()
}

async fn register(server: &TestServer, device_id: &str, name: &str) {
    server
        .post("/api/participants")
        .json(&json!({ "device_id": device_id, "name": name }))
        .await
        .assert_status(StatusCode::CREATED);
}

async fn wait_for_last_session(server: &TestServer) -> Value {
    for _ in 0..100 {
        let response = server.get("/api/session/last").await;
        if response.status_code() == StatusCode::OK {
            return response.json();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("session did not finish");
}

#[tokio::test]
async fn test_health_reports_idle_engine() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;

    let body: Value = server.get("/health").await.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["session_status"], "idle");
}

#[tokio::test]
async fn test_register_then_list() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;

    let response = server
        .post("/api/participants")
        .json(&json!({ "device_id": "aa:bb:cc:dd:ee:01", "name": "Asha Rao" }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["participant"]["beacon_id"], "AA:BB:CC:DD:EE:01");
    assert_eq!(body["persisted"], true);

    register(&server, "AA:BB:CC:DD:EE:02", "Bilal Khan").await;

    let body: Value = server.get("/api/participants").await.json();
    assert_eq!(body["count"], 2);
    assert_eq!(body["participants"][0]["name"], "Asha Rao");
    assert_eq!(body["participants"][1]["name"], "Bilal Khan");
    assert!(dir.path().join("registered_participants.json").exists());
}

#[tokio::test]
async fn test_duplicate_device_conflicts() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;
    register(&server, "AA:BB:CC:DD:EE:01", "Asha Rao").await;

    let response = server
        .post("/api/participants")
        .json(&json!({ "device_id": "aa:bb:cc:dd:ee:01", "name": "Someone Else" }))
        .await;
    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["error"], "duplicate_device");
    assert_eq!(body["details"]["registered_to"], "Asha Rao");
}

#[tokio::test]
async fn test_blank_name_is_rejected() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;

    server
        .post("/api/participants")
        .json(&json!({ "device_id": "AA:BB:CC:DD:EE:01", "name": "   " }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let body: Value = server.get("/api/participants").await.json();
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn test_device_scan_marks_registered_devices() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;
    register(&server, "AA:BB:CC:DD:EE:01", "Asha Rao").await;

    let response = server.get("/api/devices").await;
    response.assert_status_ok();
    let body: Value = response.json();
    let devices = body["devices"].as_array().unwrap();
    let asha = devices
        .iter()
        .find(|device| device["address"] == "AA:BB:CC:DD:EE:01")
        .unwrap();
    assert_eq!(asha["registered_to"], "Asha Rao");
    assert!(devices
        .iter()
        .filter(|device| device["address"] != "AA:BB:CC:DD:EE:01")
        .all(|device| device["registered_to"].is_null()));
}

#[tokio::test]
async fn test_session_lifecycle() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;
    register(&server, "AA:BB:CC:DD:EE:01", "Asha Rao").await;
    register(&server, "AA:BB:CC:DD:EE:02", "Bilal Khan").await;

    let response = server
        .post("/api/session/start")
        .json(&json!({ "label": "Period 2" }))
        .await;
    response.assert_status(StatusCode::ACCEPTED);
    let started: Value = response.json();
    assert_eq!(started["participants"], 2);
    assert_eq!(started["label"], "Period 2");
    assert!(started["warning"].is_null());

    // Second start is refused and does not disturb the first
    server
        .post("/api/session/start")
        .await
        .assert_status(StatusCode::CONFLICT);

    // Registration scans would compete for the radio
    server
        .get("/api/devices")
        .await
        .assert_status(StatusCode::CONFLICT);

    tokio::time::sleep(Duration::from_millis(1_300)).await;

    let status: Value = server.get("/api/session").await.json();
    assert_eq!(status["status"], "running");
    assert_eq!(status["session_id"], started["session_id"]);
    assert!(status["scan_number"].as_u64().unwrap() >= 1);

    let response = server.post("/api/session/stop").await;
    response.assert_status(StatusCode::ACCEPTED);
    let stopped: Value = response.json();
    assert!(stopped["stopped"] == "requested" || stopped["stopped"] == "already_stopping");

    let last = wait_for_last_session(&server).await;
    assert_eq!(last["label"], "Period 2");
    assert_eq!(last["outcome"]["outcome"], "finalized");
    assert_eq!(last["outcome"]["session_id"], started["session_id"]);

    let verdicts = last["outcome"]["verdicts"].as_array().unwrap();
    assert_eq!(verdicts.len(), 2);
    assert_eq!(verdicts[0]["name"], "Asha Rao");
    assert!(verdicts.iter().all(|v| v["status"] == "Present"));
    assert_eq!(last["outcome"]["export"]["state"], "written");

    let exports: Vec<_> = std::fs::read_dir(dir.path().join("exports"))
        .unwrap()
        .collect();
    assert_eq!(exports.len(), 1);

    // Engine is reusable
    let status: Value = server.get("/api/session").await.json();
    assert_eq!(status["status"], "idle");
    server
        .post("/api/session/stop")
        .await
        .assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_stop_without_session_conflicts() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;

    let response = server.post("/api/session/stop").await;
    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["error"], "session_not_running");
}

#[tokio::test]
async fn test_last_session_not_found_before_any_run() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;

    server
        .get("/api/session/last")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_empty_registry_session_aborts() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;

    let response = server.post("/api/session/start").await;
    response.assert_status(StatusCode::ACCEPTED);
    let started: Value = response.json();
    assert_eq!(started["participants"], 0);
    assert!(started["warning"].is_string());

    let last = wait_for_last_session(&server).await;
    assert_eq!(last["outcome"]["outcome"], "aborted");
    assert_eq!(last["outcome"]["reason"], "empty_registry");
    assert!(!dir.path().join("exports").exists());
}

#[tokio::test]
async fn test_malformed_start_body_is_rejected() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;

    server
        .post("/api/session/start")
        .bytes("{label".into())
        .content_type("application/json")
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server
        .post("/api/session/start")
        .json(&json!({ "label": 5 }))
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    server
        .post("/api/session/start")
        .text("Period 2")
        .await
        .assert_status(StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let status: Value = server.get("/api/session").await.json();
    assert_eq!(status["status"], "idle");
}

#[tokio::test]
async fn test_busy_radio_refuses_scans_and_sessions() {
    let dir = TempDir::new().unwrap();
    let state = AppState::from_config(test_config(&dir)).await.unwrap();
    let radio = std::sync::Arc::clone(&state.radio);
    let server = TestServer::new(create_router(state.into_shared())).unwrap();
    register(&server, "AA:BB:CC:DD:EE:01", "Asha Rao").await;

    let held = radio.lock().await;

    let response = server.get("/api/devices").await;
    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["error"], "radio_busy");

    let response = server.post("/api/session/start").await;
    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["error"], "radio_busy");

    let status: Value = server.get("/api/session").await.json();
    assert_eq!(status["status"], "idle");

    drop(held);
    server.get("/api/devices").await.assert_status_ok();
}

#[tokio::test]
async fn test_unlabelled_start_without_body() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;
    register(&server, "AA:BB:CC:DD:EE:01", "Asha Rao").await;

    let response = server.post("/api/session/start").await;
    response.assert_status(StatusCode::ACCEPTED);
    let started: Value = response.json();
    assert!(started["label"].is_null());

    server.post("/api/session/stop").await.assert_status(StatusCode::ACCEPTED);
    let last = wait_for_last_session(&server).await;
    assert!(last["label"].is_null());
}

#[tokio::test]
async fn test_openapi_document_lists_routes() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;

    let body: Value = server.get("/api/openapi.json").await.json();
    let paths = body["paths"].as_object().unwrap();
    for path in [
        "/participants",
        "/devices",
        "/session",
        "/session/start",
        "/session/stop",
        "/session/last",
    ] {
        assert!(paths.contains_key(path), "missing {path}");
    }
}
