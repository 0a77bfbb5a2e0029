//! The HTTP surface driven in-process with `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use rigup_install::fakes::{FakeConfigDeployer, FakePackageManager, FakeServiceManager, StaticProbe};
use rigup_install::{Collaborators, InstallationPipeline, InstallationService, RigupConfig};
use rigup_state::fakes::{MemoryHistoryRecorder, MemorySessionRepository};
use rigupd::{build_router, DaemonState};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app(home: &std::path::Path) -> Router {
    let config = RigupConfig {
        home_dir: home.to_path_buf(),
        state_dir: home.join("state"),
        wallpaper_source: home.join("missing.png"),
        ..RigupConfig::default()
    };
    let packages = Arc::new(FakePackageManager::new());
    let collab = Collaborators {
        packages: packages.clone(),
        query: packages,
        services: Arc::new(FakeServiceManager::new()),
        deployer: Arc::new(FakeConfigDeployer::new()),
        probe: Arc::new(StaticProbe::default()),
        history: Arc::new(MemoryHistoryRecorder::new()),
    };
    let service = InstallationService::new(
        InstallationPipeline::new(collab, Arc::new(config)),
        Arc::new(MemorySessionRepository::new()),
    );
    build_router(Arc::new(DaemonState::new(service)))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn start(app: &Router) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/installation/start",
        Some(json!({"components": ["core", "terminal"]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["session_id"].as_str().unwrap().to_string()
}

async fn wait_terminal(app: &Router, id: &str) -> Value {
    let uri = format!("/installation/{id}/status");
    for _ in 0..200 {
        let (status, body) = send(app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        if ["completed", "warning", "failed", "cancelled"].contains(&body["status"].as_str().unwrap()) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session {id} never finished");
}

#[tokio::test]
async fn health_reports_version() {
    let home = tempfile::tempdir().unwrap();
    let (status, body) = send(&app(home.path()), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["live_sessions"], 0);
}

#[tokio::test]
async fn start_returns_created_with_component_count() {
    let home = tempfile::tempdir().unwrap();
    let app = app(home.path());
    let (status, body) = send(
        &app,
        "POST",
        "/installation/start",
        Some(json!({"components": ["core", "terminal", "launcher"]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["component_count"], 3);
    assert!(body["session_id"].as_str().unwrap().len() > 8);
}

#[tokio::test]
async fn invalid_start_is_bad_request() {
    let home = tempfile::tempdir().unwrap();
    let app = app(home.path());

    let (status, body) = send(&app, "POST", "/installation/start", Some(json!({"components": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, body) = send(
        &app,
        "POST",
        "/installation/start",
        Some(json!({"components": ["terminal"]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "installation must include the core component");
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let home = tempfile::tempdir().unwrap();
    let app = app(home.path());
    for (method, uri) in [
        ("GET", "/installation/nope/status"),
        ("POST", "/installation/nope/execute"),
        ("POST", "/installation/nope/cancel"),
        ("POST", "/installation/nope/rollback"),
    ] {
        let (status, body) = send(&app, method, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
        assert_eq!(body["error"], "not_found");
    }
}

#[tokio::test]
async fn execute_runs_to_completion() {
    let home = tempfile::tempdir().unwrap();
    let app = app(home.path());
    let id = start(&app).await;

    let (status, body) = send(&app, "POST", &format!("/installation/{id}/execute"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], id.as_str());
    assert!(body.get("percent_complete").is_some());
    assert!(body.get("components_installed").is_some());
    assert!(body.get("components_total").is_some());

    let done = wait_terminal(&app, &id).await;
    assert_eq!(done["status"], "completed");
    assert_eq!(done["phase"], "completed");
    assert_eq!(done["percent_complete"], 100);
    assert_eq!(done["components_installed"], done["components_total"]);

    let (status, _) = send(&app, "POST", &format!("/installation/{id}/execute"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&app, "POST", &format!("/installation/{id}/rollback"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["errors"], json!([]));
}

#[tokio::test]
async fn cancel_pending_session() {
    let home = tempfile::tempdir().unwrap();
    let app = app(home.path());
    let id = start(&app).await;

    let (status, body) = send(&app, "POST", &format!("/installation/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, body) = send(&app, "POST", &format!("/installation/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn list_returns_every_session() {
    let home = tempfile::tempdir().unwrap();
    let app = app(home.path());
    let first = start(&app).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = start(&app).await;

    let (status, body) = send(&app, "GET", "/installation", None).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["session_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![second.as_str(), first.as_str()]);
}
