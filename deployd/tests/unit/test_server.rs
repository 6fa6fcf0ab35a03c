//! HTTP boundary tests

mod support;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use deployd::deploy::fsm::DeploymentState;
use deployd::server::serve::router;
use deployd::server::state::ServerState;
use secrecy::SecretString;
use serde_json::Value;
use support::{FakeSourceSync, Gate, Harness};
use tower::ServiceExt;

const KEY: &str = "test-key";

fn app(h: &Harness) -> Router {
    let state = ServerState::new(h.orchestrator.clone(), SecretString::from(KEY.to_string()));
    router(Arc::new(state))
}

async fn get(app: Router, uri: &str, key: Option<&str>) -> (StatusCode, Vec<u8>) {
    let mut request = Request::builder().uri(uri);
    if let Some(key) = key {
        request = request.header("X-Api-Key", key);
    }
    let response = app
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

fn json(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn test_banner_needs_no_key() {
    let h = Harness::new(FakeSourceSync::with_dockerfile());
    let (status, body) = get(app(&h), "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"Deployment Server working");
}

#[tokio::test]
async fn test_health_and_version() {
    let h = Harness::new(FakeSourceSync::with_dockerfile());

    let (status, body) = get(app(&h), "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["status"], "healthy");

    let (status, body) = get(app(&h), "/version", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_manage_routes_require_key() {
    let h = Harness::new(FakeSourceSync::with_dockerfile());

    for uri in ["/manage/demo", "/manage/clean", "/manage/status/demo"] {
        for key in [None, Some("wrong")] {
            let (status, body) = get(app(&h), uri, key).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
            assert_eq!(json(&body), serde_json::json!({"error": "API key is not valid"}));
        }
    }
    assert_eq!(h.source.clone_count(), 0);
    assert!(h.runtime.calls().await.is_empty());
}

#[tokio::test]
async fn test_deploy_success() {
    let h = Harness::new(FakeSourceSync::with_dockerfile());

    let (status, body) = get(app(&h), "/manage/demo?ports=127.0.0.1:3002:3002", Some(KEY)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json(&body),
        serde_json::json!({"message": "Deployment successful", "warnings": {}})
    );
}

#[tokio::test]
async fn test_deploy_reports_dotenv_warning() {
    let h = Harness::new(FakeSourceSync::with_dockerfile());
    std::fs::remove_file(h.env_file()).unwrap();

    let (status, body) = get(app(&h), "/manage/demo", Some(KEY)).await;
    assert_eq!(status, StatusCode::OK);
    let body = json(&body);
    assert_eq!(body["message"], "Deployment successful");
    assert!(body["warnings"]["dotenv"].is_string());
}

#[tokio::test]
async fn test_deploy_unknown_app() {
    let h = Harness::new(FakeSourceSync::with_dockerfile());

    let (status, body) = get(app(&h), "/manage/nope", Some(KEY)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body = json(&body);
    assert_eq!(body["error"], "appId is not valid: nope");
    assert!(body.get("errorType").is_none());
}

#[tokio::test]
async fn test_deploy_clone_failure_has_error_type() {
    let h = Harness::new(FakeSourceSync {
        clone_error: Some("fatal: could not read from remote repository".to_string()),
        ..FakeSourceSync::with_dockerfile()
    });

    let (status, body) = get(app(&h), "/manage/demo", Some(KEY)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        json(&body),
        serde_json::json!({
            "error": "fatal: could not read from remote repository",
            "errorType": "Cloning"
        })
    );
}

#[tokio::test]
async fn test_deploy_survives_client_disconnect() {
    let gate = Arc::new(Gate::default());
    let h = Harness::new(FakeSourceSync {
        gate: Some(gate.clone()),
        ..FakeSourceSync::with_dockerfile()
    });

    let router = app(&h);
    let request = tokio::spawn(async move { get(router, "/manage/demo", Some(KEY)).await });
    gate.entered.notified().await;

    // Client hangs up while the checkout is being cloned
    request.abort();
    assert!(request.await.unwrap_err().is_cancelled());

    gate.release.notify_one();
    h.orchestrator.drain().await;

    let status = h.orchestrator.status("demo").await.unwrap().unwrap();
    assert_eq!(status.state, DeploymentState::Running);
    assert_eq!(h.source.clone_count(), 1);
    assert_eq!(h.runtime.containers().await.len(), 1);
}

#[tokio::test]
async fn test_deploy_invalid_ports() {
    let h = Harness::new(FakeSourceSync::with_dockerfile());

    let (status, _) = get(app(&h), "/manage/demo?ports=3002", Some(KEY)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_endpoint() {
    let h = Harness::new(FakeSourceSync::with_dockerfile());

    let (status, _) = get(app(&h), "/manage/status/demo", Some(KEY)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let scheduled = h.orchestrator.deploy("demo", None).await.unwrap();
    scheduled.task.await.unwrap().unwrap();

    let (status, body) = get(app(&h), "/manage/status/demo", Some(KEY)).await;
    assert_eq!(status, StatusCode::OK);
    let body = json(&body);
    assert_eq!(body["app_id"], "demo");
    assert_eq!(body["state"], "running");
    assert_eq!(body["nonce"], scheduled.attempt.nonce.as_str());
}

#[tokio::test]
async fn test_clean_endpoint() {
    let h = Harness::new(FakeSourceSync::with_dockerfile());
    h.runtime.add_image(&[]).await;

    let (status, body) = get(app(&h), "/manage/clean", Some(KEY)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json(&body),
        serde_json::json!({
            "message": "Cleaned",
            "containersRemoved": 0,
            "imagesRemoved": 1,
            "failures": 0
        })
    );
}
