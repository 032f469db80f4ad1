//! Job routes against the in-memory store.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use deskpulse_api::{router, AppState};
use deskpulse_core::{JobPatch, JobStatus, JobStore};
use deskpulse_db::MemoryJobStore;
use deskpulse_jobs::{CancellationCoordinator, JobService, RunnerRegistry};

fn app() -> (Router, Arc<MemoryJobStore>) {
    let store = Arc::new(MemoryJobStore::new());
    let coordinator = CancellationCoordinator::new(store.clone(), Arc::new(RunnerRegistry::new()));
    let service = JobService::new(store.clone(), coordinator);
    (router(AppState::new(service)), store)
}

async fn send(app: &Router, method: &str, uri: &str, owner: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    send_raw(app, method, uri, owner, body.map(|b| b.to_string())).await
}

async fn send_raw(
    app: &Router,
    method: &str,
    uri: &str,
    owner: Option<&str>,
    body: Option<String>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(owner) = owner {
        builder = builder.header("x-owner-id", owner);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create(app: &Router, owner: &str, kind: &str) -> Uuid {
    let (status, body) = send(
        app,
        "POST",
        "/api/v1/jobs",
        Some(owner),
        Some(json!({"kind": kind, "provider": "zendesk", "total_pages": 5})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_health() {
    let (app, _) = app();
    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_create_and_get_job() {
    let (app, _) = app();
    let id = create(&app, "owner-1", "import").await;

    let (status, body) = send(&app, "GET", &format!("/api/v1/jobs/{id}"), Some("owner-1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["progress"], 0);
    assert_eq!(body["kind"], "import");
    assert_eq!(body["total_pages"], 5);
}

#[tokio::test]
async fn test_create_job_validation() {
    let (app, store) = app();
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/jobs",
        Some("owner-1"),
        Some(json!({"kind": "export", "provider": "zendesk"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/jobs",
        Some("owner-1"),
        Some(json!({"kind": "import", "provider": ""})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_missing_owner_is_unauthorized() {
    let (app, _) = app();
    let (status, _) = send(&app, "GET", "/api/v1/jobs/active", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_foreign_owner_gets_not_found() {
    let (app, _) = app();
    let id = create(&app, "owner-1", "import").await;

    let (status, _) = send(&app, "GET", &format!("/api/v1/jobs/{id}"), Some("owner-2"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "POST", &format!("/api/v1/jobs/{id}/cancel"), Some("owner-2"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_active_jobs() {
    let (app, _) = app();
    let first = create(&app, "owner-1", "import").await;
    let second = create(&app, "owner-1", "analysis").await;
    create(&app, "owner-2", "import").await;

    let (status, body) = send(&app, "GET", "/api/v1/jobs/active", Some("owner-1"), None).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|j| j["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&first.to_string().as_str()));
    assert!(ids.contains(&second.to_string().as_str()));
}

#[tokio::test]
async fn test_cancel_job_is_idempotent() {
    let (app, _) = app();
    let id = create(&app, "owner-1", "import").await;
    let uri = format!("/api/v1/jobs/{id}/cancel");

    let (status, body) = send(&app, "POST", &uri, Some("owner-1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "canceled");
    assert_eq!(body["changed"], true);

    let (status, body) = send(&app, "POST", &uri, Some("owner-1"), Some(json!({"force": true}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "canceled");
    assert_eq!(body["changed"], false);
}

#[tokio::test]
async fn test_cancel_completed_job_reports_success_unchanged() {
    let (app, store) = app();
    let id = create(&app, "owner-1", "import").await;
    store.claim(id).await.unwrap().unwrap();
    store.update_by_id(id, JobPatch::complete()).await.unwrap();

    let (status, body) = send(&app, "POST", &format!("/api/v1/jobs/{id}/cancel"), Some("owner-1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["changed"], false);
}

#[tokio::test]
async fn test_cancel_unknown_job() {
    let (app, _) = app();
    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/jobs/{}/cancel", Uuid::new_v4()),
        Some("owner-1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Job not found");
}

#[tokio::test]
async fn test_malformed_create_body_uses_error_shape() {
    let (app, store) = app();
    let (status, body) = send_raw(
        &app,
        "POST",
        "/api/v1/jobs",
        Some("owner-1"),
        Some("{\"kind\": \"import\",".to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/jobs",
        Some("owner-1"),
        Some(json!({"kind": "import", "provider": 7})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_malformed_cancel_body_is_rejected() {
    let (app, store) = app();
    let id = create(&app, "owner-1", "import").await;
    let uri = format!("/api/v1/jobs/{id}/cancel");

    let (status, body) = send(&app, "POST", &uri, Some("owner-1"), Some(json!({"force": "yes"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    assert_eq!(store.get(id).await.unwrap().unwrap().status, JobStatus::Pending);

    let (status, body) = send_raw(&app, "POST", &uri, Some("owner-1"), Some("not json".to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    assert_eq!(store.get(id).await.unwrap().unwrap().status, JobStatus::Pending);
}
