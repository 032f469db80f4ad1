//! HttpJobSource against a mocked job API.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use deskpulse_client::{HttpJobSource, Job, JobKind, JobSource};
use deskpulse_core::{Error, NewJob};

fn job() -> Job {
    Job::pending(NewJob::new("owner-1", JobKind::Import, "zendesk"), Utc::now()).unwrap()
}

#[tokio::test]
async fn test_get_job_sends_owner_header() {
    let server = MockServer::start().await;
    let job = job();
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/jobs/{}", job.id)))
        .and(header("x-owner-id", "owner-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&job))
        .expect(1)
        .mount(&server)
        .await;

    let source = HttpJobSource::new(server.uri()).unwrap();
    let fetched = source.get_job("owner-1", job.id).await.unwrap();
    assert_eq!(fetched, Some(job));
}

#[tokio::test]
async fn test_get_job_not_found_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "not found"})))
        .mount(&server)
        .await;

    let source = HttpJobSource::new(server.uri()).unwrap();
    assert!(source.get_job("owner-1", Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_list_active_jobs() {
    let server = MockServer::start().await;
    let job = job();
    Mock::given(method("GET"))
        .and(path("/api/v1/jobs/active"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jobs": [job] })))
        .mount(&server)
        .await;

    let source = HttpJobSource::new(format!("{}/", server.uri())).unwrap();
    let jobs = source.list_active_jobs("owner-1").await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].kind, JobKind::Import);
}

#[tokio::test]
async fn test_server_error_is_request_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let source = HttpJobSource::new(server.uri()).unwrap();
    let err = source.list_active_jobs("owner-1").await.unwrap_err();
    assert!(matches!(err, Error::Request(_)));
}
