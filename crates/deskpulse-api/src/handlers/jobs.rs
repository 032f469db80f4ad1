//! Job endpoints.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use deskpulse_core::{JobKind, JobParams, NewJob};

use crate::error::ApiError;
use crate::extract::{ApiJson, OwnerId};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateJobBody {
    pub kind: String,
    pub provider: String,
    #[serde(default)]
    pub params: JobParams,
    pub total_pages: Option<i32>,
    pub total_count: Option<i64>,
}

pub async fn create_job(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    ApiJson(body): ApiJson<CreateJobBody>,
) -> Result<impl IntoResponse, ApiError> {
    let kind: JobKind = body.kind.parse()?;
    let new = NewJob {
        owner_id,
        kind,
        provider: body.provider,
        params: body.params,
        total_pages: body.total_pages,
        total_count: body.total_count,
    };
    let job = state.jobs.create_job(new).await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": job.id }))))
}

pub async fn get_job(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.jobs.get_job(&owner_id, id).await?;
    Ok(Json(job))
}

pub async fn list_active_jobs(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
) -> Result<impl IntoResponse, ApiError> {
    let jobs = state.jobs.list_active_jobs(&owner_id).await?;
    Ok(Json(serde_json::json!({ "jobs": jobs })))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelJobBody {
    #[serde(default)]
    pub force: bool,
}

impl CancelJobBody {
    /// An absent or blank body is a plain cancel.
    fn parse(body: &[u8]) -> Result<Self, ApiError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid cancel request body: {e}")))
    }
}

pub async fn cancel_job(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let force = CancelJobBody::parse(&body)?.force;
    let outcome = state.jobs.cancel_job(&owner_id, id, force).await?;
    Ok(Json(serde_json::json!({
        "id": outcome.job.id,
        "status": outcome.job.status,
        "changed": outcome.changed,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_body_parse() {
        assert!(!CancelJobBody::parse(b"").unwrap().force);
        assert!(!CancelJobBody::parse(b" \n").unwrap().force);
        assert!(!CancelJobBody::parse(b"{}").unwrap().force);
        assert!(CancelJobBody::parse(br#"{"force": true}"#).unwrap().force);
        assert!(matches!(
            CancelJobBody::parse(br#"{"force": "yes"}"#),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(CancelJobBody::parse(b"force"), Err(ApiError::BadRequest(_))));
    }
}
