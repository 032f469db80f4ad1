//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    /// Transient store failure; the client may retry.
    Unavailable(String),
    Internal(deskpulse_core::Error),
}

impl From<deskpulse_core::Error> for ApiError {
    fn from(err: deskpulse_core::Error) -> Self {
        use deskpulse_core::Error;
        match err {
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            Error::JobNotFound(_) => ApiError::NotFound("Job not found".to_string()),
            Error::NotFound(msg) => ApiError::NotFound(msg),
            err if err.is_transient() => ApiError::Unavailable(err.to_string()),
            err => ApiError::Internal(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(err) => {
                error!(subsystem = "api", error = %err, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskpulse_core::Error;
    use uuid::Uuid;

    fn status(err: Error) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(status(Error::InvalidInput("bad".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(Error::JobNotFound(Uuid::nil())), StatusCode::NOT_FOUND);
        assert_eq!(status(Error::Unauthorized("no owner".into())), StatusCode::UNAUTHORIZED);
        assert_eq!(status(Error::Store("reset".into())), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status(Error::Internal("boom".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
