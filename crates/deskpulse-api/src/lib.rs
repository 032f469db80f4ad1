//! # deskpulse-api
//!
//! HTTP surface over [`JobService`]: create, inspect, list and cancel jobs.

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use deskpulse_core::defaults;
use deskpulse_jobs::JobService;

#[derive(Clone)]
pub struct AppState {
    pub jobs: JobService,
}

impl AppState {
    pub fn new(jobs: JobService) -> Self {
        Self { jobs }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/jobs", post(handlers::jobs::create_job))
        .route("/api/v1/jobs/active", get(handlers::jobs::list_active_jobs))
        .route("/api/v1/jobs/:id", get(handlers::jobs::get_job))
        .route("/api/v1/jobs/:id/cancel", post(handlers::jobs::cancel_job))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS layer for the given origins; an empty list allows any origin.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(defaults::OWNER_HEADER),
        ])
        .max_age(std::time::Duration::from_secs(3600))
}
