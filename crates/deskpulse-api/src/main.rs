//! deskpulse API server.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use deskpulse_api::config::{AppConfig, StoreBackend};
use deskpulse_api::{cors_layer, router, AppState};
use deskpulse_core::{JobStore, TicketStore};
use deskpulse_db::{log_pool_metrics, Database, MemoryJobStore, MemoryTicketStore, PoolConfig};
use deskpulse_jobs::{
    AnalysisHandler, CancellationCoordinator, HelpdeskClient, HttpTicketAnalyzer, ImportHandler,
    JobService, WorkerBuilder,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "deskpulse_api=debug,deskpulse_jobs=debug,tower_http=debug")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "deskpulse_api=debug,deskpulse_jobs=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("deskpulse-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false)); // no ANSI in files by default
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Console-only output
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let config = AppConfig::from_env()?;

    let (jobs, tickets, notify): (Arc<dyn JobStore>, Arc<dyn TicketStore>, _) =
        match config.store_backend {
            StoreBackend::Postgres => {
                let url = config.database_url.as_deref().unwrap_or_default();
                let db = Database::connect_with_config(url, PoolConfig::from_env()).await?;
                db.migrate().await?;
                info!(subsystem = "db", "Database connected and migrated");
                log_pool_metrics(db.pool());
                let notify = db.jobs.job_notify();
                (Arc::new(db.jobs.clone()), Arc::new(db.tickets.clone()), notify)
            }
            StoreBackend::Memory => {
                warn!(subsystem = "db", "Using in-memory store; jobs are lost on restart");
                let store = MemoryJobStore::new();
                let notify = store.job_notify();
                (Arc::new(store), Arc::new(MemoryTicketStore::new()), notify)
            }
        };

    // Job worker
    let helpdesk = Arc::new(HelpdeskClient::new(config.helpdesk.clone())?);
    let mut builder = WorkerBuilder::new(jobs.clone())
        .with_config(config.worker.clone())
        .with_notify(notify)
        .with_handler(ImportHandler::new(helpdesk, tickets.clone()));
    match &config.analyzer_url {
        Some(url) => {
            let analyzer = Arc::new(HttpTicketAnalyzer::new(url.clone())?);
            builder = builder.with_handler(AnalysisHandler::new(tickets.clone(), analyzer));
        }
        None => warn!(subsystem = "jobs", "ANALYZER_URL not set; analysis jobs stay pending"),
    }
    let worker = builder.build();

    let coordinator = CancellationCoordinator::new(jobs.clone(), worker.registry());
    let service = JobService::new(jobs, coordinator);
    let worker_handle = worker.start();

    let app = router(AppState::new(service)).layer(cors_layer(&config.allowed_origins));

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped, shutting down job worker");
    worker_handle.shutdown().await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
