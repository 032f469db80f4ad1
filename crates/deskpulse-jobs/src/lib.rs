//! # deskpulse-jobs
//!
//! Job execution for deskpulse.
//!
//! This crate provides:
//! - [`JobRunner`], which pages a claimed job to a terminal state
//! - [`CancellationCoordinator`], store-first cancellation with local runner signaling
//! - [`JobWorker`], claiming pending jobs with bounded concurrency and heartbeats
//! - [`Reaper`], failing running jobs whose heartbeat went stale
//! - Import and analysis handlers over the helpdesk API and ticket store
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use deskpulse_db::{Database, JobStore};
//! use deskpulse_jobs::{HelpdeskClient, HelpdeskConfig, ImportHandler, WorkerBuilder, WorkerConfig};
//!
//! let db = Database::connect("postgres://...").await?;
//! let jobs: Arc<dyn JobStore> = Arc::new(db.jobs.clone());
//! let helpdesk = Arc::new(HelpdeskClient::new(HelpdeskConfig::from_env())?);
//!
//! let worker = WorkerBuilder::new(jobs)
//!     .with_config(WorkerConfig::from_env())
//!     .with_handler(ImportHandler::new(helpdesk, Arc::new(db.tickets.clone())))
//!     .build();
//!
//! let handle = worker.start();
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//! handle.shutdown().await?;
//! ```

pub mod analysis;
pub mod cancel;
pub mod coordinator;
pub mod handler;
pub mod helpdesk;
pub mod import;
pub mod reaper;
pub mod retry;
pub mod runner;
pub mod service;
pub mod worker;

// Re-export core types
pub use deskpulse_core::*;

pub use analysis::{AnalysisHandler, AnalysisSink, HttpTicketAnalyzer, TicketAnalyzer, UnanalyzedTickets};
pub use cancel::{CancelSignal, RunnerGuard, RunnerRegistry};
pub use coordinator::{CancelOutcome, CancellationCoordinator};
pub use handler::{JobHandler, JobWork, StaticHandler};
pub use helpdesk::{HelpdeskClient, HelpdeskConfig};
pub use import::{ImportHandler, TicketImportSink};
pub use reaper::Reaper;
pub use retry::RetryPolicy;
pub use runner::{derive_progress, JobRunner, RunOutcome};
pub use service::JobService;
pub use worker::{JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};
