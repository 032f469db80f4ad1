//! # deskpulse-client
//!
//! Client-side view of background jobs.
//!
//! - [`ProgressTracker`]: one per job kind, polls the tracked job and
//!   publishes [`TrackerState`] on a watch channel
//! - [`ActiveWorkIndicator`]: reduces the import and analysis trackers to a badge count
//! - [`HttpJobSource`]: the [`JobSource`] backed by the deskpulse HTTP API
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use deskpulse_client::{ActiveWorkIndicator, HttpJobSource, JobKind, ProgressTracker};
//!
//! let source = Arc::new(HttpJobSource::new("http://localhost:3000")?);
//! let imports = ProgressTracker::new(JobKind::Import, source.clone(), "owner-1");
//! let analyses = ProgressTracker::new(JobKind::Analysis, source, "owner-1");
//! imports.hydrate().await?;
//! analyses.hydrate().await?;
//!
//! let mut indicator = ActiveWorkIndicator::new(imports.subscribe(), analyses.subscribe());
//! while indicator.changed().await.is_ok() {
//!     println!("active: {:?}", indicator.badge());
//! }
//! ```

pub mod http_source;
pub mod indicator;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use deskpulse_core::{Job, JobKind, JobSource, JobStatus};
pub use http_source::HttpJobSource;
pub use indicator::{active_count, ActiveWorkIndicator};
pub use tracker::{ProgressTracker, TrackerState};
