//! Fails running jobs whose runner stopped heartbeating.
//!
//! A process that dies mid-job leaves its record in `running` forever.
//! The reaper turns those records `failed` so clients stop showing them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use deskpulse_core::{defaults, JobFilter, JobPatch, JobStore, Result, UpdateOutcome};

use crate::cancel::RunnerRegistry;
use crate::worker::WorkerEvent;

pub struct Reaper {
    store: Arc<dyn JobStore>,
    stale_after: Duration,
    registry: Option<Arc<RunnerRegistry>>,
    event_tx: Option<broadcast::Sender<WorkerEvent>>,
}

impl Reaper {
    pub fn new(store: Arc<dyn JobStore>, stale_after: Duration) -> Self {
        Self {
            store,
            stale_after,
            registry: None,
            event_tx: None,
        }
    }

    /// Also signal local runners of reaped jobs so they stop fetching.
    pub fn with_registry(mut self, registry: Arc<RunnerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_events(mut self, event_tx: broadcast::Sender<WorkerEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// One pass: fail every running job last seen before `now - stale_after`.
    /// Returns the ids that were actually transitioned.
    pub async fn sweep(&self) -> Result<Vec<Uuid>> {
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .unwrap_or_else(|_| chrono::Duration::seconds(defaults::JOB_STALE_AFTER_SECS as i64));
        let cutoff = Utc::now() - stale_after;
        let stale = self
            .store
            .select_by_filter(&JobFilter::stale_running(cutoff))
            .await?;

        let mut reaped = Vec::new();
        for job in stale {
            match self
                .store
                .update_by_id(job.id, JobPatch::fail(defaults::JOB_HEARTBEAT_LOST))
                .await
            {
                Ok(UpdateOutcome::Applied(_)) => {
                    warn!(
                        subsystem = "jobs",
                        component = "reaper",
                        job_id = %job.id,
                        job_kind = %job.kind,
                        last_seen_at = %job.last_seen_at(),
                        "Reaped stale running job"
                    );
                    if let Some(registry) = &self.registry {
                        registry.signal(job.id);
                    }
                    if let Some(tx) = &self.event_tx {
                        let _ = tx.send(WorkerEvent::JobReaped { job_id: job.id });
                    }
                    reaped.push(job.id);
                }
                // Finished or canceled between the select and the write.
                Ok(UpdateOutcome::Rejected(_)) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    error!(subsystem = "jobs", component = "reaper", job_id = %job.id, error = %e, "Failed to reap job");
                }
            }
        }

        if !reaped.is_empty() {
            info!(subsystem = "jobs", component = "reaper", item_count = reaped.len(), "Reaper sweep finished");
        }
        Ok(reaped)
    }

    /// Sweep every `interval` until the returned task is aborted.
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            if interval.is_zero() {
                return;
            }
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep().await {
                    debug!(subsystem = "jobs", component = "reaper", error = %e, "Reaper sweep failed");
                }
            }
        })
    }
}
