//! Cancellation coordinator.
//!
//! Cancellation is written to the job record store first; that write is the
//! point of truth. Signaling the local runner only makes it stop sooner.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use deskpulse_core::{Job, JobPatch, JobStore, Result, UpdateOutcome};

use crate::cancel::RunnerRegistry;

/// Result of a cancel request.
#[derive(Debug, Clone)]
pub struct CancelOutcome {
    /// The job record after the request.
    pub job: Job,
    /// Whether this request moved the job to `canceled`.
    pub changed: bool,
    /// Whether a runner in this process was signaled.
    pub signaled: bool,
}

#[derive(Clone)]
pub struct CancellationCoordinator {
    store: Arc<dyn JobStore>,
    registry: Arc<RunnerRegistry>,
}

impl CancellationCoordinator {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<RunnerRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &Arc<RunnerRegistry> {
        &self.registry
    }

    /// Cancel `job_id`.
    ///
    /// A job that is already terminal is returned unchanged with
    /// `changed == false`. With `force`, a local runner task is aborted
    /// instead of waiting for its next page boundary. That also holds when
    /// the row was already terminal: a runner hung mid-fetch after an
    /// earlier plain cancel still owns a worker slot until it is aborted.
    ///
    /// # Errors
    ///
    /// [`deskpulse_core::Error::JobNotFound`] for unknown ids, or the store error.
    pub async fn cancel(&self, job_id: Uuid, force: bool) -> Result<CancelOutcome> {
        let (job, changed) = match self.store.update_by_id(job_id, JobPatch::cancel()).await? {
            UpdateOutcome::Applied(job) => (job, true),
            UpdateOutcome::Rejected(job) => (job, false),
        };

        let signaled = match (changed, force) {
            (_, true) => self.registry.abort(job_id),
            (true, false) => self.registry.signal(job_id),
            (false, false) => false,
        };

        if changed {
            info!(
                subsystem = "jobs",
                component = "coordinator",
                op = "cancel",
                job_id = %job_id,
                owner_id = %job.owner_id,
                force,
                signaled,
                "Job canceled"
            );
        } else if signaled {
            info!(
                subsystem = "jobs",
                component = "coordinator",
                op = "cancel",
                job_id = %job_id,
                status = %job.status,
                "Aborted lingering runner for terminal job"
            );
        } else {
            debug!(
                subsystem = "jobs",
                component = "coordinator",
                op = "cancel",
                job_id = %job_id,
                status = %job.status,
                "Cancel had no effect"
            );
        }

        Ok(CancelOutcome {
            job,
            changed,
            signaled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskpulse_core::{Error, JobKind, JobStatus, NewJob};
    use deskpulse_db::MemoryJobStore;

    fn setup() -> (Arc<MemoryJobStore>, Arc<RunnerRegistry>, CancellationCoordinator) {
        let store = Arc::new(MemoryJobStore::new());
        let registry = Arc::new(RunnerRegistry::new());
        let coordinator = CancellationCoordinator::new(store.clone(), registry.clone());
        (store, registry, coordinator)
    }

    #[tokio::test]
    async fn test_cancel_pending_job() {
        let (store, _registry, coordinator) = setup();
        let job = store
            .insert(NewJob::new("owner-1", JobKind::Import, "zendesk"))
            .await
            .unwrap();

        let outcome = coordinator.cancel(job.id, false).await.unwrap();
        assert!(outcome.changed);
        assert!(!outcome.signaled);
        assert_eq!(outcome.job.status, JobStatus::Canceled);
        assert!(outcome.job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_cancel_running_job_signals_runner() {
        let (store, registry, coordinator) = setup();
        let job = store
            .insert(NewJob::new("owner-1", JobKind::Import, "zendesk"))
            .await
            .unwrap();
        store.claim(job.id).await.unwrap().unwrap();
        let (signal, _guard) = registry.register(job.id);

        let outcome = coordinator.cancel(job.id, false).await.unwrap();
        assert!(outcome.changed);
        assert!(outcome.signaled);
        assert!(signal.is_canceled());
    }

    #[tokio::test]
    async fn test_cancel_completed_job_is_noop() {
        let (store, registry, coordinator) = setup();
        let job = store
            .insert(NewJob::new("owner-1", JobKind::Import, "zendesk"))
            .await
            .unwrap();
        store.claim(job.id).await.unwrap().unwrap();
        store.update_by_id(job.id, JobPatch::complete()).await.unwrap();
        let (signal, _guard) = registry.register(job.id);

        let outcome = coordinator.cancel(job.id, false).await.unwrap();
        assert!(!outcome.changed);
        assert!(!outcome.signaled);
        assert!(!signal.is_canceled());
        assert_eq!(outcome.job.status, JobStatus::Completed);
        assert_eq!(outcome.job.progress, 100);
    }

    #[tokio::test]
    async fn test_force_after_plain_cancel_aborts_runner() {
        let (store, registry, coordinator) = setup();
        let job = store
            .insert(NewJob::new("owner-1", JobKind::Import, "zendesk"))
            .await
            .unwrap();
        store.claim(job.id).await.unwrap().unwrap();
        let (signal, guard) = registry.register(job.id);
        let stuck = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await
        });
        registry.attach_abort(job.id, stuck.abort_handle());

        let plain = coordinator.cancel(job.id, false).await.unwrap();
        assert!(plain.changed);
        assert!(plain.signaled);
        assert!(signal.is_canceled());
        assert!(registry.contains(job.id));

        let forced = coordinator.cancel(job.id, true).await.unwrap();
        assert!(!forced.changed);
        assert!(forced.signaled);
        assert_eq!(forced.job.status, JobStatus::Canceled);
        assert!(!registry.contains(job.id));
        assert!(stuck.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_force_without_local_runner_reports_unsignaled() {
        let (store, _registry, coordinator) = setup();
        let job = store
            .insert(NewJob::new("owner-1", JobKind::Import, "zendesk"))
            .await
            .unwrap();
        coordinator.cancel(job.id, false).await.unwrap();

        let outcome = coordinator.cancel(job.id, true).await.unwrap();
        assert!(!outcome.changed);
        assert!(!outcome.signaled);
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let (_store, _registry, coordinator) = setup();
        let id = Uuid::new_v4();
        let err = coordinator.cancel(id, false).await.unwrap_err();
        assert!(matches!(err, Error::JobNotFound(got) if got == id));
    }
}
