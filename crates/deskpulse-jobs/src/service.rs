//! Owner-scoped job operations used by the HTTP layer.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use deskpulse_core::{Error, Job, JobFilter, JobSource, JobStore, NewJob, Result};

use crate::coordinator::{CancelOutcome, CancellationCoordinator};

/// Job creation, lookup and cancellation on behalf of one owner.
///
/// Jobs of other owners are reported as not found.
#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn JobStore>,
    coordinator: CancellationCoordinator,
}

impl JobService {
    pub fn new(store: Arc<dyn JobStore>, coordinator: CancellationCoordinator) -> Self {
        Self { store, coordinator }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub async fn create_job(&self, new: NewJob) -> Result<Job> {
        new.validate()?;
        let job = self.store.insert(new).await?;
        info!(
            subsystem = "jobs",
            component = "service",
            op = "create",
            job_id = %job.id,
            job_kind = %job.kind,
            owner_id = %job.owner_id,
            provider = %job.provider,
            "Job created"
        );
        Ok(job)
    }

    pub async fn get_job(&self, owner_id: &str, id: Uuid) -> Result<Job> {
        match self.store.get(id).await? {
            Some(job) if job.owner_id == owner_id => Ok(job),
            _ => Err(Error::JobNotFound(id)),
        }
    }

    /// Pending and running jobs, newest first.
    pub async fn list_active_jobs(&self, owner_id: &str) -> Result<Vec<Job>> {
        self.store
            .select_by_filter(&JobFilter::active_for_owner(owner_id))
            .await
    }

    pub async fn cancel_job(&self, owner_id: &str, id: Uuid, force: bool) -> Result<CancelOutcome> {
        self.get_job(owner_id, id).await?;
        self.coordinator.cancel(id, force).await
    }
}

#[async_trait]
impl JobSource for JobService {
    async fn get_job(&self, owner_id: &str, id: Uuid) -> Result<Option<Job>> {
        match JobService::get_job(self, owner_id, id).await {
            Ok(job) => Ok(Some(job)),
            Err(Error::JobNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_active_jobs(&self, owner_id: &str) -> Result<Vec<Job>> {
        JobService::list_active_jobs(self, owner_id).await
    }
}
