//! Job handlers for each job kind.

use std::sync::Arc;

use async_trait::async_trait;

use deskpulse_core::{Job, JobKind, PageSink, ProviderFetch, Result};

/// Collaborators the runner pages through for one job.
#[derive(Clone)]
pub struct JobWork {
    pub fetch: Arc<dyn ProviderFetch>,
    pub sink: Arc<dyn PageSink>,
}

impl JobWork {
    pub fn new(fetch: Arc<dyn ProviderFetch>, sink: Arc<dyn PageSink>) -> Self {
        Self { fetch, sink }
    }
}

/// Builds the work for jobs of one kind.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job kind this handler processes.
    fn kind(&self) -> JobKind;

    /// Resolve fetch and sink for `job`. An error fails the job before the first page.
    async fn prepare(&self, job: &Job) -> Result<JobWork>;
}

/// Handler returning the same collaborators for every job of its kind.
pub struct StaticHandler {
    kind: JobKind,
    work: JobWork,
}

impl StaticHandler {
    pub fn new(kind: JobKind, work: JobWork) -> Self {
        Self { kind, work }
    }
}

#[async_trait]
impl JobHandler for StaticHandler {
    fn kind(&self) -> JobKind {
        self.kind
    }

    async fn prepare(&self, _job: &Job) -> Result<JobWork> {
        Ok(self.work.clone())
    }
}
