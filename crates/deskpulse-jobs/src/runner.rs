//! Paginated job runner.
//!
//! One runner call drives one claimed job page by page: check for
//! cancellation, fetch, persist, write progress. Cancellation is only
//! observed between pages, so a page is either fully written or not started.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use deskpulse_core::{
    defaults, Error, Job, JobPatch, JobStatus, JobStore, Result, UpdateOutcome,
};

use crate::cancel::CancelSignal;
use crate::handler::JobWork;
use crate::retry::RetryPolicy;
use crate::worker::WorkerEvent;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Canceled,
    Failed(String),
    /// The job was not pending, so this runner never owned it.
    NotClaimed,
}

impl RunOutcome {
    fn for_row(job: &Job) -> Self {
        match job.status {
            JobStatus::Completed => RunOutcome::Completed,
            JobStatus::Canceled => RunOutcome::Canceled,
            JobStatus::Failed => RunOutcome::Failed(job.error_detail.clone().unwrap_or_default()),
            JobStatus::Pending | JobStatus::Running => RunOutcome::NotClaimed,
        }
    }
}

/// Progress percentage for a running job after a page completes.
///
/// Uses pages when their total is known, else counts, else moves a tenth of
/// the remaining distance. Never exceeds the running cap or drops below
/// `previous`.
pub fn derive_progress(
    previous: i32,
    current_page: i32,
    total_pages: Option<i32>,
    current_count: i64,
    total_count: Option<i64>,
) -> i32 {
    let cap = defaults::JOB_RUNNING_PROGRESS_CAP;
    let derived: i64 = match (total_pages, total_count) {
        (Some(total), _) if total > 0 => i64::from(current_page) * 100 / i64::from(total),
        (_, Some(total)) if total > 0 => current_count.saturating_mul(100) / total,
        _ => i64::from(previous) + i64::from((cap - previous).max(0) / 10) + 1,
    };
    // Counts may run far past a stale declared total; clamp before narrowing.
    let derived = derived.clamp(0, i64::from(cap)) as i32;
    derived.max(previous)
}

/// Executes claimed jobs against the record store.
#[derive(Clone)]
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    retry: RetryPolicy,
    default_page_size: u32,
    event_tx: Option<broadcast::Sender<WorkerEvent>>,
}

impl JobRunner {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
            default_page_size: defaults::JOB_PAGE_SIZE,
            event_tx: None,
        }
    }

    /// Backoff for store reads and writes.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Page size for jobs whose params do not set one.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.default_page_size = page_size.clamp(1, defaults::JOB_PAGE_SIZE_MAX);
        self
    }

    /// Emit `WorkerEvent::JobProgress` after each page.
    pub fn with_events(mut self, event_tx: broadcast::Sender<WorkerEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Claim `job_id` with a check-and-set, then run it.
    pub async fn claim_and_run(
        &self,
        job_id: Uuid,
        work: &JobWork,
        cancel: &CancelSignal,
    ) -> Result<RunOutcome> {
        match self.store.claim(job_id).await? {
            Some(job) => Ok(self.run(job, work, cancel).await),
            None => {
                debug!(subsystem = "jobs", component = "runner", op = "claim", job_id = %job_id, "Job not claimable");
                Ok(RunOutcome::NotClaimed)
            }
        }
    }

    /// Run an already claimed (`running`) job to a terminal state.
    pub async fn run(&self, job: Job, work: &JobWork, cancel: &CancelSignal) -> RunOutcome {
        let start = Instant::now();
        let job_id = job.id;
        let kind = job.kind;

        let page_size = match job.job_params() {
            Ok(params) => params.page_size.unwrap_or(self.default_page_size),
            Err(e) => return self.fail(job_id, format!("invalid job params: {e}")).await,
        };

        info!(
            subsystem = "jobs",
            component = "runner",
            op = "run",
            job_id = %job_id,
            job_kind = %kind,
            provider = %job.provider,
            page_size,
            "Running job"
        );

        let mut current = job;
        let outcome = loop {
            // Page boundary: the local signal first, then the authoritative row.
            if cancel.is_canceled() {
                break self.finish_canceled(job_id).await;
            }
            match self.read(job_id).await {
                Ok(Some(row)) if row.status == JobStatus::Running => {}
                Ok(Some(row)) => {
                    debug!(subsystem = "jobs", component = "runner", job_id = %job_id, status = %row.status, "Job left running state externally");
                    break RunOutcome::for_row(&row);
                }
                Ok(None) => break RunOutcome::Failed("job record disappeared".to_string()),
                Err(e) => break self.fail_after_store_error(job_id, e).await,
            }

            let page = match work
                .fetch
                .fetch_page(&current, current.cursor.as_deref(), page_size)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    let detail = format!("fetch page {} failed: {e}", current.current_page + 1);
                    break self.fail(job_id, detail).await;
                }
            };

            let written = match work.sink.persist(&current, &page).await {
                Ok(written) => written,
                Err(e) => {
                    let detail = format!("persist page {} failed: {e}", current.current_page + 1);
                    break self.fail(job_id, detail).await;
                }
            };

            let page_no = current.current_page + 1;
            let count = current.current_count + written as i64;
            let total_pages = current.total_pages.or(page.total_pages);
            let total_count = current.total_count.or(page.total_count);

            let patch = if page.is_last() {
                JobPatch {
                    current_page: Some(page_no),
                    current_count: Some(count),
                    ..JobPatch::complete()
                }
            } else {
                let progress =
                    derive_progress(current.progress, page_no, total_pages, count, total_count);
                JobPatch::progress(page_no, count, progress).with_cursor(page.next_cursor.clone())
            };
            let patch = patch.with_totals(total_pages, total_count);

            match self.write(job_id, patch).await {
                Ok(UpdateOutcome::Applied(row)) if row.is_terminal() => {
                    break RunOutcome::for_row(&row);
                }
                Ok(UpdateOutcome::Applied(row)) => {
                    debug!(
                        subsystem = "jobs",
                        component = "runner",
                        op = "page",
                        job_id = %job_id,
                        page = row.current_page,
                        item_count = page.items.len(),
                        progress = row.progress,
                        "Page persisted"
                    );
                    if let Some(tx) = &self.event_tx {
                        let _ = tx.send(WorkerEvent::JobProgress {
                            job_id,
                            progress: row.progress,
                            current_page: row.current_page,
                        });
                    }
                    current = row;
                }
                // Lost the race to an external cancel or the reaper.
                Ok(UpdateOutcome::Rejected(row)) => break RunOutcome::for_row(&row),
                Err(e) => break self.fail_after_store_error(job_id, e).await,
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            RunOutcome::Completed => {
                info!(subsystem = "jobs", component = "runner", job_id = %job_id, job_kind = %kind, duration_ms, "Job completed")
            }
            RunOutcome::Canceled => {
                info!(subsystem = "jobs", component = "runner", job_id = %job_id, job_kind = %kind, duration_ms, "Job canceled")
            }
            RunOutcome::Failed(detail) => {
                warn!(subsystem = "jobs", component = "runner", job_id = %job_id, job_kind = %kind, duration_ms, error = %detail, "Job failed")
            }
            RunOutcome::NotClaimed => {}
        }
        outcome
    }

    async fn read(&self, job_id: Uuid) -> Result<Option<Job>> {
        let store = &self.store;
        self.retry
            .retry("get", || async move { store.get(job_id).await }, Error::is_transient)
            .await
    }

    async fn write(&self, job_id: Uuid, patch: JobPatch) -> Result<UpdateOutcome> {
        let store = &self.store;
        let patch = &patch;
        self.retry
            .retry(
                "update_by_id",
                || async move { store.update_by_id(job_id, patch.clone()).await },
                Error::is_transient,
            )
            .await
    }

    async fn finish_canceled(&self, job_id: Uuid) -> RunOutcome {
        match self.write(job_id, JobPatch::cancel()).await {
            Ok(outcome) => RunOutcome::for_row(outcome.job()),
            Err(e) => {
                error!(subsystem = "jobs", component = "runner", op = "cancel", job_id = %job_id, error = %e, "Failed to record cancellation");
                RunOutcome::Canceled
            }
        }
    }

    async fn fail(&self, job_id: Uuid, detail: String) -> RunOutcome {
        match self.write(job_id, JobPatch::fail(detail.clone())).await {
            Ok(outcome) => RunOutcome::for_row(outcome.job()),
            Err(e) => {
                error!(subsystem = "jobs", component = "runner", op = "fail", job_id = %job_id, error = %e, "Failed to record job failure");
                RunOutcome::Failed(detail)
            }
        }
    }

    /// Retries are exhausted; one last attempt to mark the job failed.
    async fn fail_after_store_error(&self, job_id: Uuid, err: Error) -> RunOutcome {
        if let Error::JobNotFound(_) = err {
            return RunOutcome::Failed("job record disappeared".to_string());
        }
        let detail = format!("job store unavailable: {err}");
        error!(subsystem = "jobs", component = "runner", job_id = %job_id, error = %err, "Store unavailable, failing job");
        match self.store.update_by_id(job_id, JobPatch::fail(detail.clone())).await {
            Ok(UpdateOutcome::Rejected(row)) => RunOutcome::for_row(&row),
            _ => RunOutcome::Failed(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_progress_from_pages() {
        assert_eq!(derive_progress(0, 1, Some(5), 0, None), 20);
        assert_eq!(derive_progress(20, 3, Some(5), 0, None), 60);
        assert_eq!(derive_progress(80, 5, Some(5), 0, None), 99);
    }

    #[test]
    fn test_derive_progress_from_counts() {
        assert_eq!(derive_progress(0, 1, None, 250, Some(1000)), 25);
        assert_eq!(derive_progress(0, 1, Some(0), 500, Some(1000)), 50);
    }

    #[test]
    fn test_derive_progress_incremental_approaches_cap() {
        let mut progress = 0;
        for page in 1..=200 {
            let next = derive_progress(progress, page, None, 0, None);
            assert!(next >= progress);
            assert!(next <= defaults::JOB_RUNNING_PROGRESS_CAP);
            progress = next;
        }
        assert_eq!(progress, defaults::JOB_RUNNING_PROGRESS_CAP);
        assert_eq!(derive_progress(0, 1, None, 0, None), 10);
    }

    #[test]
    fn test_derive_progress_counts_past_declared_total() {
        let cap = defaults::JOB_RUNNING_PROGRESS_CAP;
        assert_eq!(derive_progress(0, 1, None, i64::MAX / 2, Some(1)), cap);
        assert_eq!(derive_progress(0, 1, None, 5_000_000_000_000, Some(3)), cap);
        assert_eq!(derive_progress(40, 1_000_000, Some(2), 0, None), cap);
        assert_eq!(derive_progress(0, i32::MAX, Some(1), 0, None), cap);
    }

    #[test]
    fn test_derive_progress_never_decreases() {
        // Provider grew its total between pages.
        assert_eq!(derive_progress(60, 4, Some(10), 0, None), 60);
    }
}
