//! Per-kind job progress tracking.
//!
//! A [`ProgressTracker`] follows at most one job of its kind. While a job is
//! tracked, a background task polls the [`JobSource`] and publishes the
//! result on a watch channel. Visibility is a display flag only.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use deskpulse_core::{defaults, Job, JobKind, JobSource, JobStatus, Result};

/// Observable tracker state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerState {
    /// The tracked job, `None` once it was observed terminal or cleared.
    pub current_job_id: Option<Uuid>,
    pub progress: i32,
    pub is_visible: bool,
    /// Last status seen for the tracked (or just finished) job.
    pub status: Option<JobStatus>,
}

impl Default for TrackerState {
    fn default() -> Self {
        Self {
            current_job_id: None,
            progress: 0,
            is_visible: true,
            status: None,
        }
    }
}

impl TrackerState {
    pub fn is_active(&self) -> bool {
        self.current_job_id.is_some()
    }

    /// Fold a polled snapshot in. Snapshots of a job that is no longer
    /// tracked are ignored. Returns whether anything changed.
    fn apply_snapshot(&mut self, job: &Job) -> bool {
        if self.current_job_id != Some(job.id) {
            return false;
        }
        let before = self.clone();
        self.status = Some(job.status);
        self.progress = self.progress.max(job.progress);
        if job.is_terminal() {
            self.current_job_id = None;
        }
        *self != before
    }

    fn forget(&mut self, job_id: Uuid) -> bool {
        if self.current_job_id != Some(job_id) {
            return false;
        }
        self.current_job_id = None;
        true
    }
}

/// Client-side state for "is a job of this kind running, and how far along".
pub struct ProgressTracker {
    kind: JobKind,
    source: Arc<dyn JobSource>,
    owner_id: String,
    poll_interval: Duration,
    state: Arc<watch::Sender<TrackerState>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl ProgressTracker {
    pub fn new(kind: JobKind, source: Arc<dyn JobSource>, owner_id: impl Into<String>) -> Self {
        let (state, _) = watch::channel(TrackerState::default());
        Self {
            kind,
            source,
            owner_id: owner_id.into(),
            poll_interval: Duration::from_millis(defaults::TRACKER_POLL_INTERVAL_MS),
            state: Arc::new(state),
            poller: Mutex::new(None),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackerState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> TrackerState {
        self.state.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.state.borrow().is_active()
    }

    /// Track `job_id`, replacing any job tracked before. Must be called
    /// from within a tokio runtime.
    pub fn start(&self, job_id: Uuid) {
        self.state.send_modify(|s| {
            s.current_job_id = Some(job_id);
            s.progress = 0;
            s.is_visible = true;
            s.status = Some(JobStatus::Pending);
        });

        let task = tokio::spawn(poll_job(
            self.source.clone(),
            self.owner_id.clone(),
            job_id,
            self.poll_interval,
            self.state.clone(),
        ));
        self.replace_poller(Some(task));
        debug!(subsystem = "client", component = "tracker", job_kind = %self.kind, job_id = %job_id, "Tracking job");
    }

    /// Flip display visibility. Polling and progress are unaffected.
    pub fn toggle_visibility(&self) {
        self.state.send_modify(|s| s.is_visible = !s.is_visible);
    }

    /// Stop tracking. The job itself keeps running server-side.
    pub fn clear(&self) {
        self.replace_poller(None);
        self.state.send_if_modified(|s| {
            let changed = s.current_job_id.is_some();
            s.current_job_id = None;
            changed
        });
    }

    /// Adopt the newest active job of this kind, if any and if nothing is
    /// tracked yet.
    pub async fn hydrate(&self) -> Result<Option<Uuid>> {
        let tracked = self.state.borrow().current_job_id;
        if let Some(id) = tracked {
            return Ok(Some(id));
        }
        let jobs = self.source.list_active_jobs(&self.owner_id).await?;
        let Some(job) = jobs.into_iter().find(|j| j.kind == self.kind) else {
            return Ok(None);
        };
        self.start(job.id);
        self.state.send_if_modified(|s| s.apply_snapshot(&job));
        Ok(Some(job.id))
    }

    fn replace_poller(&self, next: Option<JoinHandle<()>>) {
        match self.poller.lock() {
            Ok(mut poller) => {
                if let Some(previous) = std::mem::replace(&mut *poller, next) {
                    previous.abort();
                }
            }
            Err(e) => warn!(subsystem = "client", component = "tracker", "Mutex poisoned replacing poller: {e}"),
        }
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.replace_poller(None);
    }
}

async fn poll_job(
    source: Arc<dyn JobSource>,
    owner_id: String,
    job_id: Uuid,
    every: Duration,
    state: Arc<watch::Sender<TrackerState>>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let tracking = state.borrow().current_job_id == Some(job_id);
        if !tracking {
            return;
        }
        match source.get_job(&owner_id, job_id).await {
            Ok(Some(job)) => {
                let terminal = job.is_terminal();
                state.send_if_modified(|s| s.apply_snapshot(&job));
                if terminal {
                    debug!(subsystem = "client", component = "tracker", job_id = %job_id, status = %job.status, "Tracked job finished");
                    return;
                }
            }
            Ok(None) => {
                state.send_if_modified(|s| s.forget(job_id));
                debug!(subsystem = "client", component = "tracker", job_id = %job_id, "Tracked job not found");
                return;
            }
            Err(e) => {
                warn!(subsystem = "client", component = "tracker", job_id = %job_id, error = %e, "Poll failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeJobSource;

    fn tracker(source: &Arc<FakeJobSource>) -> ProgressTracker {
        ProgressTracker::new(JobKind::Import, source.clone(), "owner-1")
            .with_poll_interval(Duration::from_millis(100))
    }

    async fn wait_until(rx: &mut watch::Receiver<TrackerState>, pred: impl Fn(&TrackerState) -> bool) {
        rx.wait_for(|s| pred(s)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_resets_and_polls() {
        let source = Arc::new(FakeJobSource::default());
        let job = source.add(JobKind::Import);
        let tracker = tracker(&source);
        let mut rx = tracker.subscribe();

        tracker.start(job);
        assert_eq!(tracker.snapshot().progress, 0);
        assert!(tracker.is_active());

        source.set(job, JobStatus::Running, 40);
        wait_until(&mut rx, |s| s.progress == 40).await;
        assert_eq!(tracker.snapshot().status, Some(JobStatus::Running));

        source.set(job, JobStatus::Completed, 100);
        wait_until(&mut rx, |s| !s.is_active()).await;
        assert_eq!(tracker.snapshot().progress, 100);
        assert_eq!(tracker.snapshot().status, Some(JobStatus::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_visibility_keeps_progress() {
        let source = Arc::new(FakeJobSource::default());
        let job = source.add(JobKind::Import);
        source.set(job, JobStatus::Running, 30);
        let tracker = tracker(&source);
        let mut rx = tracker.subscribe();

        tracker.start(job);
        wait_until(&mut rx, |s| s.progress == 30).await;
        tracker.toggle_visibility();
        let state = tracker.snapshot();
        assert!(!state.is_visible);
        assert_eq!(state.progress, 30);
        assert!(state.is_active());

        tracker.toggle_visibility();
        assert!(tracker.snapshot().is_visible);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_replaces_tracked_job() {
        let source = Arc::new(FakeJobSource::default());
        let first = source.add(JobKind::Import);
        let second = source.add(JobKind::Import);
        source.set(first, JobStatus::Running, 80);
        let tracker = tracker(&source);
        let mut rx = tracker.subscribe();

        tracker.start(first);
        wait_until(&mut rx, |s| s.progress == 80).await;
        tracker.start(second);
        assert_eq!(tracker.snapshot().progress, 0);

        source.set(second, JobStatus::Running, 10);
        wait_until(&mut rx, |s| s.progress == 10).await;
        assert_eq!(tracker.snapshot().current_job_id, Some(second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_clears() {
        let source = Arc::new(FakeJobSource::default());
        let tracker = tracker(&source);
        let mut rx = tracker.subscribe();

        tracker.start(Uuid::new_v4());
        wait_until(&mut rx, |s| !s.is_active()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_errors_keep_tracking() {
        let source = Arc::new(FakeJobSource::default());
        let job = source.add(JobKind::Import);
        source.fail_next(2);
        let tracker = tracker(&source);
        let mut rx = tracker.subscribe();

        tracker.start(job);
        source.set(job, JobStatus::Running, 50);
        wait_until(&mut rx, |s| s.progress == 50).await;
        assert!(tracker.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hydrate_adopts_newest_job_of_kind() {
        let source = Arc::new(FakeJobSource::default());
        source.add(JobKind::Analysis);
        let import = source.add(JobKind::Import);
        source.set(import, JobStatus::Running, 25);
        let tracker = tracker(&source);

        assert_eq!(tracker.hydrate().await.unwrap(), Some(import));
        let state = tracker.snapshot();
        assert_eq!(state.current_job_id, Some(import));
        assert_eq!(state.progress, 25);
    }

    #[test]
    fn test_clear_without_runtime() {
        let source = Arc::new(FakeJobSource::default());
        let tracker = tracker(&source);
        tracker.clear();
        assert!(!tracker.is_active());
        assert!(tracker.snapshot().is_visible);
    }
}
