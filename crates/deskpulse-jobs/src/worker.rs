//! Job worker that claims pending jobs and runs them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, Notify, Semaphore};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use deskpulse_core::{defaults, Job, JobKind, JobPatch, JobStore, Result, UpdateOutcome};

use crate::cancel::RunnerRegistry;
use crate::handler::JobHandler;
use crate::reaper::Reaper;
use crate::retry::RetryPolicy;
use crate::runner::{JobRunner, RunOutcome};

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Safety-net polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrent jobs.
    pub max_concurrent_jobs: usize,
    /// Whether to enable job processing.
    pub enabled: bool,
    /// Page size for jobs that do not choose one.
    pub page_size: u32,
    pub store_retry_attempts: u32,
    pub store_retry_base_ms: u64,
    pub heartbeat_interval: Duration,
    pub stale_after: Duration,
    pub reap_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::JOB_POLL_INTERVAL_MS,
            max_concurrent_jobs: defaults::JOB_MAX_CONCURRENT,
            enabled: true,
            page_size: defaults::JOB_PAGE_SIZE,
            store_retry_attempts: defaults::JOB_STORE_RETRY_ATTEMPTS,
            store_retry_base_ms: defaults::JOB_STORE_RETRY_BASE_MS,
            heartbeat_interval: Duration::from_secs(defaults::JOB_HEARTBEAT_INTERVAL_SECS),
            stale_after: Duration::from_secs(defaults::JOB_STALE_AFTER_SECS),
            reap_interval: Duration::from_secs(defaults::JOB_REAP_INTERVAL_SECS),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_MAX_CONCURRENT` | `4` | Max concurrent jobs |
    /// | `JOB_POLL_INTERVAL_MS` | `5000` | Polling interval when no job is pending |
    /// | `JOB_PAGE_SIZE` | `100` | Default provider page size |
    /// | `JOB_STORE_RETRY_ATTEMPTS` | `4` | Attempts per progress/status write |
    /// | `JOB_STORE_RETRY_BASE_MS` | `200` | First store retry delay |
    /// | `JOB_HEARTBEAT_INTERVAL_SECS` | `15` | Heartbeat period of a running job |
    /// | `JOB_STALE_AFTER_SECS` | `120` | Heartbeat age after which a job is reaped |
    /// | `JOB_REAP_INTERVAL_SECS` | `30` | Reaper sweep period |
    pub fn from_env() -> Self {
        let d = Self::default();
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        Self {
            enabled,
            max_concurrent_jobs: env_parse("JOB_MAX_CONCURRENT")
                .unwrap_or(d.max_concurrent_jobs)
                .max(1),
            poll_interval_ms: env_parse("JOB_POLL_INTERVAL_MS").unwrap_or(d.poll_interval_ms),
            page_size: env_parse::<u32>("JOB_PAGE_SIZE")
                .unwrap_or(d.page_size)
                .clamp(1, defaults::JOB_PAGE_SIZE_MAX),
            store_retry_attempts: env_parse("JOB_STORE_RETRY_ATTEMPTS")
                .unwrap_or(d.store_retry_attempts)
                .max(1),
            store_retry_base_ms: env_parse("JOB_STORE_RETRY_BASE_MS")
                .unwrap_or(d.store_retry_base_ms),
            heartbeat_interval: env_parse("JOB_HEARTBEAT_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.heartbeat_interval),
            stale_after: env_parse("JOB_STALE_AFTER_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.stale_after),
            reap_interval: env_parse("JOB_REAP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.reap_interval),
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_store_retry(mut self, attempts: u32, base_ms: u64) -> Self {
        self.store_retry_attempts = attempts.max(1);
        self.store_retry_base_ms = base_ms;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.store_retry_attempts,
            Duration::from_millis(self.store_retry_base_ms),
        )
    }
}

/// Event emitted by the job worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// A job was claimed and its runner started.
    JobStarted { job_id: Uuid, kind: JobKind },
    /// A page was persisted.
    JobProgress {
        job_id: Uuid,
        progress: i32,
        current_page: i32,
    },
    JobCompleted { job_id: Uuid, kind: JobKind },
    JobCanceled { job_id: Uuid, kind: JobKind },
    JobFailed {
        job_id: Uuid,
        kind: JobKind,
        error: String,
    },
    /// The reaper failed a running job whose heartbeat went stale.
    JobReaped { job_id: Uuid },
    WorkerStarted,
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    registry: Arc<RunnerRegistry>,
}

impl WorkerHandle {
    /// Stop claiming new jobs; in-flight jobs run to completion.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutdown_tx.send(()).await.is_err() {
            // Disabled or without handlers: the loop already returned.
            debug!(subsystem = "jobs", component = "worker", "Job worker was not running");
        }
        Ok(())
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }

    /// Runner registry shared with the cancellation coordinator.
    pub fn registry(&self) -> Arc<RunnerRegistry> {
        self.registry.clone()
    }
}

/// Job worker that processes jobs from the record store.
pub struct JobWorker {
    store: Arc<dyn JobStore>,
    config: WorkerConfig,
    handlers: Arc<HashMap<JobKind, Arc<dyn JobHandler>>>,
    registry: Arc<RunnerRegistry>,
    notify: Arc<Notify>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    pub fn new(store: Arc<dyn JobStore>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            store,
            config,
            handlers: Arc::new(HashMap::new()),
            registry: Arc::new(RunnerRegistry::new()),
            notify: Arc::new(Notify::new()),
            event_tx,
        }
    }

    pub fn registry(&self) -> Arc<RunnerRegistry> {
        self.registry.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    fn runner(&self) -> JobRunner {
        JobRunner::new(self.store.clone())
            .with_retry(self.config.retry_policy())
            .with_page_size(self.config.page_size)
            .with_events(self.event_tx.clone())
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();
        let registry = self.registry.clone();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
            registry,
        }
    }

    /// Claim jobs while permits are available; otherwise wait for a wake-up,
    /// the poll interval, or shutdown.
    #[instrument(skip(self, shutdown_rx))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!(subsystem = "jobs", component = "worker", "Job worker is disabled, not starting");
            return;
        }

        let kinds: Vec<JobKind> = self.handlers.keys().copied().collect();
        // An empty kind list would claim every pending job.
        if kinds.is_empty() {
            warn!(subsystem = "jobs", component = "worker", "No job handlers registered, not starting");
            return;
        }

        info!(
            subsystem = "jobs",
            component = "worker",
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_jobs,
            kinds = ?kinds,
            "Job worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let reaper = Reaper::new(self.store.clone(), self.config.stale_after)
            .with_registry(self.registry.clone())
            .with_events(self.event_tx.clone())
            .spawn(self.config.reap_interval);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_jobs));
        let runner = self.runner();
        let mut tasks = JoinSet::new();

        loop {
            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    error!(subsystem = "jobs", component = "worker", error = ?e, "Job task panicked");
                }
            }

            let permit = tokio::select! {
                _ = shutdown_rx.recv() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.store.claim_next(&kinds).await {
                Ok(Some(job)) => {
                    let exec = JobExecution {
                        store: self.store.clone(),
                        handlers: self.handlers.clone(),
                        registry: self.registry.clone(),
                        event_tx: self.event_tx.clone(),
                        runner: runner.clone(),
                        heartbeat_interval: self.config.heartbeat_interval,
                    };
                    tasks.spawn(async move {
                        exec.execute(job).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = self.notify.notified() => {
                            debug!(subsystem = "jobs", component = "worker", "Woken by job insert");
                        }
                        _ = sleep(poll_interval) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!(subsystem = "jobs", component = "worker", op = "claim", error = %e, "Failed to claim job");
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = sleep(poll_interval) => {}
                    }
                }
            }
        }

        info!(subsystem = "jobs", component = "worker", in_flight = tasks.len(), "Job worker received shutdown signal");
        reaper.abort();
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(subsystem = "jobs", component = "worker", error = ?e, "Job task panicked");
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!(subsystem = "jobs", component = "worker", "Job worker stopped");
    }
}

/// Everything one spawned job task needs.
struct JobExecution {
    store: Arc<dyn JobStore>,
    handlers: Arc<HashMap<JobKind, Arc<dyn JobHandler>>>,
    registry: Arc<RunnerRegistry>,
    event_tx: broadcast::Sender<WorkerEvent>,
    runner: JobRunner,
    heartbeat_interval: Duration,
}

impl JobExecution {
    async fn execute(self, job: Job) {
        let start = Instant::now();
        let job_id = job.id;
        let kind = job.kind;

        info!(subsystem = "jobs", component = "worker", job_id = %job_id, job_kind = %kind, owner_id = %job.owner_id, "Processing job");
        let _ = self.event_tx.send(WorkerEvent::JobStarted { job_id, kind });

        let work = match self.handlers.get(&kind) {
            Some(handler) => handler.prepare(&job).await,
            None => Err(deskpulse_core::Error::Internal(format!(
                "No handler for job kind: {kind}"
            ))),
        };
        let work = match work {
            Ok(work) => work,
            Err(e) => {
                let detail = e.to_string();
                warn!(subsystem = "jobs", component = "worker", job_id = %job_id, error = %detail, "Job could not be prepared");
                if let Err(e) = self.store.update_by_id(job_id, JobPatch::fail(detail.clone())).await {
                    error!(subsystem = "jobs", component = "worker", job_id = %job_id, error = %e, "Failed to mark job as failed");
                }
                let _ = self.event_tx.send(WorkerEvent::JobFailed { job_id, kind, error: detail });
                return;
            }
        };

        let (cancel, guard) = self.registry.register(job_id);
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.store.clone(),
            job_id,
            self.heartbeat_interval,
        ));

        let runner = self.runner.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            runner.run(job, &work, &cancel).await
        });
        self.registry.attach_abort(job_id, task.abort_handle());

        let outcome = match task.await {
            Ok(outcome) => outcome,
            // Forced cancellation; the coordinator already wrote the row.
            Err(e) if e.is_cancelled() => RunOutcome::Canceled,
            Err(e) => {
                error!(subsystem = "jobs", component = "worker", job_id = %job_id, error = ?e, "Runner panicked");
                let detail = "runner panicked".to_string();
                let _ = self.store.update_by_id(job_id, JobPatch::fail(detail.clone())).await;
                RunOutcome::Failed(detail)
            }
        };
        heartbeat.abort();

        debug!(subsystem = "jobs", component = "worker", job_id = %job_id, duration_ms = start.elapsed().as_millis() as u64, outcome = ?outcome, "Job task finished");
        let event = match outcome {
            RunOutcome::Completed => WorkerEvent::JobCompleted { job_id, kind },
            RunOutcome::Canceled => WorkerEvent::JobCanceled { job_id, kind },
            RunOutcome::Failed(error) => WorkerEvent::JobFailed { job_id, kind, error },
            RunOutcome::NotClaimed => return,
        };
        let _ = self.event_tx.send(event);
    }
}

/// Refresh `heartbeat_at` until the job leaves `running` or the task is aborted.
async fn heartbeat_loop(store: Arc<dyn JobStore>, job_id: Uuid, every: Duration) {
    if every.is_zero() {
        return;
    }
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately; the claim already set heartbeat_at.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match store.update_by_id(job_id, JobPatch::heartbeat()).await {
            Ok(UpdateOutcome::Applied(_)) => {
                debug!(subsystem = "jobs", component = "heartbeat", job_id = %job_id, "Heartbeat");
            }
            Ok(UpdateOutcome::Rejected(_)) => return,
            Err(e) if e.is_not_found() => return,
            Err(e) => {
                warn!(subsystem = "jobs", component = "heartbeat", job_id = %job_id, error = %e, "Heartbeat write failed");
            }
        }
    }
}

/// Builder for creating a job worker with handlers.
pub struct WorkerBuilder {
    store: Arc<dyn JobStore>,
    config: WorkerConfig,
    handlers: Vec<Arc<dyn JobHandler>>,
    registry: Option<Arc<RunnerRegistry>>,
    notify: Option<Arc<Notify>>,
}

impl WorkerBuilder {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            config: WorkerConfig::default(),
            handlers: Vec::new(),
            registry: None,
            notify: None,
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Share a registry with a [`CancellationCoordinator`](crate::CancellationCoordinator).
    pub fn with_registry(mut self, registry: Arc<RunnerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Wake-up handle the store signals on insert.
    pub fn with_notify(mut self, notify: Arc<Notify>) -> Self {
        self.notify = Some(notify);
        self
    }

    pub fn build(self) -> JobWorker {
        let mut worker = JobWorker::new(self.store, self.config);
        if let Some(registry) = self.registry {
            worker.registry = registry;
        }
        if let Some(notify) = self.notify {
            worker.notify = notify;
        }
        let mut handlers = HashMap::new();
        for handler in self.handlers {
            let kind = handler.kind();
            debug!(subsystem = "jobs", component = "worker", job_kind = %kind, "Registered job handler");
            handlers.insert(kind, handler);
        }
        worker.handlers = Arc::new(handlers);
        worker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval_ms, defaults::JOB_POLL_INTERVAL_MS);
        assert_eq!(config.max_concurrent_jobs, 4);
        assert_eq!(config.page_size, 100);
        assert!(config.enabled);
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::default()
            .with_poll_interval(1000)
            .with_max_concurrent(8)
            .with_enabled(false)
            .with_stale_after(Duration::from_secs(5));

        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.max_concurrent_jobs, 8);
        assert!(!config.enabled);
        assert_eq!(config.stale_after, Duration::from_secs(5));
    }

    #[test]
    fn test_worker_config_max_concurrent_floor() {
        assert_eq!(WorkerConfig::default().with_max_concurrent(0).max_concurrent_jobs, 1);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = WorkerConfig::default().with_store_retry(2, 10).retry_policy();
        assert_eq!(policy.attempts, 2);
        assert_eq!(policy.base_delay, Duration::from_millis(10));
    }

    #[test]
    fn test_worker_event_clone() {
        let job_id = Uuid::new_v4();
        let event = WorkerEvent::JobStarted {
            job_id,
            kind: JobKind::Import,
        };
        assert_eq!(event.clone(), event);
        assert!(format!("{:?}", event).contains("Import"));
    }
}
