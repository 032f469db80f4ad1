//! In-process cancellation signals for running jobs.
//!
//! The registry is local to the process that spawned the runners and is
//! advisory only: the job record store decides whether a job is canceled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::task::AbortHandle;
use tracing::{debug, error};
use uuid::Uuid;

/// Flag checked by the runner at every page boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct RunnerEntry {
    signal: CancelSignal,
    abort: Option<AbortHandle>,
}

/// Jobs currently executing in this process.
#[derive(Default)]
pub struct RunnerRegistry {
    runners: RwLock<HashMap<Uuid, RunnerEntry>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `job_id` and return its signal plus a guard that untracks it on drop.
    pub fn register(self: &Arc<Self>, job_id: Uuid) -> (CancelSignal, RunnerGuard) {
        let signal = CancelSignal::new();
        match self.runners.write() {
            Ok(mut runners) => {
                runners.insert(
                    job_id,
                    RunnerEntry {
                        signal: signal.clone(),
                        abort: None,
                    },
                );
            }
            Err(e) => error!(subsystem = "jobs", component = "registry", "RwLock poisoned registering runner: {e}"),
        }
        debug!(subsystem = "jobs", component = "registry", job_id = %job_id, "Runner registered");
        (
            signal,
            RunnerGuard {
                registry: Arc::clone(self),
                job_id,
            },
        )
    }

    /// Attach the task handle used by forced cancellation.
    pub fn attach_abort(&self, job_id: Uuid, handle: AbortHandle) {
        match self.runners.write() {
            Ok(mut runners) => {
                if let Some(entry) = runners.get_mut(&job_id) {
                    entry.abort = Some(handle);
                }
            }
            Err(e) => error!(subsystem = "jobs", component = "registry", "RwLock poisoned attaching abort handle: {e}"),
        }
    }

    /// Ask the local runner to stop at its next page boundary.
    /// Returns false when no such runner lives in this process.
    pub fn signal(&self, job_id: Uuid) -> bool {
        match self.runners.read() {
            Ok(runners) => match runners.get(&job_id) {
                Some(entry) => {
                    entry.signal.cancel();
                    true
                }
                None => false,
            },
            Err(e) => {
                error!(subsystem = "jobs", component = "registry", "RwLock poisoned signaling runner: {e}");
                false
            }
        }
    }

    /// Signal and abort the local runner task immediately.
    pub fn abort(&self, job_id: Uuid) -> bool {
        let entry = match self.runners.write() {
            Ok(mut runners) => runners.remove(&job_id),
            Err(e) => {
                error!(subsystem = "jobs", component = "registry", "RwLock poisoned aborting runner: {e}");
                None
            }
        };
        match entry {
            Some(entry) => {
                entry.signal.cancel();
                if let Some(handle) = entry.abort {
                    handle.abort();
                }
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, job_id: Uuid) -> bool {
        self.runners
            .read()
            .map(|runners| runners.contains_key(&job_id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.runners.read().map(|runners| runners.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, job_id: Uuid) {
        if let Ok(mut runners) = self.runners.write() {
            runners.remove(&job_id);
        }
    }
}

/// Removes the registry entry when the runner future finishes or is dropped.
pub struct RunnerGuard {
    registry: Arc<RunnerRegistry>,
    job_id: Uuid,
}

impl Drop for RunnerGuard {
    fn drop(&mut self) {
        self.registry.remove(self.job_id);
        debug!(subsystem = "jobs", component = "registry", job_id = %self.job_id, "Runner unregistered");
    }
}
