//! In-memory [`JobSource`] for tracker and indicator tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use deskpulse_core::{Error, Job, JobKind, JobSource, JobStatus, NewJob, Result};

#[derive(Default)]
pub(crate) struct FakeJobSource {
    /// Insertion order; newest last.
    jobs: Mutex<Vec<Job>>,
    failing: AtomicU32,
}

impl FakeJobSource {
    pub(crate) fn add(&self, kind: JobKind) -> Uuid {
        let job = Job::pending(NewJob::new("owner-1", kind, "zendesk"), Utc::now()).unwrap();
        let id = job.id;
        self.jobs.lock().unwrap().push(job);
        id
    }

    pub(crate) fn set(&self, id: Uuid, status: JobStatus, progress: i32) {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.iter_mut().find(|j| j.id == id).unwrap();
        job.status = status;
        job.progress = progress;
    }

    pub(crate) fn fail_next(&self, n: u32) {
        self.failing.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobSource for FakeJobSource {
    async fn get_job(&self, owner_id: &str, id: Uuid) -> Result<Option<Job>> {
        if self
            .failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Request("connection refused".to_string()));
        }
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .iter()
            .find(|j| j.id == id && j.owner_id == owner_id)
            .cloned())
    }

    async fn list_active_jobs(&self, owner_id: &str) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .iter()
            .rev()
            .filter(|j| j.owner_id == owner_id && j.status.is_active())
            .cloned()
            .collect())
    }
}
