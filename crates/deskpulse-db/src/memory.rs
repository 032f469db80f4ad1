//! In-memory stores.
//!
//! Same semantics as the Postgres stores, held in a process-local map. Used
//! by `STORE_BACKEND=memory` and by tests that exercise the runner without a
//! database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::Notify;
use uuid::Uuid;

use deskpulse_core::{
    new_v7, Error, Job, JobFilter, JobKind, JobPatch, JobStatus, JobStore, NewJob, Result, Ticket,
    TicketStore, TicketUpsert, UpdateOutcome,
};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::Internal("memory store lock poisoned".to_string()))
}

/// Process-local [`JobStore`].
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    notify: Arc<Notify>,
    /// Remaining `update_by_id` calls that fail with a transient error.
    failing_updates: AtomicU32,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Make the next `n` calls to `update_by_id` fail with `Error::Store`.
    pub fn fail_next_updates(&self, n: u32) {
        self.failing_updates.store(n, Ordering::SeqCst);
    }

    /// Overwrite a stored row as-is, bypassing transition checks.
    ///
    /// Lets tests set up rows such as an old heartbeat on a running job.
    pub fn put(&self, job: Job) -> Result<()> {
        lock(&self.jobs)?.insert(job.id, job);
        Ok(())
    }

    pub fn len(&self) -> usize {
        lock(&self.jobs).map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, new: NewJob) -> Result<Job> {
        let job = Job::pending(new, Utc::now())?;
        lock(&self.jobs)?.insert(job.id, job.clone());
        self.notify.notify_one();
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(lock(&self.jobs)?.get(&id).cloned())
    }

    async fn update_by_id(&self, id: Uuid, patch: JobPatch) -> Result<UpdateOutcome> {
        if self.take_injected_failure() {
            return Err(Error::Store("injected update failure".to_string()));
        }
        let mut jobs = lock(&self.jobs)?;
        let job = jobs.get_mut(&id).ok_or(Error::JobNotFound(id))?;
        if patch.apply(job, Utc::now()) {
            Ok(UpdateOutcome::Applied(job.clone()))
        } else {
            Ok(UpdateOutcome::Rejected(job.clone()))
        }
    }

    async fn select_by_filter(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let jobs = lock(&self.jobs)?;
        let mut matched: Vec<Job> = jobs.values().filter(|j| filter.matches(j)).cloned().collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        matched.truncate(filter.effective_limit() as usize);
        Ok(matched)
    }

    async fn claim(&self, id: Uuid) -> Result<Option<Job>> {
        let mut jobs = lock(&self.jobs)?;
        match jobs.get_mut(&id) {
            Some(job) => Ok(job.claim(Utc::now()).then(|| job.clone())),
            None => Ok(None),
        }
    }

    async fn claim_next(&self, kinds: &[JobKind]) -> Result<Option<Job>> {
        let mut jobs = lock(&self.jobs)?;
        let next = jobs
            .values_mut()
            .filter(|j| {
                j.status == JobStatus::Pending
                    && (kinds.is_empty() || kinds.contains(&j.kind))
            })
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        match next {
            Some(job) => Ok(job.claim(Utc::now()).then(|| job.clone())),
            None => Ok(None),
        }
    }
}

/// Process-local [`TicketStore`].
#[derive(Default)]
pub struct MemoryTicketStore {
    tickets: Mutex<HashMap<Uuid, Ticket>>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Result<Vec<Ticket>> {
        let mut tickets: Vec<Ticket> = lock(&self.tickets)?.values().cloned().collect();
        tickets.sort_by_key(|t| t.id);
        Ok(tickets)
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn upsert_tickets(
        &self,
        owner_id: &str,
        provider: &str,
        import_job_id: Uuid,
        upserts: &[TicketUpsert],
    ) -> Result<u64> {
        let mut tickets = lock(&self.tickets)?;
        let now = Utc::now();
        for upsert in upserts {
            let existing = tickets.values_mut().find(|t| {
                t.owner_id == owner_id && t.provider == provider && t.external_id == upsert.external_id
            });
            match existing {
                Some(ticket) => {
                    ticket.subject = upsert.subject.clone();
                    ticket.body = upsert.body.clone();
                    ticket.raw = upsert.raw.clone();
                    ticket.import_job_id = Some(import_job_id);
                    ticket.updated_at = now;
                }
                None => {
                    let ticket = Ticket {
                        id: new_v7(),
                        owner_id: owner_id.to_string(),
                        provider: provider.to_string(),
                        external_id: upsert.external_id.clone(),
                        subject: upsert.subject.clone(),
                        body: upsert.body.clone(),
                        raw: upsert.raw.clone(),
                        import_job_id: Some(import_job_id),
                        analysis: None,
                        analyzed_at: None,
                        created_at: now,
                        updated_at: now,
                    };
                    tickets.insert(ticket.id, ticket);
                }
            }
        }
        Ok(upserts.len() as u64)
    }

    async fn list_unanalyzed(
        &self,
        owner_id: &str,
        provider: &str,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Ticket>> {
        let tickets = lock(&self.tickets)?;
        let mut page: Vec<Ticket> = tickets
            .values()
            .filter(|t| {
                t.owner_id == owner_id
                    && t.provider == provider
                    && t.analyzed_at.is_none()
                    && after.map_or(true, |a| t.id > a)
            })
            .cloned()
            .collect();
        page.sort_by_key(|t| t.id);
        page.truncate(limit.max(0) as usize);
        Ok(page)
    }

    async fn count_unanalyzed(&self, owner_id: &str, provider: &str) -> Result<i64> {
        let tickets = lock(&self.tickets)?;
        Ok(tickets
            .values()
            .filter(|t| t.owner_id == owner_id && t.provider == provider && t.analyzed_at.is_none())
            .count() as i64)
    }

    async fn save_analysis(&self, ticket_id: Uuid, analysis: JsonValue) -> Result<()> {
        let mut tickets = lock(&self.tickets)?;
        let ticket = tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| Error::NotFound(format!("ticket {ticket_id}")))?;
        let now = Utc::now();
        ticket.analysis = Some(analysis);
        ticket.analyzed_at = Some(now);
        ticket.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn import(owner: &str) -> NewJob {
        NewJob::new(owner, JobKind::Import, "zendesk")
    }

    #[tokio::test]
    async fn test_insert_starts_pending() {
        let store = MemoryJobStore::new();
        let job = store.insert(import("o")).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(store.get(job.id).await.unwrap(), Some(job));
    }

    #[tokio::test]
    async fn test_update_unknown_id_is_not_found() {
        let store = MemoryJobStore::new();
        let id = Uuid::new_v4();
        let err = store.update_by_id(id, JobPatch::cancel()).await.unwrap_err();
        assert!(matches!(err, Error::JobNotFound(got) if got == id));
    }

    #[tokio::test]
    async fn test_completed_rejects_later_writes() {
        let store = MemoryJobStore::new();
        let job = store.insert(import("o")).await.unwrap();
        store.claim(job.id).await.unwrap().unwrap();
        store.update_by_id(job.id, JobPatch::complete()).await.unwrap();

        let outcome = store.update_by_id(job.id, JobPatch::cancel()).await.unwrap();
        assert!(!outcome.is_applied());
        assert_eq!(outcome.job().status, JobStatus::Completed);
        assert_eq!(outcome.job().progress, 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_claim_is_exclusive() {
        const CLAIMERS: usize = 8;
        let store = Arc::new(MemoryJobStore::new());
        let job = store.insert(import("o")).await.unwrap();
        let barrier = Arc::new(tokio::sync::Barrier::new(CLAIMERS));

        let tasks: Vec<_> = (0..CLAIMERS)
            .map(|_| {
                let store = store.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    store.claim(job.id).await.unwrap()
                })
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            if let Some(claimed) = task.await.unwrap() {
                assert_eq!(claimed.status, JobStatus::Running);
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.get(job.id).await.unwrap().unwrap().status, JobStatus::Running);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_claim_next_hands_each_job_out_once() {
        const JOBS: usize = 4;
        const CLAIMERS: usize = 8;
        let store = Arc::new(MemoryJobStore::new());
        for _ in 0..JOBS {
            store.insert(import("o")).await.unwrap();
        }
        let barrier = Arc::new(tokio::sync::Barrier::new(CLAIMERS));

        let tasks: Vec<_> = (0..CLAIMERS)
            .map(|_| {
                let store = store.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    store.claim_next(&[JobKind::Import]).await.unwrap()
                })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            if let Some(claimed) = task.await.unwrap() {
                ids.push(claimed.id);
            }
        }
        assert_eq!(ids.len(), JOBS);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), JOBS);
    }

    #[tokio::test]
    async fn test_claim_next_oldest_of_kind() {
        let store = MemoryJobStore::new();
        let first = store.insert(import("o")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let analysis = store
            .insert(NewJob::new("o", JobKind::Analysis, "zendesk"))
            .await
            .unwrap();
        store.insert(import("o")).await.unwrap();

        let claimed = store.claim_next(&[JobKind::Import]).await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        let claimed = store.claim_next(&[JobKind::Analysis]).await.unwrap().unwrap();
        assert_eq!(claimed.id, analysis.id);
        assert!(store.claim_next(&[JobKind::Analysis]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_select_active_for_owner_newest_first() {
        let store = MemoryJobStore::new();
        let old = store.insert(import("a")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let new = store.insert(import("a")).await.unwrap();
        store.insert(import("b")).await.unwrap();
        store.update_by_id(old.id, JobPatch::cancel()).await.unwrap();
        let done = store.insert(import("a")).await.unwrap();
        store.update_by_id(done.id, JobPatch::fail("x")).await.unwrap();

        let active = store
            .select_by_filter(&JobFilter::active_for_owner("a"))
            .await
            .unwrap();
        assert_eq!(active.iter().map(|j| j.id).collect::<Vec<_>>(), vec![new.id]);
    }

    #[tokio::test]
    async fn test_injected_update_failures() {
        let store = MemoryJobStore::new();
        let job = store.insert(import("o")).await.unwrap();
        store.fail_next_updates(1);
        let err = store.update_by_id(job.id, JobPatch::cancel()).await.unwrap_err();
        assert!(err.is_transient());
        assert!(store.update_by_id(job.id, JobPatch::cancel()).await.unwrap().is_applied());
    }

    #[tokio::test]
    async fn test_ticket_upsert_is_idempotent() {
        let tickets = MemoryTicketStore::new();
        let job_id = Uuid::new_v4();
        let items = vec![
            TicketUpsert::from_item(&json!({"id": 1, "subject": "a"})).unwrap(),
            TicketUpsert::from_item(&json!({"id": 2, "subject": "b"})).unwrap(),
        ];
        tickets.upsert_tickets("o", "zendesk", job_id, &items).await.unwrap();
        tickets.upsert_tickets("o", "zendesk", job_id, &items).await.unwrap();
        assert_eq!(tickets.all().unwrap().len(), 2);
        assert_eq!(tickets.count_unanalyzed("o", "zendesk").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_unanalyzed_pages_by_id() {
        let tickets = MemoryTicketStore::new();
        let items: Vec<TicketUpsert> = (0..5)
            .map(|i| TicketUpsert::from_item(&json!({"id": i})).unwrap())
            .collect();
        tickets
            .upsert_tickets("o", "zendesk", Uuid::new_v4(), &items)
            .await
            .unwrap();

        let first = tickets.list_unanalyzed("o", "zendesk", None, 3).await.unwrap();
        assert_eq!(first.len(), 3);
        let rest = tickets
            .list_unanalyzed("o", "zendesk", Some(first[2].id), 3)
            .await
            .unwrap();
        assert_eq!(rest.len(), 2);

        tickets.save_analysis(rest[0].id, json!({"sentiment": "neg"})).await.unwrap();
        assert_eq!(tickets.count_unanalyzed("o", "zendesk").await.unwrap(), 4);
    }
}
