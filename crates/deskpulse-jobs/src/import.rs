//! Ticket import jobs: page through the helpdesk and upsert tickets.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use deskpulse_core::{
    Job, JobKind, PageSink, ProviderFetch, ProviderPage, Result, TicketStore, TicketUpsert,
};

use crate::handler::{JobHandler, JobWork};

/// Writes each fetched page to the ticket store.
pub struct TicketImportSink {
    tickets: Arc<dyn TicketStore>,
}

impl TicketImportSink {
    pub fn new(tickets: Arc<dyn TicketStore>) -> Self {
        Self { tickets }
    }
}

#[async_trait]
impl PageSink for TicketImportSink {
    /// Reimporting a page updates tickets in place.
    async fn persist(&self, job: &Job, page: &ProviderPage) -> Result<u64> {
        let upserts = page
            .items
            .iter()
            .map(TicketUpsert::from_item)
            .collect::<Result<Vec<_>>>()?;
        if upserts.is_empty() {
            return Ok(0);
        }
        let written = self
            .tickets
            .upsert_tickets(&job.owner_id, &job.provider, job.id, &upserts)
            .await?;
        debug!(subsystem = "jobs", component = "import", job_id = %job.id, item_count = written, "Upserted tickets");
        Ok(written)
    }
}

/// Handler for [`JobKind::Import`].
pub struct ImportHandler {
    work: JobWork,
}

impl ImportHandler {
    pub fn new(fetch: Arc<dyn ProviderFetch>, tickets: Arc<dyn TicketStore>) -> Self {
        Self {
            work: JobWork::new(fetch, Arc::new(TicketImportSink::new(tickets))),
        }
    }
}

#[async_trait]
impl JobHandler for ImportHandler {
    fn kind(&self) -> JobKind {
        JobKind::Import
    }

    async fn prepare(&self, _job: &Job) -> Result<JobWork> {
        Ok(self.work.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use deskpulse_core::{Error, NewJob};
    use deskpulse_db::MemoryTicketStore;
    use serde_json::json;

    fn job() -> Job {
        Job::pending(NewJob::new("owner-1", JobKind::Import, "zendesk"), Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_persist_upserts_page() {
        let tickets = Arc::new(MemoryTicketStore::new());
        let sink = TicketImportSink::new(tickets.clone());
        let page = ProviderPage {
            items: vec![
                json!({"id": 1, "subject": "Login broken"}),
                json!({"id": "2", "title": "Refund", "description": "please"}),
            ],
            ..Default::default()
        };

        let job = job();
        assert_eq!(sink.persist(&job, &page).await.unwrap(), 2);
        assert_eq!(sink.persist(&job, &page).await.unwrap(), 2);

        let stored = tickets.all().unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|t| t.import_job_id == Some(job.id)));
    }

    #[tokio::test]
    async fn test_persist_rejects_item_without_id() {
        let tickets = Arc::new(MemoryTicketStore::new());
        let sink = TicketImportSink::new(tickets.clone());
        let page = ProviderPage {
            items: vec![json!({"id": 1}), json!({"subject": "no id"})],
            ..Default::default()
        };

        let err = sink.persist(&job(), &page).await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert!(tickets.all().unwrap().is_empty());
    }
}
