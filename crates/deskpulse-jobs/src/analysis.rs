//! Ticket analysis jobs: page through unanalyzed tickets and store an
//! analysis for each.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info};
use uuid::Uuid;

use deskpulse_core::{
    defaults, Error, Job, JobKind, PageSink, ProviderFetch, ProviderPage, Result, Ticket,
    TicketStore,
};

use crate::handler::{JobHandler, JobWork};
use crate::retry::RetryPolicy;

/// Produces the analysis document for one ticket.
#[async_trait]
pub trait TicketAnalyzer: Send + Sync {
    async fn analyze(&self, ticket: &Ticket) -> Result<JsonValue>;
}

/// Analyzer backed by an HTTP service: `POST {url}` with the ticket text,
/// the JSON response is stored as the analysis.
pub struct HttpTicketAnalyzer {
    client: Client,
    url: String,
    retry: RetryPolicy,
}

impl HttpTicketAnalyzer {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(defaults::ANALYZER_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            retry: RetryPolicy::new(
                defaults::PROVIDER_RETRY_ATTEMPTS,
                Duration::from_millis(defaults::PROVIDER_RETRY_BASE_MS),
            ),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn analyze_once(&self, body: &JsonValue) -> Result<JsonValue> {
        let response = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Request(format!("Analyzer request failed: {}", e)))?;
        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::Request(format!("Analyzer returned {}", status)));
        }
        if !status.is_success() {
            return Err(Error::Provider(format!("Analyzer returned {}", status)));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("Failed to parse analysis: {}", e)))
    }
}

#[async_trait]
impl TicketAnalyzer for HttpTicketAnalyzer {
    async fn analyze(&self, ticket: &Ticket) -> Result<JsonValue> {
        let body = json!({
            "ticket_id": ticket.id,
            "external_id": ticket.external_id,
            "subject": ticket.subject,
            "body": ticket.body,
        });
        let body = &body;
        self.retry
            .retry(
                "analyze",
                || async move { self.analyze_once(body).await },
                |e| matches!(e, Error::Request(_)),
            )
            .await
    }
}

/// Pages over an owner's unanalyzed tickets for the job's provider.
///
/// The cursor is the id of the last ticket on the previous page. Tickets
/// analyzed meanwhile drop out of later pages.
pub struct UnanalyzedTickets {
    tickets: Arc<dyn TicketStore>,
}

impl UnanalyzedTickets {
    pub fn new(tickets: Arc<dyn TicketStore>) -> Self {
        Self { tickets }
    }
}

#[async_trait]
impl ProviderFetch for UnanalyzedTickets {
    async fn fetch_page(
        &self,
        job: &Job,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<ProviderPage> {
        let after = cursor
            .map(|c| {
                Uuid::parse_str(c)
                    .map_err(|e| Error::InvalidInput(format!("invalid analysis cursor: {}", e)))
            })
            .transpose()?;

        let total_count = if after.is_none() {
            Some(
                self.tickets
                    .count_unanalyzed(&job.owner_id, &job.provider)
                    .await?,
            )
        } else {
            None
        };

        let batch = self
            .tickets
            .list_unanalyzed(&job.owner_id, &job.provider, after, i64::from(page_size))
            .await?;
        let next_cursor = match batch.last() {
            Some(last) if batch.len() as u32 >= page_size => Some(last.id.to_string()),
            _ => None,
        };
        let items = batch
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(ProviderPage {
            items,
            next_cursor,
            total_count,
            total_pages: None,
        })
    }
}

/// Runs the analyzer over each ticket and saves the result.
pub struct AnalysisSink {
    tickets: Arc<dyn TicketStore>,
    analyzer: Arc<dyn TicketAnalyzer>,
}

impl AnalysisSink {
    pub fn new(tickets: Arc<dyn TicketStore>, analyzer: Arc<dyn TicketAnalyzer>) -> Self {
        Self { tickets, analyzer }
    }
}

#[async_trait]
impl PageSink for AnalysisSink {
    async fn persist(&self, job: &Job, page: &ProviderPage) -> Result<u64> {
        let mut written = 0;
        for item in &page.items {
            let ticket: Ticket = serde_json::from_value(item.clone())?;
            let analysis = self.analyzer.analyze(&ticket).await?;
            self.tickets.save_analysis(ticket.id, analysis).await?;
            written += 1;
        }
        debug!(subsystem = "jobs", component = "analysis", job_id = %job.id, item_count = written, "Analyzed tickets");
        Ok(written)
    }
}

/// Handler for [`JobKind::Analysis`].
pub struct AnalysisHandler {
    work: JobWork,
}

impl AnalysisHandler {
    pub fn new(tickets: Arc<dyn TicketStore>, analyzer: Arc<dyn TicketAnalyzer>) -> Self {
        info!(subsystem = "jobs", component = "analysis", "Analysis handler registered");
        Self {
            work: JobWork::new(
                Arc::new(UnanalyzedTickets::new(tickets.clone())),
                Arc::new(AnalysisSink::new(tickets, analyzer)),
            ),
        }
    }
}

#[async_trait]
impl JobHandler for AnalysisHandler {
    fn kind(&self) -> JobKind {
        JobKind::Analysis
    }

    async fn prepare(&self, _job: &Job) -> Result<JobWork> {
        Ok(self.work.clone())
    }
}
