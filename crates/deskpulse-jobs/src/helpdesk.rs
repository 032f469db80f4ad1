//! HTTP client for the helpdesk ticket API.
//!
//! `GET {base_url}/tickets?provider=P&per_page=N[&cursor=C]` with bearer
//! auth. The response body is a [`ProviderPage`]. Rate limiting, 5xx
//! responses and network failures are retried; other 4xx are permanent.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use deskpulse_core::{defaults, Error, Job, ProviderFetch, ProviderPage, Result};

use crate::retry::RetryPolicy;

/// Configuration for [`HelpdeskClient`].
#[derive(Debug, Clone)]
pub struct HelpdeskConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub timeout_seconds: u64,
    pub retry: RetryPolicy,
}

impl Default for HelpdeskConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_token: None,
            timeout_seconds: defaults::PROVIDER_TIMEOUT_SECS,
            retry: RetryPolicy::new(
                defaults::PROVIDER_RETRY_ATTEMPTS,
                Duration::from_millis(defaults::PROVIDER_RETRY_BASE_MS),
            ),
        }
    }
}

impl HelpdeskConfig {
    /// Read `HELPDESK_BASE_URL`, `HELPDESK_API_TOKEN` and `HELPDESK_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("HELPDESK_BASE_URL") {
            config.base_url = url;
        }
        config.api_token = std::env::var("HELPDESK_API_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());
        if let Some(timeout) = std::env::var("HELPDESK_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.timeout_seconds = timeout;
        }
        config
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Paged ticket fetch from the helpdesk API.
pub struct HelpdeskClient {
    client: Client,
    config: HelpdeskConfig,
}

impl HelpdeskClient {
    pub fn new(config: HelpdeskConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "jobs",
            component = "helpdesk",
            base_url = %config.base_url,
            "Initializing helpdesk client"
        );
        Ok(Self { client, config })
    }

    fn tickets_url(&self) -> String {
        format!("{}/tickets", self.config.base_url.trim_end_matches('/'))
    }

    async fn fetch_once(&self, query: &[(String, String)]) -> Result<ProviderPage> {
        let mut request = self.client.get(self.tickets_url()).query(query);
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Request(format!("Helpdesk request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("Helpdesk returned {}: {}", status, truncate(&body, 200));
            return Err(if is_retryable_status(status) {
                Error::Request(message)
            } else {
                Error::Provider(message)
            });
        }

        response
            .json::<ProviderPage>()
            .await
            .map_err(|e| Error::Provider(format!("Failed to parse helpdesk page: {}", e)))
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Query pairs for one page request. String and number filters are passed through.
fn page_query(job: &Job, cursor: Option<&str>, page_size: u32) -> Result<Vec<(String, String)>> {
    let params = job.job_params()?;
    let mut query = vec![
        ("provider".to_string(), job.provider.clone()),
        ("per_page".to_string(), page_size.to_string()),
    ];
    if let Some(cursor) = cursor {
        query.push(("cursor".to_string(), cursor.to_string()));
    }
    for (key, value) in &params.filters {
        match value {
            JsonValue::String(s) => query.push((key.clone(), s.clone())),
            JsonValue::Number(n) => query.push((key.clone(), n.to_string())),
            JsonValue::Bool(b) => query.push((key.clone(), b.to_string())),
            _ => {}
        }
    }
    Ok(query)
}

#[async_trait]
impl ProviderFetch for HelpdeskClient {
    async fn fetch_page(
        &self,
        job: &Job,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<ProviderPage> {
        let query = page_query(job, cursor, page_size)?;
        let query = &query;
        let page = self
            .config
            .retry
            .retry(
                "helpdesk_fetch",
                || async move { self.fetch_once(query).await },
                |e| matches!(e, Error::Request(_)),
            )
            .await?;

        debug!(
            subsystem = "jobs",
            component = "helpdesk",
            job_id = %job.id,
            provider = %job.provider,
            item_count = page.items.len(),
            has_more = !page.is_last(),
            "Fetched helpdesk page"
        );
        Ok(page)
    }
}
