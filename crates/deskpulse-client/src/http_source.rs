//! [`JobSource`] over the deskpulse HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use uuid::Uuid;

use deskpulse_core::{defaults, Error, Job, JobSource, Result};

#[derive(Deserialize)]
struct ActiveJobsResponse {
    jobs: Vec<Job>,
}

pub struct HttpJobSource {
    client: Client,
    base_url: String,
}

impl HttpJobSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(defaults::PROVIDER_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get(&self, owner_id: &str, path: &str) -> Result<reqwest::Response> {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .header(defaults::OWNER_HEADER, owner_id)
            .send()
            .await
            .map_err(|e| Error::Request(format!("Job API request failed: {}", e)))
    }
}

fn status_error(status: StatusCode) -> Error {
    match status {
        StatusCode::UNAUTHORIZED => Error::Unauthorized("job API rejected owner".to_string()),
        _ => Error::Request(format!("Job API returned {}", status)),
    }
}

#[async_trait]
impl JobSource for HttpJobSource {
    async fn get_job(&self, owner_id: &str, id: Uuid) -> Result<Option<Job>> {
        let response = self.get(owner_id, &format!("/api/v1/jobs/{}", id)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(status_error(status)),
        }
    }

    async fn list_active_jobs(&self, owner_id: &str) -> Result<Vec<Job>> {
        let response = self.get(owner_id, "/api/v1/jobs/active").await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status));
        }
        let body: ActiveJobsResponse = response.json().await?;
        Ok(body.jobs)
    }
}
