//! Job record model, status machine and partial-update semantics.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};

// =============================================================================
// JOB KIND
// =============================================================================

/// Kind of long-running work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Import tickets page by page from an external helpdesk.
    Import,
    /// Run AI analysis over stored tickets page by page.
    Analysis,
}

impl JobKind {
    /// Every kind, in display order.
    pub const ALL: [JobKind; 2] = [JobKind::Import, JobKind::Analysis];

    /// Database/wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Import => "import",
            JobKind::Analysis => "analysis",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "import" => Ok(JobKind::Import),
            "analysis" => Ok(JobKind::Analysis),
            other => Err(Error::InvalidInput(format!("Invalid job kind: {other}"))),
        }
    }
}

// =============================================================================
// JOB STATUS
// =============================================================================

/// Lifecycle status of a job.
///
/// `pending → running → {completed, canceled, failed}`; a pending job may
/// also go straight to `canceled` or `failed`. Terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Canceled,
    Failed,
}

impl JobStatus {
    /// Statuses a job can still leave.
    pub const ACTIVE: [JobStatus; 2] = [JobStatus::Pending, JobStatus::Running];

    /// Statuses that admit no further mutation.
    pub const TERMINAL: [JobStatus; 3] =
        [JobStatus::Completed, JobStatus::Canceled, JobStatus::Failed];

    /// Database/wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Canceled => "canceled",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Canceled | JobStatus::Failed
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether a job in `self` may move to `next`.
    ///
    /// `completed` is only reachable from `running`: a job that never ran
    /// cannot have finished its work.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Running)
            | (JobStatus::Pending, JobStatus::Canceled)
            | (JobStatus::Pending, JobStatus::Failed) => true,
            (JobStatus::Running, JobStatus::Completed)
            | (JobStatus::Running, JobStatus::Canceled)
            | (JobStatus::Running, JobStatus::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "canceled" => Ok(JobStatus::Canceled),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::InvalidInput(format!("Invalid job status: {other}"))),
        }
    }
}

// =============================================================================
// JOB RECORD
// =============================================================================

/// Persisted job row. The record store owns it; everything else holds snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub owner_id: String,
    pub kind: JobKind,
    pub provider: String,
    pub status: JobStatus,
    /// Percentage 0-100. Zero while pending, non-decreasing while running.
    pub progress: i32,
    /// Last page fully processed (1-based; 0 before the first page).
    pub current_page: i32,
    pub total_pages: Option<i32>,
    /// Units written so far.
    pub current_count: i64,
    pub total_count: Option<i64>,
    /// Creation parameters, see [`JobParams`].
    pub params: JsonValue,
    /// Provider cursor for the page after `current_page`.
    pub cursor: Option<String>,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build the initial `pending` row for a validated creation request.
    pub fn pending(new: NewJob, now: DateTime<Utc>) -> Result<Self> {
        let params = serde_json::to_value(&new.params)?;
        Ok(Self {
            id: crate::new_v7(),
            owner_id: new.owner_id,
            kind: new.kind,
            provider: new.provider,
            status: JobStatus::Pending,
            progress: 0,
            current_page: 0,
            total_pages: new.total_pages,
            current_count: 0,
            total_count: new.total_count,
            cursor: new.params.cursor.clone(),
            params,
            error_detail: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            heartbeat_at: None,
            completed_at: None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Typed view of [`Job::params`].
    pub fn job_params(&self) -> Result<JobParams> {
        Ok(serde_json::from_value(self.params.clone())?)
    }

    /// Most recent sign of runner liveness.
    pub fn last_seen_at(&self) -> DateTime<Utc> {
        self.heartbeat_at
            .or(self.started_at)
            .unwrap_or(self.updated_at)
    }

    /// Transition `pending → running`. Returns false when not pending.
    pub fn claim(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        self.heartbeat_at = Some(now);
        self.updated_at = now;
        true
    }
}

/// Parameters supplied at creation and stored as the job's `params` column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    /// Cursor to start from. `None` starts at the provider's first page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Items per page; defaults to [`defaults::JOB_PAGE_SIZE`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    /// Provider-specific selectors forwarded as query parameters.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub filters: Map<String, JsonValue>,
}

impl JobParams {
    pub fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(defaults::JOB_PAGE_SIZE)
    }
}

/// Request to create a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub owner_id: String,
    pub kind: JobKind,
    pub provider: String,
    #[serde(default)]
    pub params: JobParams,
    /// Page total when known upfront; drives progress derivation.
    #[serde(default)]
    pub total_pages: Option<i32>,
    #[serde(default)]
    pub total_count: Option<i64>,
}

impl NewJob {
    pub fn new(owner_id: impl Into<String>, kind: JobKind, provider: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            kind,
            provider: provider.into(),
            params: JobParams::default(),
            total_pages: None,
            total_count: None,
        }
    }

    pub fn with_params(mut self, params: JobParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_total_pages(mut self, total_pages: i32) -> Self {
        self.total_pages = Some(total_pages);
        self
    }

    pub fn with_total_count(mut self, total_count: i64) -> Self {
        self.total_count = Some(total_count);
        self
    }

    /// Reject malformed requests before anything is persisted.
    pub fn validate(&self) -> Result<()> {
        if self.owner_id.trim().is_empty() {
            return Err(Error::InvalidInput("owner_id is required".into()));
        }
        let provider = self.provider.trim();
        if provider.is_empty() {
            return Err(Error::InvalidInput("provider is required".into()));
        }
        if provider.len() > defaults::PROVIDER_MAX_LEN {
            return Err(Error::InvalidInput(format!(
                "provider must be at most {} characters",
                defaults::PROVIDER_MAX_LEN
            )));
        }
        if !provider
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
        {
            return Err(Error::InvalidInput(format!(
                "provider contains invalid characters: {provider}"
            )));
        }
        if let Some(size) = self.params.page_size {
            if size == 0 || size > defaults::JOB_PAGE_SIZE_MAX {
                return Err(Error::InvalidInput(format!(
                    "page_size must be between 1 and {}",
                    defaults::JOB_PAGE_SIZE_MAX
                )));
            }
        }
        if matches!(self.total_pages, Some(n) if n <= 0) {
            return Err(Error::InvalidInput("total_pages must be positive".into()));
        }
        if matches!(self.total_count, Some(n) if n <= 0) {
            return Err(Error::InvalidInput("total_count must be positive".into()));
        }
        Ok(())
    }
}

// =============================================================================
// PARTIAL UPDATES
// =============================================================================

/// Partial-fields update keyed by job id.
///
/// Every field is optional; absent fields are left untouched. See
/// [`JobPatch::apply`] for the exact row semantics every store follows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<i32>,
    pub current_page: Option<i32>,
    pub total_pages: Option<i32>,
    pub current_count: Option<i64>,
    pub total_count: Option<i64>,
    pub cursor: Option<String>,
    pub error_detail: Option<String>,
    /// Refresh `heartbeat_at`.
    pub heartbeat: bool,
}

impl JobPatch {
    /// Page-boundary progress write. Also counts as a heartbeat.
    pub fn progress(current_page: i32, current_count: i64, progress: i32) -> Self {
        Self {
            progress: Some(progress),
            current_page: Some(current_page),
            current_count: Some(current_count),
            heartbeat: true,
            ..Default::default()
        }
    }

    pub fn complete() -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(100),
            ..Default::default()
        }
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error_detail: Some(detail.into()),
            ..Default::default()
        }
    }

    /// Cancellation leaves `progress` untouched.
    pub fn cancel() -> Self {
        Self {
            status: Some(JobStatus::Canceled),
            ..Default::default()
        }
    }

    pub fn heartbeat() -> Self {
        Self {
            heartbeat: true,
            ..Default::default()
        }
    }

    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn with_totals(mut self, total_pages: Option<i32>, total_count: Option<i64>) -> Self {
        self.total_pages = total_pages;
        self.total_count = total_count;
        self
    }

    /// Whether this patch can be applied to a row currently in `current`.
    pub fn is_allowed_from(&self, current: JobStatus) -> bool {
        if current.is_terminal() {
            return false;
        }
        match self.status {
            Some(next) if next != current => current.can_transition_to(next),
            // Counters and progress belong to running jobs only.
            _ if current == JobStatus::Pending => {
                self.progress.is_none()
                    && self.current_page.is_none()
                    && self.current_count.is_none()
            }
            _ => true,
        }
    }

    /// Apply to `job` in place. Returns false (and leaves `job` untouched)
    /// when the row is terminal or the transition is not allowed.
    ///
    /// - progress is written as `max(stored, new)`, clamped to 0..=100
    /// - `updated_at` is touched on every applied write
    /// - `completed_at` is set exactly when the row enters a terminal status
    pub fn apply(&self, job: &mut Job, now: DateTime<Utc>) -> bool {
        if !self.is_allowed_from(job.status) {
            return false;
        }
        if let Some(status) = self.status {
            job.status = status;
            if status == JobStatus::Running && job.started_at.is_none() {
                job.started_at = Some(now);
            }
            if status.is_terminal() {
                job.completed_at = Some(now);
            }
        }
        if let Some(progress) = self.progress {
            job.progress = job.progress.max(progress.clamp(0, 100));
        }
        if let Some(page) = self.current_page {
            job.current_page = page;
        }
        if let Some(count) = self.current_count {
            job.current_count = count;
        }
        if self.total_pages.is_some() {
            job.total_pages = self.total_pages;
        }
        if self.total_count.is_some() {
            job.total_count = self.total_count;
        }
        if self.cursor.is_some() {
            job.cursor = self.cursor.clone();
        }
        if self.error_detail.is_some() {
            job.error_detail = self.error_detail.clone();
        }
        if self.heartbeat {
            job.heartbeat_at = Some(now);
        }
        job.updated_at = now;
        true
    }
}

/// Result of `update_by_id` on an existing row.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// Patch written; carries the row after the write.
    Applied(Job),
    /// Nothing written (terminal row or disallowed transition); carries the unchanged row.
    Rejected(Job),
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied(_))
    }

    pub fn job(&self) -> &Job {
        match self {
            UpdateOutcome::Applied(job) | UpdateOutcome::Rejected(job) => job,
        }
    }

    pub fn into_job(self) -> Job {
        match self {
            UpdateOutcome::Applied(job) | UpdateOutcome::Rejected(job) => job,
        }
    }
}

// =============================================================================
// FILTERS
// =============================================================================

/// Filter for `select_by_filter`. Results are ordered by `created_at` descending.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFilter {
    pub owner_id: Option<String>,
    /// Empty means any status.
    pub statuses: Vec<JobStatus>,
    pub kind: Option<JobKind>,
    pub provider: Option<String>,
    /// Only jobs whose [`Job::last_seen_at`] is strictly older than this.
    pub heartbeat_before: Option<DateTime<Utc>>,
    pub limit: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            owner_id: None,
            statuses: Vec::new(),
            kind: None,
            provider: None,
            heartbeat_before: None,
            limit: defaults::ACTIVE_JOBS_LIMIT,
        }
    }
}

impl JobFilter {
    /// Pending and running jobs of one owner.
    pub fn active_for_owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            statuses: JobStatus::ACTIVE.to_vec(),
            ..Default::default()
        }
    }

    /// Running jobs whose runner has not been seen since `cutoff`.
    pub fn stale_running(cutoff: DateTime<Utc>) -> Self {
        Self {
            statuses: vec![JobStatus::Running],
            heartbeat_before: Some(cutoff),
            limit: defaults::JOB_LIST_LIMIT_MAX,
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Limit clamped to `1..=JOB_LIST_LIMIT_MAX`.
    pub fn effective_limit(&self) -> i64 {
        self.limit.clamp(1, defaults::JOB_LIST_LIMIT_MAX)
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.owner_id.as_ref().map_or(true, |o| &job.owner_id == o)
            && (self.statuses.is_empty() || self.statuses.contains(&job.status))
            && self.kind.map_or(true, |k| job.kind == k)
            && self.provider.as_ref().map_or(true, |p| &job.provider == p)
            && self
                .heartbeat_before
                .map_or(true, |cutoff| job.last_seen_at() < cutoff)
    }
}

// =============================================================================
// PROVIDER PAGES
// =============================================================================

/// One page returned by a provider fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderPage {
    #[serde(default, alias = "tickets")]
    pub items: Vec<JsonValue>,
    /// Cursor of the following page; `None` on the last page.
    #[serde(default)]
    pub next_cursor: Option<String>,
    /// Totals, when the provider reports them.
    #[serde(default)]
    pub total_count: Option<i64>,
    #[serde(default)]
    pub total_pages: Option<i32>,
}

impl ProviderPage {
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}
