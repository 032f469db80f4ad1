//! Core traits for deskpulse abstractions.
//!
//! The job runner and its coordinators only ever talk to these interfaces,
//! so the Postgres store, the in-memory store and the HTTP-backed client
//! source are interchangeable.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;
use crate::ticket::{Ticket, TicketUpsert};

// =============================================================================
// JOB RECORD STORE
// =============================================================================

/// Durable job record store. The single source of truth for job state.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new `pending` row. The request must already be validated.
    async fn insert(&self, new: NewJob) -> Result<Job>;

    /// Fetch a row by id. `None` when the id is unknown.
    async fn get(&self, id: Uuid) -> Result<Option<Job>>;

    /// Conditionally apply a partial update.
    ///
    /// Fails with `Error::JobNotFound` for unknown ids. A terminal row or a
    /// disallowed transition yields `UpdateOutcome::Rejected` and writes
    /// nothing.
    async fn update_by_id(&self, id: Uuid, patch: JobPatch) -> Result<UpdateOutcome>;

    /// Rows matching `filter`, newest first.
    async fn select_by_filter(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    /// Atomically move one pending job to running.
    ///
    /// Returns `None` if the job is not pending anymore (already claimed,
    /// canceled, or unknown). Concurrent callers never both win.
    async fn claim(&self, id: Uuid) -> Result<Option<Job>>;

    /// Claim the oldest pending job of any of `kinds`. Empty means any kind.
    async fn claim_next(&self, kinds: &[JobKind]) -> Result<Option<Job>>;
}

// =============================================================================
// PAGED WORK COLLABORATORS
// =============================================================================

/// Source of paged work items for a job.
///
/// Implementations retry their own transient failures; an error returned
/// here fails the job.
#[async_trait]
pub trait ProviderFetch: Send + Sync {
    async fn fetch_page(
        &self,
        job: &Job,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<ProviderPage>;
}

/// Destination of a fetched page.
///
/// Persisting must be idempotent per item so that a page written before a
/// crash can be rewritten safely. Returns the number of units written.
#[async_trait]
pub trait PageSink: Send + Sync {
    async fn persist(&self, job: &Job, page: &ProviderPage) -> Result<u64>;
}

// =============================================================================
// TICKETS
// =============================================================================

/// Ticket persistence shared by the import and analysis handlers.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Insert or update tickets keyed by `(owner_id, provider, external_id)`.
    /// Returns the number of rows written.
    async fn upsert_tickets(
        &self,
        owner_id: &str,
        provider: &str,
        import_job_id: Uuid,
        tickets: &[TicketUpsert],
    ) -> Result<u64>;

    /// Unanalyzed tickets ordered by id, strictly after `after`.
    async fn list_unanalyzed(
        &self,
        owner_id: &str,
        provider: &str,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Ticket>>;

    async fn count_unanalyzed(&self, owner_id: &str, provider: &str) -> Result<i64>;

    /// Store an analysis result and mark the ticket analyzed.
    async fn save_analysis(&self, ticket_id: Uuid, analysis: JsonValue) -> Result<()>;
}

// =============================================================================
// READ SIDE
// =============================================================================

/// Owner-scoped read access to jobs, used by progress tracking.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// The job if it exists and belongs to `owner_id`.
    async fn get_job(&self, owner_id: &str, id: Uuid) -> Result<Option<Job>>;

    /// Pending and running jobs of `owner_id`, newest first.
    async fn list_active_jobs(&self, owner_id: &str) -> Result<Vec<Job>>;
}
