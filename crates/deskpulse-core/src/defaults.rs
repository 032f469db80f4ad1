//! Centralized default constants for deskpulse.
//!
//! **This module is the single source of truth** for shared default values.
//! Config structs in the other crates read their defaults from here.

// =============================================================================
// JOB RUNNER
// =============================================================================

/// Items requested from the provider per page.
pub const JOB_PAGE_SIZE: u32 = 100;

/// Upper bound accepted for a caller-supplied page size.
pub const JOB_PAGE_SIZE_MAX: u32 = 1000;

/// Attempts for a single progress/status write before the job is failed.
pub const JOB_STORE_RETRY_ATTEMPTS: u32 = 4;

/// Base delay for store write backoff in milliseconds (doubles per attempt).
pub const JOB_STORE_RETRY_BASE_MS: u64 = 200;

/// Cap on a single store write backoff delay in milliseconds.
pub const JOB_STORE_RETRY_MAX_MS: u64 = 5_000;

/// Progress ceiling while a job is still running. 100 is reserved for completion.
pub const JOB_RUNNING_PROGRESS_CAP: i32 = 99;

// =============================================================================
// JOB WORKER
// =============================================================================

/// Safety-net poll interval of the worker in milliseconds.
///
/// Job creation wakes the worker directly; this only covers jobs inserted
/// by another process.
pub const JOB_POLL_INTERVAL_MS: u64 = 5_000;

/// Default maximum concurrent jobs per worker.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Interval between heartbeat writes for a running job, in seconds.
pub const JOB_HEARTBEAT_INTERVAL_SECS: u64 = 15;

/// A running job whose heartbeat is older than this is considered orphaned.
pub const JOB_STALE_AFTER_SECS: u64 = 120;

/// Interval between reaper sweeps, in seconds.
pub const JOB_REAP_INTERVAL_SECS: u64 = 30;

/// Error detail recorded on jobs failed by the reaper.
pub const JOB_HEARTBEAT_LOST: &str = "runner heartbeat lost";

/// Worker event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// QUERIES
// =============================================================================

/// Default row limit for `listActiveJobs`.
pub const ACTIVE_JOBS_LIMIT: i64 = 50;

/// Maximum row limit for any job listing.
pub const JOB_LIST_LIMIT_MAX: i64 = 500;

/// Maximum accepted length of a provider identifier.
pub const PROVIDER_MAX_LEN: usize = 128;

// =============================================================================
// PROVIDER FETCH
// =============================================================================

/// Timeout for a single helpdesk page request in seconds.
pub const PROVIDER_TIMEOUT_SECS: u64 = 30;

/// Attempts for a single helpdesk page request (transient failures only).
pub const PROVIDER_RETRY_ATTEMPTS: u32 = 3;

/// Base backoff between helpdesk retries in milliseconds.
pub const PROVIDER_RETRY_BASE_MS: u64 = 500;

/// Timeout for an analyzer request in seconds.
pub const ANALYZER_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// CLIENT
// =============================================================================

/// Interval at which a progress tracker polls the tracked job, in milliseconds.
pub const TRACKER_POLL_INTERVAL_MS: u64 = 2_000;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP listen port.
pub const SERVER_PORT: u16 = 3000;

/// Header carrying the acting owner id, set by the upstream auth layer.
pub const OWNER_HEADER: &str = "x-owner-id";
