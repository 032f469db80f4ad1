//! Structured logging schema and field name constants for deskpulse.
//!
//! All crates use these field names so job lifecycle events can be queried
//! uniformly across the api, worker and client.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Job failed because the store could not be written, worker faults |
//! | WARN  | Recoverable issue: store write retried, poll failed, job reaped |
//! | INFO  | Lifecycle events: job created, claimed, completed, canceled |
//! | DEBUG | Page boundaries, progress writes, registry changes |
//! | TRACE | Per-item iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "api", "db", "jobs", "client"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "runner", "worker", "reaper", "coordinator", "tracker", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "claim", "cancel", "fetch_page", "update_by_id"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job UUID being operated on.
pub const JOB_ID: &str = "job_id";

/// Job kind ("import" or "analysis").
pub const JOB_KIND: &str = "job_kind";

/// Acting owner id.
pub const OWNER_ID: &str = "owner_id";

/// Provider identifier of the job.
pub const PROVIDER: &str = "provider";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Page number just completed.
pub const PAGE: &str = "page";

/// Items in the page just processed.
pub const ITEM_COUNT: &str = "item_count";

/// Derived progress percentage.
pub const PROGRESS: &str = "progress";

/// Retry attempt number (1-based).
pub const ATTEMPT: &str = "attempt";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
