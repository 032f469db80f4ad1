//! Error types for deskpulse.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using deskpulse's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for deskpulse operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Job id does not exist in the record store
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input (rejected before anything is persisted)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// External provider fetch or transform failed
    #[error("Provider error: {0}")]
    Provider(String),

    /// Transient record store failure without a database source
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication failed or acting owner missing
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a store operation that failed with this error may succeed if retried.
    ///
    /// Only connection-level database failures and [`Error::Store`] qualify.
    /// Constraint violations, row decoding problems and lookups of unknown ids
    /// are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Store(_) => true,
            Error::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Protocol(_)
            ),
            _ => false,
        }
    }

    /// Whether this error means the referenced entity does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::JobNotFound(_) | Error::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
