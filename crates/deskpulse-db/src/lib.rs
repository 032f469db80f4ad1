//! # deskpulse-db
//!
//! Job record store and ticket store implementations for deskpulse.
//!
//! This crate provides:
//! - Connection pool management
//! - [`PgJobStore`], the durable job record store
//! - [`PgTicketStore`], where import jobs write tickets and analysis jobs read them
//! - [`MemoryJobStore`] and [`MemoryTicketStore`] with identical semantics
//!
//! ## Example
//!
//! ```rust,ignore
//! use deskpulse_db::{Database, JobStore, JobKind, NewJob};
//!
//! let db = Database::connect("postgres://localhost/deskpulse").await?;
//! db.migrate().await?;
//! let job = db.jobs.insert(NewJob::new("owner-1", JobKind::Import, "zendesk")).await?;
//! ```

pub mod jobs;
pub mod memory;
pub mod pool;
pub mod tickets;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use deskpulse_core::*;

pub use jobs::PgJobStore;
pub use memory::{MemoryJobStore, MemoryTicketStore};
pub use pool::{create_pool, log_pool_metrics, PoolConfig};
pub use tickets::PgTicketStore;

/// Combined database context with all stores.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Job record store.
    pub jobs: PgJobStore,
    /// Ticket store for import and analysis.
    pub tickets: PgTicketStore,
}

impl Database {
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: PgJobStore::new(pool.clone()),
            tickets: PgTicketStore::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(url, PoolConfig::default()).await
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool(url, &config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
