//! Postgres pool for the job record store.
//!
//! The runner retries store calls that fail with a transient error, and an
//! exhausted pool surfaces as `PoolTimedOut`, which is transient. The acquire
//! timeout is kept short so a saturated pool costs a few seconds per attempt
//! and a job fails within the retry budget instead of holding its runner slot.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use deskpulse_core::{Error, Result};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Seconds to wait for a free connection before `PoolTimedOut`.
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 5;

/// Upper bound for `DATABASE_ACQUIRE_TIMEOUT_SECS`.
pub const MAX_ACQUIRE_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

const MAX_LIFETIME: Duration = Duration::from_secs(1800);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

impl PoolConfig {
    /// Overrides from `DATABASE_MAX_CONNECTIONS` and
    /// `DATABASE_ACQUIRE_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from a variable lookup. Unparseable values keep the default;
    /// out of range values are clamped.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let mut config = Self::default();
        if let Some(n) = parse("DATABASE_MAX_CONNECTIONS") {
            config = config.with_max_connections(u32::try_from(n).unwrap_or(u32::MAX));
        }
        if let Some(secs) = parse("DATABASE_ACQUIRE_TIMEOUT_SECS") {
            config.acquire_timeout = Duration::from_secs(secs.clamp(1, MAX_ACQUIRE_TIMEOUT_SECS));
        }
        config
    }

    /// At least one connection; `min_connections` follows it down.
    pub fn with_max_connections(mut self, n: u32) -> Self {
        self.max_connections = n.max(1);
        self.min_connections = self.min_connections.min(self.max_connections);
        self
    }

    fn options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(self.idle_timeout)
            .max_lifetime(MAX_LIFETIME)
    }
}

pub async fn create_pool(database_url: &str, config: &PoolConfig) -> Result<PgPool> {
    let start = Instant::now();
    info!(
        subsystem = "db",
        component = "pool",
        op = "create",
        max_connections = config.max_connections,
        acquire_timeout_secs = config.acquire_timeout.as_secs(),
        "Connecting to job store"
    );

    let pool = config
        .options()
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "established",
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Job store pool established"
    );
    Ok(pool)
}

/// Warns when every connection is checked out, since the next job write
/// will wait for the acquire timeout.
pub fn log_pool_metrics(pool: &PgPool) {
    let size = pool.size();
    let idle = pool.num_idle();
    debug!(subsystem = "db", component = "pool", op = "metrics", pool_size = size, pool_idle = idle, "Pool health check");
    if is_saturated(size, idle) {
        warn!(
            subsystem = "db",
            component = "pool",
            pool_size = size,
            "Connection pool has no idle connections, job writes may time out"
        );
    }
}

fn is_saturated(size: u32, idle: usize) -> bool {
    size > 0 && idle == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_fit_store_retry_budget() {
        let config = PoolConfig::from_lookup(lookup(&[]));
        assert_eq!(config, PoolConfig::default());
        // A job on a saturated pool fails after all attempts instead of hanging.
        let attempts = u64::from(deskpulse_core::defaults::JOB_STORE_RETRY_ATTEMPTS);
        assert!(config.acquire_timeout.as_secs() * attempts <= 30);
    }

    #[test]
    fn test_from_lookup_overrides_and_clamps() {
        let config = PoolConfig::from_lookup(lookup(&[
            ("DATABASE_MAX_CONNECTIONS", "25"),
            ("DATABASE_ACQUIRE_TIMEOUT_SECS", "600"),
        ]));
        assert_eq!(config.max_connections, 25);
        assert_eq!(config.acquire_timeout, Duration::from_secs(MAX_ACQUIRE_TIMEOUT_SECS));

        let config = PoolConfig::from_lookup(lookup(&[("DATABASE_ACQUIRE_TIMEOUT_SECS", "0")]));
        assert_eq!(config.acquire_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_from_lookup_ignores_garbage() {
        let config = PoolConfig::from_lookup(lookup(&[
            ("DATABASE_MAX_CONNECTIONS", "many"),
            ("DATABASE_ACQUIRE_TIMEOUT_SECS", "-3"),
        ]));
        assert_eq!(config, PoolConfig::default());
    }

    #[test]
    fn test_zero_max_connections_keeps_one() {
        let config = PoolConfig::from_lookup(lookup(&[("DATABASE_MAX_CONNECTIONS", "0")]));
        assert_eq!(config.max_connections, 1);
        assert!(config.min_connections <= config.max_connections);
    }

    #[test]
    fn test_saturation() {
        assert!(is_saturated(10, 0));
        assert!(!is_saturated(10, 3));
        assert!(!is_saturated(0, 0));
    }
}
