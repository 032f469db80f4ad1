//! Server configuration from environment variables.

use std::str::FromStr;

use deskpulse_core::{defaults, Error, Result};
use deskpulse_jobs::{HelpdeskConfig, WorkerConfig};

/// Where job and ticket records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Process-local; state is lost on restart.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(Error::Config(format!("unknown STORE_BACKEND: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    /// Comma separated; empty allows any origin.
    pub allowed_origins: Vec<String>,
    pub worker: WorkerConfig,
    pub helpdesk: HelpdeskConfig,
    pub analyzer_url: Option<String>,
}

impl AppConfig {
    /// | Variable | Default |
    /// |----------|---------|
    /// | `HOST` | `0.0.0.0` |
    /// | `PORT` | `3000` |
    /// | `STORE_BACKEND` | `postgres` |
    /// | `DATABASE_URL` | required for `postgres` |
    /// | `ALLOWED_ORIGINS` | any |
    /// | `ANALYZER_URL` | unset (analysis jobs are not processed) |
    ///
    /// Worker and helpdesk settings come from [`WorkerConfig::from_env`]
    /// and [`HelpdeskConfig::from_env`]; pool sizing from
    /// `deskpulse_db::PoolConfig::from_env`.
    pub fn from_env() -> Result<Self> {
        let port = match std::env::var("PORT") {
            Ok(v) => v
                .parse()
                .map_err(|_| Error::Config(format!("invalid PORT: {v}")))?,
            Err(_) => defaults::SERVER_PORT,
        };
        let store_backend = match std::env::var("STORE_BACKEND") {
            Ok(v) => v.parse()?,
            Err(_) => StoreBackend::Postgres,
        };
        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(Error::Config(
                "DATABASE_URL is required when STORE_BACKEND=postgres".to_string(),
            ));
        }

        Ok(Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            store_backend,
            database_url,
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .map(|v| parse_origins(&v))
                .unwrap_or_default(),
            worker: WorkerConfig::from_env(),
            helpdesk: HelpdeskConfig::from_env(),
            analyzer_url: std::env::var("ANALYZER_URL").ok().filter(|v| !v.is_empty()),
        })
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
