//! PostgreSQL job record store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use deskpulse_core::{
    Error, Job, JobFilter, JobKind, JobPatch, JobStatus, JobStore, NewJob, Result, UpdateOutcome,
};

const JOB_COLUMNS: &str = "id, owner_id, kind, provider, status, progress, current_page, \
     total_pages, current_count, total_count, params, cursor, error_detail, created_at, \
     updated_at, started_at, heartbeat_at, completed_at";

/// PostgreSQL implementation of [`JobStore`].
#[derive(Clone)]
pub struct PgJobStore {
    pool: Pool<Postgres>,
    /// Woken on every insert so an idle worker claims without waiting for its poll.
    notify: Arc<Notify>,
}

impl PgJobStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn with_notify(pool: Pool<Postgres>, notify: Arc<Notify>) -> Self {
        Self { pool, notify }
    }

    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    fn str_to_job_kind(s: &str) -> Result<JobKind> {
        s.parse()
            .map_err(|_| Error::Serialization(format!("unknown job kind in row: {s}")))
    }

    fn str_to_job_status(s: &str) -> Result<JobStatus> {
        s.parse()
            .map_err(|_| Error::Serialization(format!("unknown job status in row: {s}")))
    }

    /// Parse a job row into a Job struct.
    fn parse_job_row(row: &sqlx::postgres::PgRow) -> Result<Job> {
        Ok(Job {
            id: row.get("id"),
            owner_id: row.get("owner_id"),
            kind: Self::str_to_job_kind(row.get("kind"))?,
            provider: row.get("provider"),
            status: Self::str_to_job_status(row.get("status"))?,
            progress: row.get("progress"),
            current_page: row.get("current_page"),
            total_pages: row.get("total_pages"),
            current_count: row.get("current_count"),
            total_count: row.get("total_count"),
            params: row.get("params"),
            cursor: row.get("cursor"),
            error_detail: row.get("error_detail"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            started_at: row.get("started_at"),
            heartbeat_at: row.get("heartbeat_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, new: NewJob) -> Result<Job> {
        let job = Job::pending(new, Utc::now())?;

        let row = sqlx::query(&format!(
            "INSERT INTO job (id, owner_id, kind, provider, status, progress, current_page,
                              total_pages, current_count, total_count, params, cursor,
                              created_at, updated_at)
             VALUES ($1, $2, $3, $4, 'pending', 0, 0, $5, 0, $6, $7, $8, $9, $9)
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job.id)
        .bind(&job.owner_id)
        .bind(job.kind.as_str())
        .bind(&job.provider)
        .bind(job.total_pages)
        .bind(job.total_count)
        .bind(&job.params)
        .bind(&job.cursor)
        .bind(job.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        self.notify.notify_one();
        Self::parse_job_row(&row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM job WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_job_row).transpose()
    }

    async fn update_by_id(&self, id: Uuid, patch: JobPatch) -> Result<UpdateOutcome> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Row lock serializes concurrent writers (runner, coordinator, reaper).
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?
        .ok_or(Error::JobNotFound(id))?;

        let mut job = Self::parse_job_row(&row)?;
        if !patch.apply(&mut job, Utc::now()) {
            tx.rollback().await.map_err(Error::Database)?;
            debug!(
                subsystem = "db",
                component = "jobs",
                op = "update_by_id",
                job_id = %id,
                status = %job.status,
                "Update rejected"
            );
            return Ok(UpdateOutcome::Rejected(job));
        }

        let row = sqlx::query(&format!(
            "UPDATE job
             SET status = $2, progress = $3, current_page = $4, total_pages = $5,
                 current_count = $6, total_count = $7, cursor = $8, error_detail = $9,
                 updated_at = $10, started_at = $11, heartbeat_at = $12, completed_at = $13
             WHERE id = $1
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(id)
        .bind(job.status.as_str())
        .bind(job.progress)
        .bind(job.current_page)
        .bind(job.total_pages)
        .bind(job.current_count)
        .bind(job.total_count)
        .bind(&job.cursor)
        .bind(&job.error_detail)
        .bind(job.updated_at)
        .bind(job.started_at)
        .bind(job.heartbeat_at)
        .bind(job.completed_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(UpdateOutcome::Applied(Self::parse_job_row(&row)?))
    }

    async fn select_by_filter(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let statuses: Vec<String> = filter
            .statuses
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job
             WHERE ($1::text IS NULL OR owner_id = $1)
               AND (cardinality($2::text[]) = 0 OR status = ANY($2))
               AND ($3::text IS NULL OR kind = $3)
               AND ($4::text IS NULL OR provider = $4)
               AND ($5::timestamptz IS NULL
                    OR COALESCE(heartbeat_at, started_at, updated_at) < $5)
             ORDER BY created_at DESC, id DESC
             LIMIT $6"
        ))
        .bind(&filter.owner_id)
        .bind(&statuses)
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(&filter.provider)
        .bind(filter.heartbeat_before)
        .bind(filter.effective_limit())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::parse_job_row).collect()
    }

    async fn claim(&self, id: Uuid) -> Result<Option<Job>> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            "UPDATE job
             SET status = 'running', started_at = $2, heartbeat_at = $2, updated_at = $2
             WHERE id = $1 AND status = 'pending'
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_job_row).transpose()
    }

    async fn claim_next(&self, kinds: &[JobKind]) -> Result<Option<Job>> {
        let now = Utc::now();
        let kind_strings: Vec<String> = kinds.iter().map(|k| k.as_str().to_string()).collect();

        // FOR UPDATE SKIP LOCKED lets several workers claim concurrently.
        let row = sqlx::query(&format!(
            "UPDATE job
             SET status = 'running', started_at = $1, heartbeat_at = $1, updated_at = $1
             WHERE id = (
                 SELECT id FROM job
                 WHERE status = 'pending'
                   AND (cardinality($2::text[]) = 0 OR kind = ANY($2))
                 ORDER BY created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(now)
        .bind(&kind_strings)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_job_row).transpose()
    }
}
