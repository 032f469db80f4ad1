//! PostgreSQL ticket store.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use deskpulse_core::{new_v7, Error, Result, Ticket, TicketStore, TicketUpsert};

const TICKET_COLUMNS: &str = "id, owner_id, provider, external_id, subject, body, raw, \
     import_job_id, analysis, analyzed_at, created_at, updated_at";

/// PostgreSQL implementation of [`TicketStore`].
#[derive(Clone)]
pub struct PgTicketStore {
    pool: Pool<Postgres>,
}

impl PgTicketStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_ticket_row(row: &sqlx::postgres::PgRow) -> Ticket {
        Ticket {
            id: row.get("id"),
            owner_id: row.get("owner_id"),
            provider: row.get("provider"),
            external_id: row.get("external_id"),
            subject: row.get("subject"),
            body: row.get("body"),
            raw: row.get("raw"),
            import_job_id: row.get("import_job_id"),
            analysis: row.get("analysis"),
            analyzed_at: row.get("analyzed_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl TicketStore for PgTicketStore {
    async fn upsert_tickets(
        &self,
        owner_id: &str,
        provider: &str,
        import_job_id: Uuid,
        tickets: &[TicketUpsert],
    ) -> Result<u64> {
        if tickets.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut written = 0u64;

        for ticket in tickets {
            let result = sqlx::query(
                "INSERT INTO ticket (id, owner_id, provider, external_id, subject, body, raw,
                                     import_job_id, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
                 ON CONFLICT (owner_id, provider, external_id) DO UPDATE
                 SET subject = EXCLUDED.subject,
                     body = EXCLUDED.body,
                     raw = EXCLUDED.raw,
                     import_job_id = EXCLUDED.import_job_id,
                     updated_at = EXCLUDED.updated_at",
            )
            .bind(new_v7())
            .bind(owner_id)
            .bind(provider)
            .bind(&ticket.external_id)
            .bind(&ticket.subject)
            .bind(&ticket.body)
            .bind(&ticket.raw)
            .bind(import_job_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            written += result.rows_affected();
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(written)
    }

    async fn list_unanalyzed(
        &self,
        owner_id: &str,
        provider: &str,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Ticket>> {
        let rows = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM ticket
             WHERE owner_id = $1 AND provider = $2 AND analyzed_at IS NULL
               AND ($3::uuid IS NULL OR id > $3)
             ORDER BY id
             LIMIT $4"
        ))
        .bind(owner_id)
        .bind(provider)
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_ticket_row).collect())
    }

    async fn count_unanalyzed(&self, owner_id: &str, provider: &str) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM ticket
             WHERE owner_id = $1 AND provider = $2 AND analyzed_at IS NULL",
        )
        .bind(owner_id)
        .bind(provider)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)
    }

    async fn save_analysis(&self, ticket_id: Uuid, analysis: JsonValue) -> Result<()> {
        let result = sqlx::query(
            "UPDATE ticket SET analysis = $2, analyzed_at = $3, updated_at = $3 WHERE id = $1",
        )
        .bind(ticket_id)
        .bind(&analysis)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("ticket {ticket_id}")));
        }
        Ok(())
    }
}
