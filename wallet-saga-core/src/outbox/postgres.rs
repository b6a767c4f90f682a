use super::{OutboxRecord, OutboxStore};
use crate::error::OutboxError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// `sqlx`/Postgres implementation of [`OutboxStore`], mirroring the
/// repository split the pack's `transactional-outbox` crate uses
/// (`SqlxOutboxRepository`).
#[derive(Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn append(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event_type: &str,
        payload: serde_json::Value,
        correlation_id: Option<Uuid>,
    ) -> Result<OutboxRecord, OutboxError> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let record = sqlx::query_as::<_, OutboxRecord>(
            r#"
            INSERT INTO outbox (
                id, event_type, payload, correlation_id, created_at,
                sent, sent_at, attempt_count, last_error
            )
            VALUES ($1, $2, $3, $4, $5, false, NULL, 0, NULL)
            RETURNING id, event_type, payload, correlation_id, created_at,
                      sent, sent_at, attempt_count, last_error
            "#,
        )
        .bind(id)
        .bind(event_type)
        .bind(payload)
        .bind(correlation_id)
        .bind(now)
        .fetch_one(&mut **tx)
        .await?;

        Ok(record)
    }

    async fn fetch_unsent(&self, limit: i64) -> Result<Vec<OutboxRecord>, OutboxError> {
        let rows = sqlx::query_as::<_, OutboxRecord>(
            r#"
            SELECT id, event_type, payload, correlation_id, created_at,
                   sent, sent_at, attempt_count, last_error
            FROM outbox
            WHERE sent = false
            ORDER BY created_at ASC, id ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn mark_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> Result<(), OutboxError> {
        sqlx::query(
            r#"
            UPDATE outbox
            SET sent = true, sent_at = $2
            WHERE id = $1 AND sent = false
            "#,
        )
        .bind(id)
        .bind(sent_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_attempt(&self, id: Uuid, error: &str) -> Result<(), OutboxError> {
        sqlx::query(
            r#"
            UPDATE outbox
            SET attempt_count = attempt_count + 1, last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn purge(&self, older_than: DateTime<Utc>) -> Result<u64, OutboxError> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox
            WHERE sent = true AND sent_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
