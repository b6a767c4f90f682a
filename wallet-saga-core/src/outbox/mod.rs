//! The transactional outbox (`spec.md` §3.1, §4.2, §6.3).

mod postgres;
pub mod publisher;

pub use postgres::PgOutboxStore;
pub use publisher::OutboxPublisher;

use crate::error::OutboxError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

/// A row in the outbox table, as described in `spec.md` §3.1.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub correlation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub attempt_count: i32,
    pub last_error: Option<String>,
}

/// Operations on the outbox table (`spec.md` §4.2).
///
/// `append` takes the caller's transaction so the outbox row commits
/// atomically with whatever business row prompted it — that's the whole
/// point of the pattern (`spec.md` §3.1 invariants).
#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn append(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event_type: &str,
        payload: serde_json::Value,
        correlation_id: Option<Uuid>,
    ) -> Result<OutboxRecord, OutboxError>;

    /// Rows with `sent = false`, ordered by `(created_at, id)` ascending,
    /// up to `limit`.
    async fn fetch_unsent(&self, limit: i64) -> Result<Vec<OutboxRecord>, OutboxError>;

    /// Idempotent: a second call for the same `id` is a no-op.
    async fn mark_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> Result<(), OutboxError>;

    async fn record_attempt(&self, id: Uuid, error: &str) -> Result<(), OutboxError>;

    /// Deletes rows where `sent = true AND sent_at < older_than`.
    async fn purge(&self, older_than: DateTime<Utc>) -> Result<u64, OutboxError>;
}
