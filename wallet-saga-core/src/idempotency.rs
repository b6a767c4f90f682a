//! Idempotency ledger (`spec.md` §4.6, §6.3): records processed
//! `(consumer, event-id)` pairs, consulted before a handler's side effects.

use crate::error::IdempotencyError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    async fn contains(&self, consumer: &str, event_id: Uuid) -> Result<bool, IdempotencyError>;

    /// Idempotent insert — a second call for the same pair returns `Ok(())`
    /// without error.
    async fn record(
        &self,
        consumer: &str,
        event_id: Uuid,
        processed_at: DateTime<Utc>,
    ) -> Result<(), IdempotencyError>;

    async fn purge(&self, older_than: DateTime<Utc>) -> Result<u64, IdempotencyError>;
}

#[derive(Clone)]
pub struct PgIdempotencyLedger {
    pool: PgPool,
}

impl PgIdempotencyLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyLedger for PgIdempotencyLedger {
    async fn contains(&self, consumer: &str, event_id: Uuid) -> Result<bool, IdempotencyError> {
        let exists: Option<(i32,)> = sqlx::query_as(
            r#"
            SELECT 1
            FROM processed_event
            WHERE consumer_name = $1 AND event_id = $2
            "#,
        )
        .bind(consumer)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(exists.is_some())
    }

    async fn record(
        &self,
        consumer: &str,
        event_id: Uuid,
        processed_at: DateTime<Utc>,
    ) -> Result<(), IdempotencyError> {
        sqlx::query(
            r#"
            INSERT INTO processed_event (consumer_name, event_id, processed_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (consumer_name, event_id) DO NOTHING
            "#,
        )
        .bind(consumer)
        .bind(event_id)
        .bind(processed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn purge(&self, older_than: DateTime<Utc>) -> Result<u64, IdempotencyError> {
        let result = sqlx::query(
            r#"
            DELETE FROM processed_event
            WHERE processed_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Periodic sweeper for ledger rows past `idempotencyRetention` (`spec.md`
/// §3.1, §6.4). Run on its own timer, same shape as
/// [`crate::outbox::publisher::run_retention_sweeper`] — purging is an
/// entirely separate concern from the hot idempotency check and must never
/// share a loop with it.
pub async fn run_ledger_sweeper<L: IdempotencyLedger>(
    ledger: Arc<L>,
    sweep_interval: Duration,
    retention: chrono::Duration,
    mut cancel: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(sweep_interval) => {}
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    return;
                }
            }
        }

        let cutoff = Utc::now() - retention;
        match ledger.purge(cutoff).await {
            Ok(purged) if purged > 0 => info!(purged, "purged processed-event ledger rows past retention"),
            Ok(_) => debug!("idempotency sweep: nothing to purge"),
            Err(e) => warn!(error = %e, "idempotency ledger sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct FakeLedger {
        seen: Mutex<HashSet<(String, Uuid)>>,
    }

    #[async_trait]
    impl IdempotencyLedger for FakeLedger {
        async fn contains(&self, consumer: &str, event_id: Uuid) -> Result<bool, IdempotencyError> {
            Ok(self
                .seen
                .lock()
                .unwrap()
                .contains(&(consumer.to_string(), event_id)))
        }

        async fn record(
            &self,
            consumer: &str,
            event_id: Uuid,
            _processed_at: DateTime<Utc>,
        ) -> Result<(), IdempotencyError> {
            self.seen
                .lock()
                .unwrap()
                .insert((consumer.to_string(), event_id));
            Ok(())
        }

        async fn purge(&self, _older_than: DateTime<Utc>) -> Result<u64, IdempotencyError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn record_is_idempotent() {
        let ledger = FakeLedger {
            seen: Mutex::new(HashSet::new()),
        };
        let event_id = Uuid::new_v4();

        assert!(!ledger.contains("history", event_id).await.unwrap());
        ledger.record("history", event_id, Utc::now()).await.unwrap();
        ledger.record("history", event_id, Utc::now()).await.unwrap();
        assert!(ledger.contains("history", event_id).await.unwrap());
    }

    #[tokio::test]
    async fn different_consumers_are_independent() {
        let ledger = FakeLedger {
            seen: Mutex::new(HashSet::new()),
        };
        let event_id = Uuid::new_v4();
        ledger.record("history", event_id, Utc::now()).await.unwrap();

        assert!(!ledger.contains("billing", event_id).await.unwrap());
    }
}
