use crate::errors::HistoryResult;
use crate::models::TransactionEvent;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

/// Repository for transaction event operations
#[derive(Clone)]
pub struct EventRepository {
    pool: PgPool,
}

impl EventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Store a projected event.
    ///
    /// CRITICAL: This must be idempotent!
    /// - Uses transaction_id to prevent duplicates
    /// - If event with same transaction_id exists, skip it
    ///
    /// Why? The broker delivers at-least-once, so we might see the same
    /// event multiple times even after the dispatcher's own idempotency
    /// ledger — this is a second, narrower check scoped to this read model.
    #[allow(clippy::too_many_arguments)]
    pub async fn store_event(
        &self,
        wallet_id: &str,
        user_id: &str,
        amount: Decimal,
        event_type: &str,
        transaction_id: Option<&str>,
        correlation_id: Option<Uuid>,
        event_data: serde_json::Value,
    ) -> HistoryResult<Option<TransactionEvent>> {
        let event_id = Uuid::new_v4().to_string();

        if let Some(txn_id) = transaction_id {
            let exists = sqlx::query_scalar::<_, bool>(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM transaction_events
                    WHERE transaction_id = $1
                )
                "#,
            )
            .bind(txn_id)
            .fetch_one(&self.pool)
            .await?;

            if exists {
                tracing::info!(
                    transaction_id = %txn_id,
                    event_type = %event_type,
                    "Event already processed, skipping (idempotent)"
                );
                return Ok(None);
            }
        }

        let stored_event = sqlx::query_as::<_, TransactionEvent>(
            r#"
            INSERT INTO transaction_events
                (id, wallet_id, user_id, amount, event_type, transaction_id, correlation_id, event_data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            RETURNING id, wallet_id, user_id, amount, event_type, transaction_id, correlation_id, created_at, event_data
            "#,
        )
        .bind(&event_id)
        .bind(wallet_id)
        .bind(user_id)
        .bind(amount)
        .bind(event_type)
        .bind(transaction_id)
        .bind(correlation_id)
        .bind(&event_data)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            event_id = %event_id,
            wallet_id = %wallet_id,
            event_type = %event_type,
            "Event stored successfully"
        );

        Ok(Some(stored_event))
    }

    /// A transfer affects TWO wallets, so it projects to TWO rows: an
    /// outgoing event for the sender and an incoming one for the receiver.
    #[allow(clippy::too_many_arguments)]
    pub async fn store_transfer_events(
        &self,
        from_wallet_id: &str,
        from_user_id: &str,
        to_wallet_id: &str,
        to_user_id: &str,
        amount: Decimal,
        reference_id: &str,
        correlation_id: Option<Uuid>,
        event_data: serde_json::Value,
    ) -> HistoryResult<Vec<TransactionEvent>> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM transaction_events
                WHERE transaction_id = $1
            )
            "#,
        )
        .bind(reference_id)
        .fetch_one(&self.pool)
        .await?;

        if exists {
            tracing::info!(
                reference_id = %reference_id,
                "Transfer already processed, skipping"
            );
            return Ok(vec![]);
        }

        let mut events = Vec::new();

        let out_event_id = Uuid::new_v4().to_string();
        let out_event = sqlx::query_as::<_, TransactionEvent>(
            r#"
            INSERT INTO transaction_events
                (id, wallet_id, user_id, amount, event_type, transaction_id, correlation_id, event_data, created_at)
            VALUES ($1, $2, $3, $4, 'TRANSFER_OUT', $5, $6, $7, $8)
            RETURNING id, wallet_id, user_id, amount, event_type, transaction_id, correlation_id, created_at, event_data
            "#,
        )
        .bind(&out_event_id)
        .bind(from_wallet_id)
        .bind(from_user_id)
        .bind(amount)
        .bind(reference_id)
        .bind(correlation_id)
        .bind(&event_data)
        .bind(chrono::Utc::now())
        .fetch_one(&self.pool)
        .await?;

        events.push(out_event);

        let in_event_id = Uuid::new_v4().to_string();
        let in_event = sqlx::query_as::<_, TransactionEvent>(
            r#"
            INSERT INTO transaction_events
                (id, wallet_id, user_id, amount, event_type, transaction_id, correlation_id, event_data, created_at)
            VALUES ($1, $2, $3, $4, 'TRANSFER_IN', $5, $6, $7, $8)
            RETURNING id, wallet_id, user_id, amount, event_type, transaction_id, correlation_id, created_at, event_data
            "#,
        )
        .bind(&in_event_id)
        .bind(to_wallet_id)
        .bind(to_user_id)
        .bind(amount)
        .bind(reference_id)
        .bind(correlation_id)
        .bind(&event_data)
        .bind(chrono::Utc::now())
        .fetch_one(&self.pool)
        .await?;

        events.push(in_event);

        tracing::info!(
            reference_id = %reference_id,
            from_wallet = %from_wallet_id,
            to_wallet = %to_wallet_id,
            "Transfer events stored"
        );

        Ok(events)
    }

    /// Get all events for a specific wallet
    pub async fn get_wallet_history(&self, wallet_id: &str) -> HistoryResult<Vec<TransactionEvent>> {
        let events = sqlx::query_as::<_, TransactionEvent>(
            r#"
            SELECT id, wallet_id, user_id, amount, event_type, transaction_id, correlation_id, created_at, event_data
            FROM transaction_events
            WHERE wallet_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// Get all events for a specific user (across all their wallets)
    pub async fn get_user_activity(&self, user_id: &str) -> HistoryResult<Vec<TransactionEvent>> {
        let events = sqlx::query_as::<_, TransactionEvent>(
            r#"
            SELECT id, wallet_id, user_id, amount, event_type, transaction_id, correlation_id, created_at, event_data
            FROM transaction_events
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}
