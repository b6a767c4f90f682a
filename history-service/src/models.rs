use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Transaction event stored in the database
/// This is our event-sourced history
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub id: String,
    pub wallet_id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub event_type: String,
    pub transaction_id: Option<String>, // For idempotency - ensures we don't process same event twice
    pub correlation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub event_data: serde_json::Value, // JSONB - stores the full event for debugging
}

/// `data` payloads as the wallet service's outbox rows encode them — one
/// shape per event type, matching `wallet_service::repository`'s
/// `serde_json::json!` literals field for field.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletCreatedData {
    pub wallet_id: String,
    pub user_id: String,
    #[allow(dead_code)]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceChangedData {
    pub wallet_id: String,
    pub user_id: String,
    pub amount: Decimal,
    #[allow(dead_code)]
    pub new_balance: Decimal,
    pub transaction_id: String,
    #[allow(dead_code)]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundsTransferredData {
    pub from_wallet_id: String,
    pub from_user_id: String,
    pub to_wallet_id: String,
    pub to_user_id: String,
    pub amount: Decimal,
    pub reference_id: String,
    #[allow(dead_code)]
    pub timestamp: DateTime<Utc>,
}

// API Response models

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn error(message: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            message: Some(message),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub id: String,
    pub wallet_id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub event_type: String,
    pub created_at: DateTime<Utc>,
}

impl From<TransactionEvent> for EventResponse {
    fn from(event: TransactionEvent) -> Self {
        Self {
            id: event.id,
            wallet_id: event.wallet_id,
            user_id: event.user_id,
            amount: event.amount,
            event_type: event.event_type,
            created_at: event.created_at,
        }
    }
}
