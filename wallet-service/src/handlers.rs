use crate::errors::WalletResult;
use crate::models::*;
use crate::repository::WalletRepository;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

/// Application state shared across handlers
///
/// Why Arc? The repository itself wraps its Postgres pool and outbox store
/// in cheaply-cloneable handles, so `AppState` stays `Clone` without an
/// explicit `Arc` wrapper here.
#[derive(Clone)]
pub struct AppState {
    pub repository: WalletRepository,
}

/// Create a new wallet
///
/// Flow:
/// 1. Create the wallet row and its outbox row in one transaction
/// 2. Return wallet to client
///
/// The outbox publisher picks the event up on its own schedule — there is
/// no synchronous Kafka round trip on this request path anymore, so a
/// broker outage never blocks wallet creation (`spec.md` §3.1).
pub async fn create_wallet(
    State(state): State<AppState>,
    Json(payload): Json<CreateWalletRequest>,
) -> WalletResult<Json<ApiResponse<WalletResponse>>> {
    tracing::info!(user_id = %payload.user_id, "Creating wallet");

    let wallet = state
        .repository
        .create_wallet(&payload.user_id, payload.correlation_id)
        .await?;

    tracing::info!(
        wallet_id = %wallet.id,
        user_id = %wallet.user_id,
        "Wallet created successfully"
    );

    Ok(Json(ApiResponse::success(WalletResponse::from(wallet))))
}

/// Get wallet by ID
pub async fn get_wallet(
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
) -> WalletResult<Json<ApiResponse<WalletResponse>>> {
    tracing::debug!(wallet_id = %wallet_id, "Fetching wallet");

    let wallet = state.repository.find_by_id(&wallet_id).await?;

    Ok(Json(ApiResponse::success(WalletResponse::from(wallet))))
}

/// Get all wallets for a user
pub async fn get_user_wallets(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> WalletResult<Json<ApiResponse<Vec<WalletResponse>>>> {
    tracing::debug!(user_id = %user_id, "Fetching user wallets");

    let wallets = state.repository.find_by_user_id(&user_id).await?;

    let response: Vec<WalletResponse> =
        wallets.into_iter().map(WalletResponse::from).collect();

    Ok(Json(ApiResponse::success(response)))
}

/// Fund a wallet (add money)
///
/// Flow:
/// 1. Update wallet balance in database (with optimistic locking)
/// 2. Create transaction record and outbox row, atomically
/// 3. Return updated wallet
///
/// Retry handling:
/// - If OptimisticLockError, client should retry
/// - Database guarantees consistency
/// - The outbox row commits with the balance update, so a lost event
///   can't happen without also losing the balance change
pub async fn fund_wallet(
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
    Json(payload): Json<FundWalletRequest>,
) -> WalletResult<Json<ApiResponse<WalletResponse>>> {
    tracing::info!(
        wallet_id = %wallet_id,
        amount = %payload.amount,
        "Funding wallet"
    );

    let (wallet, _transaction) = state
        .repository
        .fund_wallet(&wallet_id, payload.amount, payload.correlation_id)
        .await?;

    tracing::info!(
        wallet_id = %wallet_id,
        new_balance = %wallet.balance,
        "Wallet funded successfully"
    );

    Ok(Json(ApiResponse::success(WalletResponse::from(wallet))))
}

/// Withdraw money from a wallet
///
/// Mirrors `fund_wallet`'s atomicity, with a sufficient-balance check
/// instead of an unconditional credit.
pub async fn withdraw_wallet(
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
    Json(payload): Json<WithdrawWalletRequest>,
) -> WalletResult<Json<ApiResponse<WalletResponse>>> {
    tracing::info!(
        wallet_id = %wallet_id,
        amount = %payload.amount,
        "Withdrawing from wallet"
    );

    let (wallet, _transaction) = state
        .repository
        .withdraw_wallet(&wallet_id, payload.amount, payload.correlation_id)
        .await?;

    tracing::info!(
        wallet_id = %wallet_id,
        new_balance = %wallet.balance,
        "Wallet withdrawal completed successfully"
    );

    Ok(Json(ApiResponse::success(WalletResponse::from(wallet))))
}

/// Transfer money between wallets
///
/// Flow:
/// 1. Lock both wallets in database
/// 2. Validate sender has sufficient balance
/// 3. Update both balances
/// 4. Create two transaction records (outgoing + incoming) plus one
///    outbox row, all in the same transaction
/// 5. Return both transaction records
pub async fn transfer(
    State(state): State<AppState>,
    Path(from_wallet_id): Path<String>,
    Json(payload): Json<TransferRequest>,
) -> WalletResult<Json<ApiResponse<Vec<TransactionResponse>>>> {
    tracing::info!(
        from_wallet_id = %from_wallet_id,
        to_wallet_id = %payload.to_wallet_id,
        amount = %payload.amount,
        "Processing transfer"
    );

    let (out_txn, in_txn) = state
        .repository
        .transfer(
            &from_wallet_id,
            &payload.to_wallet_id,
            payload.amount,
            payload.correlation_id,
        )
        .await?;

    tracing::info!(
        from_wallet_id = %from_wallet_id,
        to_wallet_id = %payload.to_wallet_id,
        amount = %payload.amount,
        "Transfer completed successfully"
    );

    let response = vec![
        TransactionResponse::from(out_txn),
        TransactionResponse::from(in_txn),
    ];

    Ok(Json(ApiResponse::success(response)))
}

/// Health check endpoint
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
