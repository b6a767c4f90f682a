//! Wires the four wallet-topic consumer dispatchers: decode, idempotency
//! check and saga-transition driving all live in `wallet_saga_core`; this
//! module supplies the history-specific [`EventHandler`] that also
//! projects each envelope into the `transaction_events` read model.

use crate::models::{BalanceChangedData, FundsTransferredData, WalletCreatedData};
use crate::repository::EventRepository;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use wallet_saga_core::{
    dispatcher::{EventHandler, HandlerError},
    saga::{PgSnapshotStore, SnapshotStore},
    Envelope, SagaTransitionHandler,
};

/// Projects a decoded envelope into the `transaction_events` table, then
/// hands the same envelope to the saga state machine. The read-model write
/// and the saga transition are independent effects (`spec.md` §4.6): a
/// failure in one does not roll back the other, matching at-least-once
/// semantics — a redelivery simply repeats both, and both are themselves
/// idempotent on `transaction_id`/`correlationId`.
pub struct HistoryEventHandler<S: SnapshotStore> {
    repository: EventRepository,
    saga: SagaTransitionHandler<S>,
}

impl<S: SnapshotStore> HistoryEventHandler<S> {
    pub fn new(repository: EventRepository, saga: SagaTransitionHandler<S>) -> Self {
        Self { repository, saga }
    }

    async fn project(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        match envelope.event_type.as_str() {
            "walletCreatedEventProducer" => {
                let data: WalletCreatedData = parse(envelope)?;
                self.repository
                    .store_event(
                        &data.wallet_id,
                        &data.user_id,
                        Decimal::ZERO,
                        "WALLET_CREATED",
                        None,
                        envelope.correlationid,
                        envelope.data.clone(),
                    )
                    .await
                    .map_err(recoverable)?;
            }
            "fundsAddedEventProducer" => {
                let data: BalanceChangedData = parse(envelope)?;
                self.repository
                    .store_event(
                        &data.wallet_id,
                        &data.user_id,
                        data.amount,
                        "WALLET_FUNDED",
                        Some(&data.transaction_id),
                        envelope.correlationid,
                        envelope.data.clone(),
                    )
                    .await
                    .map_err(recoverable)?;
            }
            "fundsWithdrawnEventProducer" => {
                let data: BalanceChangedData = parse(envelope)?;
                self.repository
                    .store_event(
                        &data.wallet_id,
                        &data.user_id,
                        data.amount,
                        "WALLET_WITHDRAWN",
                        Some(&data.transaction_id),
                        envelope.correlationid,
                        envelope.data.clone(),
                    )
                    .await
                    .map_err(recoverable)?;
            }
            "fundsTransferredEventProducer" => {
                let data: FundsTransferredData = parse(envelope)?;
                self.repository
                    .store_transfer_events(
                        &data.from_wallet_id,
                        &data.from_user_id,
                        &data.to_wallet_id,
                        &data.to_user_id,
                        data.amount,
                        &data.reference_id,
                        envelope.correlationid,
                        envelope.data.clone(),
                    )
                    .await
                    .map_err(recoverable)?;
            }
            other => {
                tracing::debug!(event_type = %other, "no read-model projection for this event type");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<S: SnapshotStore> EventHandler for HistoryEventHandler<S> {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        self.project(envelope).await?;
        self.saga.handle(envelope).await
    }
}

fn parse<T: serde::de::DeserializeOwned>(envelope: &Envelope) -> Result<T, HandlerError> {
    serde_json::from_value(envelope.data.clone()).map_err(|e| {
        HandlerError::NonRecoverable(format!(
            "envelope {} data does not match expected shape: {e}",
            envelope.id
        ))
    })
}

fn recoverable(e: crate::errors::HistoryError) -> HandlerError {
    HandlerError::Recoverable(e.to_string())
}

/// One [`wallet_saga_core::ConsumerDispatcher`] per wallet topic, sharing
/// the same idempotency ledger and saga snapshot store, each processing its
/// destination's deliveries independently (`spec.md` §4.5, §5).
pub fn build_handlers(
    repository: EventRepository,
    snapshot_store: Arc<PgSnapshotStore>,
    max_transition_retries: u32,
) -> std::collections::HashMap<String, Arc<dyn EventHandler>> {
    let mut handlers: std::collections::HashMap<String, Arc<dyn EventHandler>> =
        std::collections::HashMap::new();

    for event_type in [
        "walletCreatedEventProducer",
        "fundsAddedEventProducer",
        "fundsWithdrawnEventProducer",
        "fundsTransferredEventProducer",
    ] {
        let handler = Arc::new(HistoryEventHandler::new(
            repository.clone(),
            SagaTransitionHandler::new(snapshot_store.clone(), max_transition_retries),
        ));
        handlers.insert(event_type.to_string(), handler);
    }

    handlers
}
