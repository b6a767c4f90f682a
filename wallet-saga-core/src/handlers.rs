//! Saga-transition handler (`spec.md` §4.5 step 7, §4.4): the
//! [`crate::dispatcher::EventHandler`] that drives the saga state machine
//! off consumed envelopes.

use crate::dispatcher::{EventHandler, HandlerError};
use crate::envelope::Envelope;
use crate::saga::{self, SagaEvent, SnapshotStore};
use async_trait::async_trait;
use std::sync::Arc;

/// Maps a CloudEvents `type` string to the [`SagaEvent`] it drives. Distinct
/// from `bindings::EventType` because a handler only needs to know how to
/// advance the saga, not where the event was published.
fn saga_event_for(event_type: &str) -> Option<SagaEvent> {
    match event_type {
        "walletCreatedEventProducer" => Some(SagaEvent::WalletCreated),
        "fundsAddedEventProducer" => Some(SagaEvent::FundsAdded),
        "fundsWithdrawnEventProducer" => Some(SagaEvent::FundsWithdrawn),
        "fundsTransferredEventProducer" => Some(SagaEvent::FundsTransferred),
        _ => None,
    }
}

/// Advances the saga snapshot identified by an envelope's `correlationid`.
/// An envelope with no `correlationid` never reaches [`saga::transition`] —
/// per `spec.md` §4.4, a missing correlation id fails the attempt as a
/// non-recoverable error rather than silently skipping the event.
pub struct SagaTransitionHandler<S: SnapshotStore> {
    store: Arc<S>,
    max_retries: u32,
}

impl<S: SnapshotStore> SagaTransitionHandler<S> {
    pub fn new(store: Arc<S>, max_retries: u32) -> Self {
        Self { store, max_retries }
    }
}

#[async_trait]
impl<S: SnapshotStore> EventHandler for SagaTransitionHandler<S> {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let Some(event) = saga_event_for(&envelope.event_type) else {
            // Not a saga-driving event type — nothing for this handler to do.
            return Ok(());
        };

        let Some(correlation_id) = envelope.correlationid else {
            return Err(HandlerError::NonRecoverable(
                "event carries no correlationid, cannot drive saga".to_string(),
            ));
        };

        saga::transition(
            self.store.as_ref(),
            correlation_id,
            event,
            envelope.id,
            envelope.time,
            self.max_retries,
        )
        .await
        .map(|_| ())
        .map_err(classify)
    }
}

/// Optimistic-concurrency exhaustion and database errors are worth
/// redelivering; a structurally invalid transition or an unknown saga never
/// resolves itself on retry.
fn classify(err: crate::error::SnapshotStoreError) -> HandlerError {
    use crate::error::{SagaError, SnapshotStoreError};

    match err {
        SnapshotStoreError::Database(e) => HandlerError::Recoverable(e.to_string()),
        SnapshotStoreError::Saga(SagaError::ConcurrentTransition(id)) => {
            HandlerError::Recoverable(format!("concurrent transition retries exhausted for saga {id}"))
        }
        SnapshotStoreError::Saga(e) => HandlerError::NonRecoverable(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{encode, EncodeParams};
    use crate::saga::SagaState;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct FakeSnapshotStore {
        rows: Mutex<HashMap<Uuid, crate::saga::SagaSnapshot>>,
    }

    impl FakeSnapshotStore {
        fn new() -> Self {
            Self {
                rows: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl SnapshotStore for FakeSnapshotStore {
        async fn load(
            &self,
            saga_id: Uuid,
        ) -> Result<Option<crate::saga::SagaSnapshot>, crate::error::SnapshotStoreError> {
            Ok(self.rows.lock().unwrap().get(&saga_id).cloned())
        }

        async fn create_initial(
            &self,
            saga_id: Uuid,
        ) -> Result<crate::saga::SagaSnapshot, crate::error::SnapshotStoreError> {
            let snapshot = test_snapshot(saga_id, SagaState::Initial, 0);
            self.rows.lock().unwrap().insert(saga_id, snapshot.clone());
            Ok(snapshot)
        }

        async fn try_transition(
            &self,
            saga_id: Uuid,
            expected_version: i32,
            new_state: SagaState,
            _last_event_id: Uuid,
            _now: chrono::DateTime<Utc>,
        ) -> Result<bool, crate::error::SnapshotStoreError> {
            let mut rows = self.rows.lock().unwrap();
            let Some(row) = rows.get_mut(&saga_id) else {
                return Ok(false);
            };
            if row.version != expected_version {
                return Ok(false);
            }
            *row = test_snapshot(saga_id, new_state, row.version + 1);
            Ok(true)
        }
    }

    fn test_snapshot(saga_id: Uuid, state: SagaState, version: i32) -> crate::saga::SagaSnapshot {
        crate::saga::SagaSnapshot::for_test(saga_id, state, version, None, Utc::now())
    }

    fn envelope_for(event_type: &str, correlation_id: Option<Uuid>) -> Envelope {
        encode(EncodeParams {
            id: Uuid::new_v4(),
            event_type,
            source: "/wallet-hub",
            payload: &serde_json::json!({}),
            correlation_id,
            traceparent: None,
            tracestate: None,
            send_timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn wallet_created_event_creates_and_transitions_saga() {
        let store = Arc::new(FakeSnapshotStore::new());
        let handler = SagaTransitionHandler::new(store.clone(), 3);
        let correlation_id = Uuid::new_v4();

        handler
            .handle(&envelope_for("walletCreatedEventProducer", Some(correlation_id)))
            .await
            .unwrap();

        let snapshot = store.load(correlation_id).await.unwrap().unwrap();
        assert_eq!(snapshot.state(), SagaState::WalletCreated);
    }

    #[tokio::test]
    async fn missing_correlation_id_is_non_recoverable() {
        let store = Arc::new(FakeSnapshotStore::new());
        let handler = SagaTransitionHandler::new(store, 3);

        let err = handler
            .handle(&envelope_for("walletCreatedEventProducer", None))
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::NonRecoverable(_)));
    }

    #[tokio::test]
    async fn out_of_order_event_is_non_recoverable_not_retried() {
        let store = Arc::new(FakeSnapshotStore::new());
        let handler = SagaTransitionHandler::new(store, 3);
        let correlation_id = Uuid::new_v4();

        let err = handler
            .handle(&envelope_for("fundsWithdrawnEventProducer", Some(correlation_id)))
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::NonRecoverable(_)));
    }

    #[tokio::test]
    async fn non_saga_event_type_is_a_no_op() {
        let store = Arc::new(FakeSnapshotStore::new());
        let handler = SagaTransitionHandler::new(store, 3);

        handler
            .handle(&envelope_for("someUnrelatedNotification", None))
            .await
            .unwrap();
    }
}
