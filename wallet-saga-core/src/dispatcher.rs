//! Consumer dispatcher (`spec.md` §4.5): one instance per subscribed
//! destination, decoding envelopes, checking idempotency, and handing the
//! payload to a registered handler.

use crate::broker::{BrokerConsumer, Delivery};
use crate::envelope::{decode, Envelope};
use crate::error::DispatchError;
use crate::idempotency::IdempotencyLedger;
use crate::tracing_facade::{self, CounterName, Span, SpanKind, SpanStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// What a dispatcher does with a decoded envelope. Implementations are
/// typically saga-transition handlers (`spec.md` §4.5 step 7), but the
/// trait itself knows nothing about sagas — that's `handlers::SagaTransitionHandler`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// `Ok(())` acknowledges and records the ledger entry. `Err` decides
    /// ack/nack and ledger recording via [`HandlerOutcome::from`] on the
    /// dispatcher side — recoverable errors redeliver, non-recoverable ones
    /// acknowledge to stop redelivery.
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError>;
}

/// Distinguishes a recoverable failure (redeliver) from a non-recoverable
/// one (stop redelivery) per `spec.md` §4.5 steps 9–10.
#[derive(Debug)]
pub enum HandlerError {
    Recoverable(String),
    NonRecoverable(String),
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerError::Recoverable(m) => write!(f, "recoverable: {m}"),
            HandlerError::NonRecoverable(m) => write!(f, "non-recoverable: {m}"),
        }
    }
}

impl std::error::Error for HandlerError {}

/// One dispatcher per subscribed destination. Processes deliveries from
/// that destination strictly in the order the broker hands them over —
/// no concurrent handler invocations within one dispatcher instance
/// (`spec.md` §4.5, §5).
pub struct ConsumerDispatcher<C: BrokerConsumer, L: IdempotencyLedger> {
    consumer_name: String,
    destination: String,
    broker: Arc<C>,
    ledger: Arc<L>,
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl<C: BrokerConsumer, L: IdempotencyLedger> ConsumerDispatcher<C, L> {
    pub fn new(
        consumer_name: impl Into<String>,
        destination: impl Into<String>,
        broker: Arc<C>,
        ledger: Arc<L>,
        handlers: HashMap<String, Arc<dyn EventHandler>>,
    ) -> Self {
        Self {
            consumer_name: consumer_name.into(),
            destination: destination.into(),
            broker,
            ledger,
            handlers,
        }
    }

    /// Runs until `cancel` resolves.
    pub async fn run(&self, mut cancel: tokio::sync::watch::Receiver<bool>) {
        info!(destination = %self.destination, "consumer dispatcher starting");
        loop {
            tokio::select! {
                delivery = self.broker.recv() => {
                    match delivery {
                        Ok(delivery) => self.process(delivery).await,
                        Err(e) => warn!(destination = %self.destination, error = %e, "broker receive error"),
                    }
                }
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        info!(destination = %self.destination, "dispatcher received cancellation, exiting");
                        return;
                    }
                }
            }
        }
    }

    /// Processes a single delivery end to end — exposed separately from
    /// [`run`] so tests can drive it without a broker loop.
    pub async fn process(&self, delivery: Delivery) {
        let (envelope, dropped_traceparent) = match decode(&delivery.payload) {
            Ok(result) => result,
            Err(e) => {
                warn!(destination = %self.destination, error = %e, "malformed envelope, dropping (poison message)");
                tracing_facade::increment_counter(CounterName::PoisonMessage);
                let span = Span::start("consume.malformed", SpanKind::Internal, None);
                span.record_error(&e);
                span.end(SpanStatus::Error);
                self.broker.nack(&delivery, false).await;
                return;
            }
        };

        if dropped_traceparent {
            warn!(event_id = %envelope.id, "malformed traceparent dropped, starting new root trace");
        }

        let parent = envelope
            .traceparent
            .as_deref()
            .and_then(|tp| tracing_facade::context_from_traceparent(tp, envelope.tracestate.as_deref()));

        let span = Span::start(
            format!("consume.{}", envelope.event_type),
            SpanKind::Consumer,
            parent.as_ref(),
        );
        span.set_attribute("messaging.destination", self.destination.clone());
        span.set_attribute("messaging.kafka.partition", delivery.partition.to_string());
        span.set_attribute("messaging.kafka.offset", delivery.offset.to_string());
        span.set_attribute("messaging.message.id", envelope.id.to_string());
        if let Some(correlation_id) = envelope.correlationid {
            span.set_attribute("correlationid", correlation_id.to_string());
        }
        if let Some(send_ts) = envelope.sendtimestamp {
            let lag_ms = Utc::now().timestamp_millis() - send_ts;
            span.set_attribute("consumer.lag_ms", lag_ms.to_string());
        }

        match self.handle_with_idempotency(&envelope).await {
            Ok(outcome) => {
                span.set_attribute("duplicate", outcome.was_duplicate.to_string());
                span.end(SpanStatus::Ok);
                self.broker.ack(&delivery).await;
            }
            Err(DispatchError::Recoverable(msg)) => {
                warn!(event_id = %envelope.id, error = %msg, "recoverable handler error, redelivering");
                span.end(SpanStatus::Error);
                self.broker.nack(&delivery, true).await;
            }
            Err(e) => {
                warn!(event_id = %envelope.id, error = %e, "non-recoverable handler error, acknowledging");
                span.end(SpanStatus::Error);
                self.broker.ack(&delivery).await;
            }
        }
    }

    async fn handle_with_idempotency(&self, envelope: &Envelope) -> Result<Outcome, DispatchError> {
        if self.ledger.contains(&self.consumer_name, envelope.id).await? {
            tracing_facade::increment_counter(CounterName::DuplicateDelivery);
            return Ok(Outcome { was_duplicate: true });
        }

        let Some(handler) = self.handlers.get(&envelope.event_type) else {
            warn!(event_type = %envelope.event_type, "no handler registered, acknowledging without processing");
            return Ok(Outcome { was_duplicate: false });
        };

        match handler.handle(envelope).await {
            Ok(()) => {
                self.ledger
                    .record(&self.consumer_name, envelope.id, Utc::now())
                    .await?;
                Ok(Outcome { was_duplicate: false })
            }
            Err(HandlerError::Recoverable(msg)) => Err(DispatchError::Recoverable(msg)),
            Err(HandlerError::NonRecoverable(msg)) => Err(DispatchError::NonRecoverable(msg)),
        }
    }
}

struct Outcome {
    was_duplicate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerPublishError;
    use crate::envelope::{encode, EncodeParams};
    use std::sync::Mutex;
    use uuid::Uuid;

    struct NoopConsumer;
    #[async_trait]
    impl BrokerConsumer for NoopConsumer {
        async fn recv(&self) -> Result<Delivery, BrokerPublishError> {
            unimplemented!("tests drive process() directly")
        }
        async fn ack(&self, _delivery: &Delivery) {}
        async fn nack(&self, _delivery: &Delivery, _requeue: bool) {}
    }

    struct FakeLedger {
        seen: Mutex<std::collections::HashSet<Uuid>>,
    }

    #[async_trait]
    impl IdempotencyLedger for FakeLedger {
        async fn contains(&self, _consumer: &str, event_id: Uuid) -> Result<bool, crate::error::IdempotencyError> {
            Ok(self.seen.lock().unwrap().contains(&event_id))
        }
        async fn record(
            &self,
            _consumer: &str,
            event_id: Uuid,
            _processed_at: chrono::DateTime<Utc>,
        ) -> Result<(), crate::error::IdempotencyError> {
            self.seen.lock().unwrap().insert(event_id);
            Ok(())
        }
        async fn purge(&self, _older_than: chrono::DateTime<Utc>) -> Result<u64, crate::error::IdempotencyError> {
            Ok(0)
        }
    }

    struct CountingHandler {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _envelope: &Envelope) -> Result<(), HandlerError> {
            *self.calls.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn delivery_for(event_id: Uuid) -> Delivery {
        let envelope = encode(EncodeParams {
            id: event_id,
            event_type: "walletCreatedEventProducer",
            source: "/wallet-hub",
            payload: &serde_json::json!({"walletId": "W1"}),
            correlation_id: Some(Uuid::new_v4()),
            traceparent: None,
            tracestate: None,
            send_timestamp: Utc::now(),
        });
        Delivery {
            payload: serde_json::to_vec(&envelope).unwrap(),
            partition: 0,
            offset: 1,
        }
    }

    #[tokio::test]
    async fn duplicate_delivery_skips_handler() {
        let handler = Arc::new(CountingHandler { calls: Mutex::new(0) });
        let mut handlers: HashMap<String, Arc<dyn EventHandler>> = HashMap::new();
        handlers.insert("walletCreatedEventProducer".to_string(), handler.clone());

        let dispatcher = ConsumerDispatcher::new(
            "history-service",
            "wallet-created-topic",
            Arc::new(NoopConsumer),
            Arc::new(FakeLedger {
                seen: Mutex::new(std::collections::HashSet::new()),
            }),
            handlers,
        );

        let event_id = Uuid::new_v4();
        let before = tracing_facade::counter_value(CounterName::DuplicateDelivery);
        dispatcher.process(delivery_for(event_id)).await;
        dispatcher.process(delivery_for(event_id)).await;

        assert_eq!(*handler.calls.lock().unwrap(), 1);
        assert_eq!(
            tracing_facade::counter_value(CounterName::DuplicateDelivery),
            before + 1
        );
    }

    #[tokio::test]
    async fn unknown_event_type_acknowledges_without_panicking() {
        let handlers: HashMap<String, Arc<dyn EventHandler>> = HashMap::new();
        let dispatcher = ConsumerDispatcher::new(
            "history-service",
            "wallet-created-topic",
            Arc::new(NoopConsumer),
            Arc::new(FakeLedger {
                seen: Mutex::new(std::collections::HashSet::new()),
            }),
            handlers,
        );

        dispatcher.process(delivery_for(Uuid::new_v4())).await;
    }

    #[tokio::test]
    async fn malformed_envelope_increments_poison_counter() {
        let handlers: HashMap<String, Arc<dyn EventHandler>> = HashMap::new();
        let dispatcher = ConsumerDispatcher::new(
            "history-service",
            "wallet-created-topic",
            Arc::new(NoopConsumer),
            Arc::new(FakeLedger {
                seen: Mutex::new(std::collections::HashSet::new()),
            }),
            handlers,
        );

        let before = tracing_facade::counter_value(CounterName::PoisonMessage);
        dispatcher
            .process(Delivery {
                payload: b"not valid json".to_vec(),
                partition: 0,
                offset: 1,
            })
            .await;

        assert_eq!(
            tracing_facade::counter_value(CounterName::PoisonMessage),
            before + 1
        );
    }
}
