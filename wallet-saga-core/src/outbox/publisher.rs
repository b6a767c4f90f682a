use super::{OutboxRecord, OutboxStore};
use crate::bindings::destination_for;
use crate::broker::BrokerPublisher;
use crate::clock::Clock;
use crate::config::Config;
use crate::envelope::{encode, EncodeParams};
use crate::tracing_facade::{self, CounterName, Span, SpanKind, SpanStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The outbox publisher: one logical worker per `spec.md` §4.3/§5. Reads
/// unsent rows, builds CloudEvents envelopes with fresh trace context, and
/// publishes them — sequentially within a batch, so events sharing a
/// `correlationId` reach the broker in `createdAt` order.
pub struct OutboxPublisher<S: OutboxStore, B: BrokerPublisher, C: Clock> {
    store: Arc<S>,
    broker: Arc<B>,
    clock: Arc<C>,
    config: Config,
}

impl<S: OutboxStore, B: BrokerPublisher, C: Clock> OutboxPublisher<S, B, C> {
    pub fn new(store: Arc<S>, broker: Arc<B>, clock: Arc<C>, config: Config) -> Self {
        Self {
            store,
            broker,
            clock,
            config,
        }
    }

    /// Runs until `cancel` resolves. Each tick processes at most one batch;
    /// if the batch came back full, the next tick runs immediately instead
    /// of waiting `pollInterval` (backpressure, `spec.md` §4.3).
    pub async fn run(&self, mut cancel: tokio::sync::watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "outbox publisher starting"
        );

        loop {
            let processed = self.run_once().await;

            let full_batch = processed.map(|n| n as i64 >= self.config.batch_size).unwrap_or(false);
            if full_batch {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        info!("outbox publisher received cancellation, exiting");
                        return;
                    }
                }
            }
        }
    }

    /// Processes a single batch and returns how many rows were read (not
    /// how many were successfully published — used only to decide whether
    /// to keep draining without sleeping).
    pub async fn run_once(&self) -> Result<usize, crate::error::OutboxError> {
        let rows = self.store.fetch_unsent(self.config.batch_size).await?;
        let count = rows.len();

        for row in rows {
            self.process_row(row).await;
        }

        Ok(count)
    }

    async fn process_row(&self, row: OutboxRecord) {
        let Some(destination) = destination_for(&row.event_type) else {
            warn!(
                event_id = %row.id,
                event_type = %row.event_type,
                attempt_count = row.attempt_count,
                "no binding for event type; row stays unsent"
            );
            if row.attempt_count as u32 > self.config.missing_binding_alert_threshold {
                warn!(
                    event_id = %row.id,
                    attempt_count = row.attempt_count,
                    "ALERT: outbox row exceeded missing-binding threshold, needs operator attention"
                );
                tracing_facade::increment_counter(CounterName::MissingBindingAlert);
            }
            let _ = self
                .store
                .record_attempt(row.id, "no binding for event type")
                .await;
            return;
        };

        if let Some(delay) = self.backoff_delay(&row) {
            tokio::time::sleep(delay).await;
        }

        let span = Span::start("outbox.publish", SpanKind::Producer, None);
        span.set_attribute("messaging.destination", destination);
        span.set_attribute("messaging.kafka.topic", destination);
        if let Some(correlation_id) = row.correlation_id {
            span.set_attribute("correlationid", correlation_id.to_string());
        }

        let trace_context = span.context();
        let traceparent = tracing_facade::traceparent_from_context(&trace_context);
        let tracestate = tracing_facade::tracestate_from_context(&trace_context);

        let now = self.clock.now();
        let envelope = encode(EncodeParams {
            id: row.id,
            event_type: &row.event_type,
            source: &self.config.producer_source,
            payload: &row.payload,
            correlation_id: row.correlation_id,
            traceparent,
            tracestate,
            send_timestamp: now,
        });

        match self.broker.publish(destination, &envelope).await {
            Ok(()) => {
                if let Err(e) = self.store.mark_sent(row.id, now).await {
                    warn!(event_id = %row.id, error = %e, "published but failed to mark sent");
                }
                debug!(event_id = %row.id, destination, "published outbox row");
                span.end(SpanStatus::Ok);
            }
            Err(e) => {
                span.record_error(&e);
                span.end(SpanStatus::Error);
                if let Err(record_err) = self.store.record_attempt(row.id, &e.to_string()).await {
                    warn!(event_id = %row.id, error = %record_err, "failed to record publish attempt");
                }
                warn!(event_id = %row.id, error = %e, "publish failed, row remains unsent for retry");
            }
        }
    }

    fn backoff_delay(&self, row: &OutboxRecord) -> Option<Duration> {
        if row.attempt_count <= 0 {
            return None;
        }
        Some(self.config.publish_backoff(row.attempt_count as u32))
    }
}

/// Dedicated retention sweeper, run on its own timer (`spec.md` §4.3,
/// default 1h) rather than folded into the publish loop, so a slow purge
/// never delays publication.
pub async fn run_retention_sweeper<S: OutboxStore>(
    store: Arc<S>,
    sweep_interval: Duration,
    retention_window: chrono::Duration,
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

        let cutoff = chrono::Utc::now() - retention_window;
        match store.purge(cutoff).await {
            Ok(purged) if purged > 0 => info!(purged, "purged sent outbox rows past retention"),
            Ok(_) => debug!("retention sweep: nothing to purge"),
            Err(e) => warn!(error = %e, "retention sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerPublishError;
    use crate::clock::Clock;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;
    use uuid::Uuid;

    struct FakeClock(DateTime<Utc>);
    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    struct FakeStore {
        rows: Mutex<Vec<OutboxRecord>>,
        sent: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl OutboxStore for FakeStore {
        async fn append(
            &self,
            _tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
            _event_type: &str,
            _payload: serde_json::Value,
            _correlation_id: Option<Uuid>,
        ) -> Result<OutboxRecord, crate::error::OutboxError> {
            unimplemented!("not exercised by publisher tests")
        }

        async fn fetch_unsent(&self, limit: i64) -> Result<Vec<OutboxRecord>, crate::error::OutboxError> {
            let rows = self.rows.lock().unwrap();
            Ok(rows.iter().take(limit as usize).cloned().collect())
        }

        async fn mark_sent(&self, id: Uuid, _sent_at: DateTime<Utc>) -> Result<(), crate::error::OutboxError> {
            self.sent.lock().unwrap().push(id);
            self.rows.lock().unwrap().retain(|r| r.id != id);
            Ok(())
        }

        async fn record_attempt(&self, id: Uuid, error: &str) -> Result<(), crate::error::OutboxError> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(row) = rows.iter_mut().find(|r| r.id == id) {
                row.attempt_count += 1;
                row.last_error = Some(error.to_string());
            }
            Ok(())
        }

        async fn purge(&self, _older_than: DateTime<Utc>) -> Result<u64, crate::error::OutboxError> {
            Ok(0)
        }
    }

    struct AlwaysOkBroker;
    #[async_trait]
    impl BrokerPublisher for AlwaysOkBroker {
        async fn publish(
            &self,
            _destination: &str,
            _envelope: &crate::envelope::Envelope,
        ) -> Result<(), BrokerPublishError> {
            Ok(())
        }
    }

    struct AlwaysFailBroker;
    #[async_trait]
    impl BrokerPublisher for AlwaysFailBroker {
        async fn publish(
            &self,
            _destination: &str,
            _envelope: &crate::envelope::Envelope,
        ) -> Result<(), BrokerPublishError> {
            Err(BrokerPublishError("boom".to_string()))
        }
    }

    fn sample_row(event_type: &str) -> OutboxRecord {
        OutboxRecord {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            payload: serde_json::json!({"walletId": "W1"}),
            correlation_id: Some(Uuid::new_v4()),
            created_at: Utc::now(),
            sent: false,
            sent_at: None,
            attempt_count: 0,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn publishes_and_marks_sent_on_success() {
        let store = Arc::new(FakeStore {
            rows: Mutex::new(vec![sample_row("walletCreatedEventProducer")]),
            sent: Mutex::new(vec![]),
        });
        let publisher = OutboxPublisher::new(
            store.clone(),
            Arc::new(AlwaysOkBroker),
            Arc::new(FakeClock(Utc::now())),
            Config::default(),
        );

        let processed = publisher.run_once().await.unwrap();
        assert_eq!(processed, 1);
        assert_eq!(store.sent.lock().unwrap().len(), 1);
        assert!(store.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn leaves_row_unsent_and_records_attempt_on_broker_failure() {
        let store = Arc::new(FakeStore {
            rows: Mutex::new(vec![sample_row("walletCreatedEventProducer")]),
            sent: Mutex::new(vec![]),
        });
        let publisher = OutboxPublisher::new(
            store.clone(),
            Arc::new(AlwaysFailBroker),
            Arc::new(FakeClock(Utc::now())),
            Config::default(),
        );

        publisher.run_once().await.unwrap();
        assert!(store.sent.lock().unwrap().is_empty());
        let rows = store.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].attempt_count, 1);
        assert!(rows[0].last_error.is_some());
    }

    #[tokio::test]
    async fn row_with_unbound_event_type_stays_unsent() {
        let store = Arc::new(FakeStore {
            rows: Mutex::new(vec![sample_row("unknownEventProducer")]),
            sent: Mutex::new(vec![]),
        });
        let publisher = OutboxPublisher::new(
            store.clone(),
            Arc::new(AlwaysOkBroker),
            Arc::new(FakeClock(Utc::now())),
            Config::default(),
        );

        publisher.run_once().await.unwrap();
        assert!(store.sent.lock().unwrap().is_empty());
        assert_eq!(store.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unbound_row_past_alert_threshold_increments_missing_binding_counter() {
        let config = Config::default();
        let mut row = sample_row("unknownEventProducer");
        row.attempt_count = config.missing_binding_alert_threshold as i32 + 1;
        let store = Arc::new(FakeStore {
            rows: Mutex::new(vec![row]),
            sent: Mutex::new(vec![]),
        });
        let publisher = OutboxPublisher::new(
            store,
            Arc::new(AlwaysOkBroker),
            Arc::new(FakeClock(Utc::now())),
            config,
        );

        let before = tracing_facade::counter_value(CounterName::MissingBindingAlert);
        publisher.run_once().await.unwrap();

        assert_eq!(
            tracing_facade::counter_value(CounterName::MissingBindingAlert),
            before + 1
        );
    }
}
