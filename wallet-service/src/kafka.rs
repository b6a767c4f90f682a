use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;
use wallet_saga_core::{BrokerPublishError, BrokerPublisher, Envelope};

/// `BrokerPublisher` over `rdkafka`'s `FutureProducer`, keyed by
/// `envelope.id` so redeliveries of the same event land on the same
/// partition.
///
/// Configuration explained:
/// - bootstrap.servers: Where to find Kafka
/// - acks=all: Wait for all replicas to acknowledge (durability)
/// - enable.idempotence=true: Exactly-once semantics within producer
/// - max.in.flight.requests.per.connection=5: Pipelining for performance
pub struct RdKafkaBrokerPublisher {
    producer: FutureProducer,
    publish_timeout: Duration,
}

impl RdKafkaBrokerPublisher {
    pub fn new(brokers: &str, publish_timeout: Duration) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("compression.type", "snappy")
            .set("batch.size", "16384")
            .set("linger.ms", "10")
            .create()?;

        Ok(Self {
            producer,
            publish_timeout,
        })
    }
}

#[async_trait]
impl BrokerPublisher for RdKafkaBrokerPublisher {
    async fn publish(&self, destination: &str, envelope: &Envelope) -> Result<(), BrokerPublishError> {
        let key = envelope.id.to_string();
        let payload = serde_json::to_vec(envelope)
            .map_err(|e| BrokerPublishError(format!("failed to serialize envelope: {e}")))?;

        let record = FutureRecord::to(destination).key(&key).payload(&payload);

        self.producer
            .send(record, self.publish_timeout)
            .await
            .map(|_| ())
            .map_err(|(e, _)| BrokerPublishError(e.to_string()))
    }
}
