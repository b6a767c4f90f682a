//! Broker abstraction. The core never depends on `rdkafka` directly — each
//! binary supplies an implementation (teacher's `KafkaProducer`/
//! `EventConsumer`, generalized) so the publisher/dispatcher stay testable
//! against a fake broker.

use crate::envelope::Envelope;
use async_trait::async_trait;
use std::fmt;

#[derive(Debug)]
pub struct BrokerPublishError(pub String);

impl fmt::Display for BrokerPublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BrokerPublishError {}

/// Publishes an already-built envelope to a named destination and blocks
/// until the broker acknowledges or the implementation's own timeout
/// elapses (`spec.md` §4.3 step e, `publishTimeout`).
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    async fn publish(&self, destination: &str, envelope: &Envelope) -> Result<(), BrokerPublishError>;
}

/// One message as delivered by the broker to a consumer, opaque to the
/// dispatcher apart from its partition/offset bookkeeping metadata and raw
/// payload bytes.
pub struct Delivery {
    pub payload: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
}

/// Receive/ack/nack contract a [`crate::dispatcher::ConsumerDispatcher`]
/// drives. One instance is created per subscribed destination
/// (`spec.md` §4.5, §5).
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    async fn recv(&self) -> Result<Delivery, BrokerPublishError>;
    async fn ack(&self, delivery: &Delivery);
    /// Negatively acknowledge for redelivery (recoverable failure) or as a
    /// poison-message drop depending on `requeue`.
    async fn nack(&self, delivery: &Delivery, requeue: bool);
}
