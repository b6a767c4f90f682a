use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use wallet_saga_core::{BrokerConsumer, BrokerPublishError, Delivery};

/// `BrokerConsumer` over `rdkafka`'s `StreamConsumer`, bound to a single
/// destination topic — one instance per subscribed destination, as
/// `ConsumerDispatcher` expects (`spec.md` §4.5, §5).
///
/// Auto-commit is off: the dispatcher decides ack/nack per envelope, and
/// this consumer commits (or withholds) the offset accordingly rather than
/// committing on a fixed timer the way the teacher's single-topic
/// `EventConsumer` did.
pub struct RdKafkaBrokerConsumer {
    consumer: StreamConsumer,
    topic: String,
}

impl RdKafkaBrokerConsumer {
    pub fn new(brokers: &str, group_id: &str, topic: &str) -> anyhow::Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", "30000")
            .set("enable.partition.eof", "false")
            .create()?;

        consumer.subscribe(&[topic])?;

        Ok(Self {
            consumer,
            topic: topic.to_string(),
        })
    }

    fn commit_at(&self, partition: i32, offset: i64) {
        let mut tpl = TopicPartitionList::new();
        if let Err(e) = tpl.add_partition_offset(&self.topic, partition, Offset::Offset(offset + 1))
        {
            tracing::warn!(topic = %self.topic, error = %e, "failed to build commit offset list");
            return;
        }
        if let Err(e) = self
            .consumer
            .commit(&tpl, rdkafka::consumer::CommitMode::Async)
        {
            tracing::warn!(topic = %self.topic, partition, offset, error = %e, "failed to commit offset");
        }
    }
}

#[async_trait]
impl BrokerConsumer for RdKafkaBrokerConsumer {
    async fn recv(&self) -> Result<Delivery, BrokerPublishError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| BrokerPublishError(e.to_string()))?;

        let payload = message
            .payload()
            .ok_or_else(|| BrokerPublishError("message had no payload".to_string()))?
            .to_vec();

        Ok(Delivery {
            payload,
            partition: message.partition(),
            offset: message.offset(),
        })
    }

    async fn ack(&self, delivery: &Delivery) {
        self.commit_at(delivery.partition, delivery.offset);
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) {
        if requeue {
            // Leave the offset uncommitted; the broker redelivers this
            // message (and everything after it on this partition) on the
            // next rebalance or restart.
            return;
        }
        // Poison message: commit past it so it is never redelivered.
        self.commit_at(delivery.partition, delivery.offset);
    }
}
