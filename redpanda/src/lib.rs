//! Redpanda broker adapter for the product event topic.
//!
//! Implements [`MessagePublisher`] and [`MessageSubscriber`] from
//! `catalog-core` over rdkafka, so it works against Redpanda, Apache Kafka or
//! any other Kafka-compatible broker.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐  send_async   ┌───────────────────┐
//! │ Outbox poller │ ────────────► │ RedpandaPublisher │
//! └───────────────┘               └─────────┬─────────┘
//!                                           ▼
//!                                  ┌─────────────────┐
//!                                  │  product topic  │
//!                                  └────────┬────────┘
//!                                           ▼
//! ┌───────────────┐   receive     ┌────────────────────┐
//! │ Inventory     │ ◄──────────── │ RedpandaSubscriber │
//! │ consumer      │ ack/nack/rej. └────────────────────┘
//! └───────────────┘
//! ```
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - Auto-commit is disabled; an ack commits the offset after the message
//! - A nack seeks the partition back to the message, so it is fetched again
//! - A reject commits past a message that can never be processed, so it is
//!   not fetched again and later messages are not held behind it
//! - If the process crashes before the commit, the message is redelivered
//! - Ordering is guaranteed within a partition, and messages are keyed by
//!   `event_type:product_id`, so events for one product stay in order
//!
//! # Example
//!
//! ```no_run
//! use catalog_redpanda::{RedpandaPublisher, RedpandaSubscriber};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let publisher = RedpandaPublisher::builder()
//!     .brokers("localhost:9092")
//!     .topic("product-events")
//!     .producer_acks("all")
//!     .build()?;
//!
//! let subscriber = RedpandaSubscriber::builder()
//!     .brokers("localhost:9092")
//!     .topic("product-events")
//!     .consumer_group("inventory-projection")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use catalog_core::broker::{
    Acknowledge, BrokerError, Delivery, DeliveryCallback, DeliveryReceipt, MessagePublisher,
    MessageSubscriber, OutgoingMessage,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Default producer delivery timeout.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for a nack's seek back to the rejected message.
const SEEK_TIMEOUT: Duration = Duration::from_secs(1);

/// Kafka producer for the product topic.
///
/// [`send_async`](MessagePublisher::send_async) hands the record to a spawned
/// task that awaits rdkafka's delivery future and then runs the callback, so
/// it must be called from inside a Tokio runtime.
#[derive(Clone)]
pub struct RedpandaPublisher {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl RedpandaPublisher {
    /// Create a new builder for configuring the publisher.
    #[must_use]
    pub fn builder() -> RedpandaPublisherBuilder {
        RedpandaPublisherBuilder::default()
    }

    /// The topic messages are sent to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl std::fmt::Debug for RedpandaPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaPublisher")
            .field("topic", &self.topic)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for a [`RedpandaPublisher`].
#[derive(Default)]
pub struct RedpandaPublisherBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
}

impl RedpandaPublisherBuilder {
    /// Set the broker addresses (comma-separated, e.g. `"localhost:9092"`).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the destination topic.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set how long the producer may take to deliver a message.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the [`RedpandaPublisher`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if brokers or topic are not
    /// set, or if the producer cannot be created.
    pub fn build(self) -> Result<RedpandaPublisher, BrokerError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BrokerError::ConnectionFailed("Brokers not configured".to_string()))?;
        let topic = self
            .topic
            .ok_or_else(|| BrokerError::ConnectionFailed("Topic not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(DEFAULT_SEND_TIMEOUT);
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| BrokerError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            acks,
            compression,
            timeout_ms = timeout.as_millis(),
            "RedpandaPublisher created"
        );

        Ok(RedpandaPublisher {
            producer,
            topic,
            timeout,
        })
    }
}

impl MessagePublisher for RedpandaPublisher {
    fn send_async(&self, message: OutgoingMessage, on_delivery: DeliveryCallback) {
        let producer = self.producer.clone();
        let topic = self.topic.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            let record = FutureRecord::to(&topic)
                .key(&message.key)
                .payload(&message.payload);

            let outcome = match producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        key = %message.key,
                        partition,
                        offset,
                        "Message delivered"
                    );
                    Ok(DeliveryReceipt { partition, offset })
                }
                Err((kafka_error, _)) => {
                    tracing::warn!(
                        topic = %topic,
                        key = %message.key,
                        error = %kafka_error,
                        "Message delivery failed"
                    );
                    Err(BrokerError::SendFailed {
                        key: message.key.clone(),
                        reason: kafka_error.to_string(),
                    })
                }
            };

            on_delivery(outcome);
        });
    }
}

/// Kafka consumer for the product topic with manual offset commits.
///
/// Clones share the underlying consumer.
#[derive(Clone)]
pub struct RedpandaSubscriber {
    consumer: Arc<StreamConsumer>,
    topic: String,
    group: String,
}

impl RedpandaSubscriber {
    /// Create a new builder for configuring the subscriber.
    #[must_use]
    pub fn builder() -> RedpandaSubscriberBuilder {
        RedpandaSubscriberBuilder::default()
    }

    /// The consumer group this subscriber belongs to.
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.group
    }
}

impl std::fmt::Debug for RedpandaSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaSubscriber")
            .field("topic", &self.topic)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

/// Builder for a [`RedpandaSubscriber`].
#[derive(Default)]
pub struct RedpandaSubscriberBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
}

impl RedpandaSubscriberBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the topic to consume.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the consumer group ID.
    ///
    /// If not set, the group is derived from the topic name.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set where a new consumer group starts reading: `"earliest"` or `"latest"`.
    ///
    /// Default: `"earliest"`, so a fresh read model sees every product.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaSubscriber`] and subscribe to the topic.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if brokers or topic are not
    /// set, or if the consumer cannot be created or subscribed.
    pub fn build(self) -> Result<RedpandaSubscriber, BrokerError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BrokerError::ConnectionFailed("Brokers not configured".to_string()))?;
        let topic = self
            .topic
            .ok_or_else(|| BrokerError::ConnectionFailed("Topic not configured".to_string()))?;
        let group = self
            .consumer_group
            .unwrap_or_else(|| format!("catalog-{topic}"));
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("group.id", &group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| BrokerError::ConnectionFailed(format!("Failed to create consumer: {e}")))?;

        consumer.subscribe(&[topic.as_str()]).map_err(|e| {
            BrokerError::ConnectionFailed(format!("Failed to subscribe to {topic}: {e}"))
        })?;

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            consumer_group = %group,
            auto_offset_reset = %auto_offset_reset,
            manual_commit = true,
            "RedpandaSubscriber subscribed"
        );

        Ok(RedpandaSubscriber {
            consumer: Arc::new(consumer),
            topic,
            group,
        })
    }
}

impl MessageSubscriber for RedpandaSubscriber {
    fn receive(&self) -> Pin<Box<dyn Future<Output = Result<Delivery, BrokerError>> + Send + '_>> {
        Box::pin(async move {
            let message = self.consumer.recv().await.map_err(receive_error)?;

            let key = message.key().map(key_from_bytes);
            let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
            let position = Position {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
            };

            tracing::trace!(
                topic = %position.topic,
                partition = position.partition,
                offset = position.offset,
                "Received message"
            );

            let acker = KafkaAcker {
                consumer: Arc::clone(&self.consumer),
                position,
            };
            Ok(Delivery::new(key, payload, Box::new(acker)))
        })
    }
}

#[allow(clippy::needless_pass_by_value)]
fn receive_error(e: KafkaError) -> BrokerError {
    match e {
        KafkaError::Canceled => BrokerError::Closed,
        other => BrokerError::ReceiveFailed(other.to_string()),
    }
}

fn key_from_bytes(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Position {
    topic: String,
    partition: i32,
    offset: i64,
}

impl Position {
    /// The offset to commit once this message is processed.
    fn commit_list(&self) -> Result<TopicPartitionList, KafkaError> {
        let mut list = TopicPartitionList::new();
        list.add_partition_offset(&self.topic, self.partition, Offset::Offset(self.offset + 1))?;
        Ok(list)
    }
}

struct KafkaAcker {
    consumer: Arc<StreamConsumer>,
    position: Position,
}

impl KafkaAcker {
    /// Commit past this message so the group never reads it again.
    fn commit(&self) -> Result<(), BrokerError> {
        let list = self
            .position
            .commit_list()
            .map_err(|e| BrokerError::AckFailed(e.to_string()))?;
        self.consumer
            .commit(&list, CommitMode::Async)
            .map_err(|e| {
                tracing::warn!(
                    topic = %self.position.topic,
                    partition = self.position.partition,
                    offset = self.position.offset,
                    error = %e,
                    "Failed to commit offset (message may be redelivered)"
                );
                BrokerError::AckFailed(e.to_string())
            })
    }
}

impl Acknowledge for KafkaAcker {
    fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        self.commit()
    }

    fn reject(self: Box<Self>) -> Result<(), BrokerError> {
        // Commit to avoid reprocessing a message that can never be applied
        self.commit()?;
        tracing::warn!(
            topic = %self.position.topic,
            partition = self.position.partition,
            offset = self.position.offset,
            "Skipped unprocessable message"
        );
        Ok(())
    }

    fn nack(self: Box<Self>) -> Result<(), BrokerError> {
        self.consumer
            .seek(
                &self.position.topic,
                self.position.partition,
                Offset::Offset(self.position.offset),
                Timeout::After(SEEK_TIMEOUT),
            )
            .map_err(|e| BrokerError::AckFailed(format!("Failed to seek back: {e}")))?;
        tracing::debug!(
            topic = %self.position.topic,
            partition = self.position.partition,
            offset = self.position.offset,
            "Message returned for redelivery"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn adapters_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}

        assert_send_sync::<RedpandaPublisher>();
        assert_send_sync::<RedpandaSubscriber>();
    }

    #[test]
    fn publisher_requires_brokers_and_topic() {
        let err = RedpandaPublisher::builder().topic("t").build().unwrap_err();
        assert_eq!(
            err,
            BrokerError::ConnectionFailed("Brokers not configured".to_string())
        );

        let err = RedpandaPublisher::builder()
            .brokers("localhost:9092")
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            BrokerError::ConnectionFailed("Topic not configured".to_string())
        );
    }

    #[test]
    fn subscriber_requires_a_topic() {
        let err = RedpandaSubscriber::builder()
            .brokers("localhost:9092")
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            BrokerError::ConnectionFailed("Topic not configured".to_string())
        );
    }

    #[test]
    fn ack_commits_the_next_offset() {
        let position = Position {
            topic: "product-events".to_string(),
            partition: 2,
            offset: 41,
        };

        let list = position.commit_list().unwrap();
        let entry = list.find_partition("product-events", 2).unwrap();

        assert_eq!(entry.offset(), Offset::Offset(42));
    }

    #[test]
    fn cancelled_consumer_reads_as_closed() {
        assert_eq!(receive_error(KafkaError::Canceled), BrokerError::Closed);
    }

    #[test]
    fn keys_are_decoded_lossily() {
        assert_eq!(key_from_bytes(b"create_product_event:7"), "create_product_event:7");
        assert_eq!(key_from_bytes(&[0xff]), "\u{fffd}");
    }
}
