//! Publishes one outbox event and removes it once the broker has it.
//!
//! # Protocol
//!
//! 1. Decode the stored snapshot and re-encode it, so a corrupt row never
//!    reaches the broker
//! 2. Hand the payload to the broker under `event_type:entity_id`
//! 3. Wait for the delivery report on a single-slot channel, racing it
//!    against shutdown and the publish deadline
//! 4. On acknowledgment, delete the row by its stored `(bucket, id)`
//!
//! Any failure before step 4 leaves the row in place for the next poll
//! (at-least-once). A failure in step 4 means the event was delivered but
//! will be delivered again; consumers are idempotent.

use crate::metrics::OutboxMetrics;
use crate::shutdown::Shutdown;
use catalog_core::broker::{BrokerError, DeliveryReceipt, MessagePublisher, OutgoingMessage};
use catalog_core::event::{self, EventError};
use catalog_core::outbox::OutboxEvent;
use catalog_core::store::{OutboxStore, StoreError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;

/// Default time to wait for a delivery report.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Why an outbox event was not published and removed.
#[derive(Error, Debug)]
pub enum PublishError {
    /// The stored payload is not a valid snapshot.
    #[error("Outbox event {event_id} has a malformed payload: {source}")]
    Decode {
        /// Outbox row id
        event_id: u64,
        /// Decode failure
        #[source]
        source: EventError,
    },

    /// The broker rejected the message or the delivery report was lost.
    #[error("Failed to publish outbox event {event_id}: {source}")]
    Send {
        /// Outbox row id
        event_id: u64,
        /// Broker failure
        #[source]
        source: BrokerError,
    },

    /// Shutdown or the publish deadline came before the delivery report.
    #[error("Publishing outbox event {event_id} cancelled: {reason}")]
    Cancelled {
        /// Outbox row id
        event_id: u64,
        /// What cut the wait short
        reason: &'static str,
    },

    /// Delivered, but the outbox row could not be deleted.
    #[error("Outbox event {event_id} in bucket {bucket} was published but not deleted: {source}")]
    Delete {
        /// Outbox row id
        event_id: u64,
        /// Stored bucket of the row
        bucket: String,
        /// Storage failure
        #[source]
        source: StoreError,
    },
}

/// Sends outbox events to the broker and deletes them on acknowledgment.
///
/// # Example
///
/// ```ignore
/// let publisher = OutboxPublisher::new(broker, outbox)
///     .with_timeout(Duration::from_secs(5));
///
/// publisher.publish(&event, &shutdown).await?;
/// ```
#[derive(Clone)]
pub struct OutboxPublisher {
    broker: Arc<dyn MessagePublisher>,
    outbox: Arc<dyn OutboxStore>,
    timeout: Duration,
}

impl OutboxPublisher {
    /// Create a publisher with the default deadline.
    #[must_use]
    pub fn new(broker: Arc<dyn MessagePublisher>, outbox: Arc<dyn OutboxStore>) -> Self {
        Self {
            broker,
            outbox,
            timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    /// Set how long to wait for a delivery report.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Publish `event` and delete it from the outbox once acknowledged.
    ///
    /// # Errors
    ///
    /// See [`PublishError`]. In every case except [`PublishError::Delete`]
    /// the row is left untouched.
    pub async fn publish(
        &self,
        event: &OutboxEvent,
        shutdown: &Shutdown,
    ) -> Result<DeliveryReceipt, PublishError> {
        let event_id = event.id;
        let decode = |source| PublishError::Decode { event_id, source };

        let product = event::decode_product(event.payload.as_bytes()).map_err(decode)?;
        let payload = event::encode_product(&product).map_err(decode)?;
        let key = event::partition_key(&event.event_type, product.id);

        let started = Instant::now();
        let (tx, rx) = oneshot::channel();
        self.broker.send_async(
            OutgoingMessage {
                key: key.clone(),
                payload: payload.into_bytes(),
            },
            Box::new(move |result| {
                // The receiver is gone only if the wait was already abandoned.
                let _ = tx.send(result);
            }),
        );

        let mut shutdown = shutdown.clone();
        let receipt = tokio::select! {
            biased;

            report = tokio::time::timeout(self.timeout, rx) => match report {
                Ok(Ok(Ok(receipt))) => receipt,
                Ok(Ok(Err(source))) => return Err(PublishError::Send { event_id, source }),
                Ok(Err(_)) => {
                    return Err(PublishError::Send {
                        event_id,
                        source: BrokerError::Closed,
                    });
                }
                Err(_) => {
                    return Err(PublishError::Cancelled {
                        event_id,
                        reason: "publish deadline elapsed",
                    });
                }
            },
            () = shutdown.triggered() => {
                return Err(PublishError::Cancelled {
                    event_id,
                    reason: "shutdown requested",
                });
            }
        };

        self.outbox
            .delete_event(&event.bucket, event_id)
            .await
            .map_err(|source| PublishError::Delete {
                event_id,
                bucket: event.bucket.clone(),
                source,
            })?;

        OutboxMetrics::record_published(started.elapsed());
        tracing::debug!(
            event_id,
            bucket = %event.bucket,
            key = %key,
            partition = receipt.partition,
            offset = receipt.offset,
            "Outbox event published"
        );
        Ok(receipt)
    }
}

impl std::fmt::Debug for OutboxPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxPublisher")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::shutdown;
    use catalog_testing::fixtures::product;
    use catalog_testing::{InMemoryBroker, InMemoryCatalogStore};

    fn setup() -> (InMemoryBroker, InMemoryCatalogStore, OutboxPublisher, OutboxEvent) {
        let broker = InMemoryBroker::new();
        let store = InMemoryCatalogStore::new();
        let publisher = OutboxPublisher::new(Arc::new(broker.clone()), Arc::new(store.clone()))
            .with_timeout(Duration::from_millis(100));
        let product = product(4, 42);
        let event = OutboxEvent::product_created(7, &product, product.created_at).unwrap();
        store.seed_outbox(event.clone());
        (broker, store, publisher, event)
    }

    #[tokio::test]
    async fn ack_deletes_the_row_and_keys_by_entity() {
        let (broker, store, publisher, event) = setup();
        let (_trigger, shutdown) = shutdown::channel();

        publisher.publish(&event, &shutdown).await.unwrap();

        assert_eq!(store.outbox_len(), 0);
        let sent = broker.published();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].key, "create_product_event:42");
        assert_eq!(
            event::decode_product(&sent[0].payload).unwrap(),
            event::decode_product(event.payload.as_bytes()).unwrap()
        );
    }

    #[tokio::test]
    async fn send_failure_keeps_the_row() {
        let (broker, store, publisher, event) = setup();
        let (_trigger, shutdown) = shutdown::channel();
        broker.fail_next_sends(1);

        let err = publisher.publish(&event, &shutdown).await.unwrap_err();

        assert!(matches!(err, PublishError::Send { event_id: 7, .. }));
        assert_eq!(store.outbox_len(), 1);
    }

    #[tokio::test]
    async fn malformed_payload_never_reaches_the_broker() {
        let (broker, store, publisher, mut event) = setup();
        let (_trigger, shutdown) = shutdown::channel();
        event.payload = "{".to_string();
        store.seed_outbox(event.clone());

        let err = publisher.publish(&event, &shutdown).await.unwrap_err();

        assert!(matches!(err, PublishError::Decode { .. }));
        assert_eq!(broker.published_count(), 0);
        assert_eq!(store.outbox_len(), 1);
    }

    #[tokio::test]
    async fn missing_delivery_report_times_out_and_keeps_the_row() {
        let (broker, store, publisher, event) = setup();
        let (_trigger, shutdown) = shutdown::channel();
        broker.stall_sends(true);

        let err = publisher.publish(&event, &shutdown).await.unwrap_err();

        assert!(matches!(err, PublishError::Cancelled { .. }));
        assert_eq!(store.outbox_len(), 1);
    }

    #[tokio::test]
    async fn shutdown_cancels_the_wait() {
        let (broker, store, publisher, event) = setup();
        let publisher = publisher.with_timeout(Duration::from_secs(60));
        let (trigger, shutdown) = shutdown::channel();
        broker.stall_sends(true);
        trigger.trigger();

        let err = publisher.publish(&event, &shutdown).await.unwrap_err();

        assert!(matches!(
            err,
            PublishError::Cancelled {
                reason: "shutdown requested",
                ..
            }
        ));
        assert_eq!(store.outbox_len(), 1);
    }

    #[tokio::test]
    async fn delete_failure_is_reported_after_delivery() {
        let (broker, store, publisher, event) = setup();
        let (_trigger, shutdown) = shutdown::channel();
        store.fail_deletes(true);

        let err = publisher.publish(&event, &shutdown).await.unwrap_err();

        assert!(matches!(err, PublishError::Delete { .. }));
        assert_eq!(broker.published_count(), 1);
        assert_eq!(store.outbox_len(), 1);
    }
}
