//! Broker consumer that feeds product events into a read model.
//!
//! Every message goes through one cycle:
//!
//! ```text
//! receive ──► handle ──┬─ Ok ───────────► ack
//!                      ├─ Decode error ─► reject (poison, skipped for good)
//!                      └─ Apply error ──► nack (redelivered)
//! ```
//!
//! The handler runs before the ack, so a crash in between replays the
//! message; handlers are idempotent. Shutdown is only observed between
//! cycles or while waiting for the next message, never mid-cycle.

use crate::metrics::ConsumerMetrics;
use crate::shutdown::Shutdown;
use catalog_core::broker::{BrokerError, Delivery, MessageSubscriber};
use catalog_core::handler::{EventHandler, HandleError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default pause after a failed receive or a nacked message.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How a message was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Applied and acknowledged
    Acked,
    /// Failed to apply and returned to the broker
    Nacked,
    /// Malformed; skipped without being applied
    Rejected,
}

/// Receive/apply/acknowledge loop.
///
/// # Example
///
/// ```ignore
/// let consumer = EventConsumer::new(subscriber, Arc::new(InventoryProjection::new(store)));
/// let handle = consumer.spawn(shutdown.clone());
/// ```
pub struct EventConsumer {
    subscriber: Arc<dyn MessageSubscriber>,
    handler: Arc<dyn EventHandler>,
    retry_delay: Duration,
}

impl EventConsumer {
    /// Create a consumer for `subscriber` that applies messages with `handler`.
    #[must_use]
    pub fn new(subscriber: Arc<dyn MessageSubscriber>, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            subscriber,
            handler,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Set the pause after a failed receive or a nacked message.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Apply one message and settle it.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] if the ack or nack cannot be recorded. The
    /// broker will redeliver the message in that case.
    pub async fn process(&self, delivery: Delivery) -> Result<Disposition, BrokerError> {
        let key = delivery.key.clone().unwrap_or_default();

        match self.handler.handle(&delivery.payload).await {
            Ok(()) => {
                delivery.ack()?;
                ConsumerMetrics::record_applied();
                tracing::debug!(key = %key, "Event applied");
                Ok(Disposition::Acked)
            }
            Err(HandleError::Decode(e)) => {
                delivery.reject()?;
                ConsumerMetrics::record_rejected();
                tracing::warn!(key = %key, error = %e, "Poison message skipped");
                Ok(Disposition::Rejected)
            }
            Err(e @ HandleError::Apply(_)) => {
                delivery.nack()?;
                ConsumerMetrics::record_nacked();
                tracing::error!(key = %key, error = %e, "Failed to apply event, returned for redelivery");
                Ok(Disposition::Nacked)
            }
        }
    }

    /// Spawn the consume loop as a background task.
    #[must_use]
    pub fn spawn(self, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Consume until shutdown is requested or the subscription closes.
    pub async fn run(self, mut shutdown: Shutdown) {
        tracing::info!("Event consumer started");

        while !shutdown.is_triggered() {
            let received = tokio::select! {
                () = shutdown.triggered() => break,
                received = self.subscriber.receive() => received,
            };

            match received {
                Ok(delivery) => match self.process(delivery).await {
                    Ok(Disposition::Acked | Disposition::Rejected) => {}
                    Ok(Disposition::Nacked) => {
                        // A nacked message comes straight back; don't spin on it.
                        tokio::select! {
                            () = shutdown.triggered() => break,
                            () = tokio::time::sleep(self.retry_delay) => {}
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to settle message");
                    }
                },
                Err(BrokerError::Closed) => {
                    tracing::info!("Subscription closed");
                    break;
                }
                Err(e) => {
                    ConsumerMetrics::record_receive_error();
                    tracing::warn!(error = %e, "Receive failed, retrying");
                    tokio::select! {
                        () = shutdown.triggered() => break,
                        () = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }

        tracing::info!("Event consumer stopped");
    }
}

impl std::fmt::Debug for EventConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventConsumer")
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}
