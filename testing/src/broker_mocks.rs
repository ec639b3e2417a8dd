//! In-memory broker for testing the publish and consume paths.
//!
//! [`InMemoryBroker`] is both a [`MessagePublisher`] and a
//! [`MessageSubscriber`] over one shared queue. Published messages are
//! recorded and become receivable; acked and rejected messages are gone,
//! nacked ones go back to the front of the queue.
//!
//! Faults:
//! - [`InMemoryBroker::fail_next_sends`]: the broker rejects the message
//! - [`InMemoryBroker::lose_next_acks`]: the broker keeps the message but the
//!   delivery report says it failed (the duplicate-on-retry case)
//! - [`InMemoryBroker::stall_sends`]: delivery reports never arrive

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only follows a test panic

use catalog_core::broker::{
    Acknowledge, BrokerError, Delivery, DeliveryCallback, DeliveryReceipt, MessagePublisher,
    MessageSubscriber, OutgoingMessage,
};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Default)]
struct BrokerInner {
    queue: Mutex<VecDeque<OutgoingMessage>>,
    published: Mutex<Vec<OutgoingMessage>>,
    acked: Mutex<Vec<OutgoingMessage>>,
    nacked: AtomicUsize,
    rejected: Mutex<Vec<OutgoingMessage>>,
    stalled: Mutex<Vec<DeliveryCallback>>,
    failing_sends: AtomicUsize,
    losing_acks: AtomicUsize,
    stall: AtomicBool,
    closed: AtomicBool,
    next_offset: AtomicI64,
    notify: Notify,
}

impl BrokerInner {
    fn enqueue(&self, message: OutgoingMessage) {
        self.queue.lock().unwrap().push_back(message);
        self.notify.notify_one();
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Shared in-memory topic.
///
/// Clones share the same queue.
///
/// # Example
///
/// ```
/// use catalog_testing::InMemoryBroker;
/// use catalog_core::broker::{MessagePublisher, MessageSubscriber, OutgoingMessage};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = InMemoryBroker::new();
/// broker.send_async(
///     OutgoingMessage { key: "k".into(), payload: b"hello".to_vec() },
///     Box::new(|_| {}),
/// );
///
/// let delivery = broker.receive().await?;
/// assert_eq!(delivery.payload, b"hello");
/// delivery.ack()?;
/// assert_eq!(broker.acked_count(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    /// Create a new empty broker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message the broker accepted, in send order.
    #[must_use]
    pub fn published(&self) -> Vec<OutgoingMessage> {
        self.inner.published.lock().unwrap().clone()
    }

    /// Number of accepted messages.
    #[must_use]
    pub fn published_count(&self) -> usize {
        self.inner.published.lock().unwrap().len()
    }

    /// Messages acked by the subscriber, in ack order.
    #[must_use]
    pub fn acked(&self) -> Vec<OutgoingMessage> {
        self.inner.acked.lock().unwrap().clone()
    }

    /// Number of acked messages.
    #[must_use]
    pub fn acked_count(&self) -> usize {
        self.inner.acked.lock().unwrap().len()
    }

    /// Number of nacks received.
    #[must_use]
    pub fn nacked_count(&self) -> usize {
        self.inner.nacked.load(Ordering::SeqCst)
    }

    /// Messages skipped as unprocessable, in reject order.
    #[must_use]
    pub fn rejected(&self) -> Vec<OutgoingMessage> {
        self.inner.rejected.lock().unwrap().clone()
    }

    /// Messages waiting to be received.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    /// Put a raw message on the topic, bypassing the publisher side.
    pub fn push(&self, key: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.inner.enqueue(OutgoingMessage {
            key: key.into(),
            payload: payload.into(),
        });
    }

    /// Reject the next `count` sends.
    pub fn fail_next_sends(&self, count: usize) {
        self.inner.failing_sends.store(count, Ordering::SeqCst);
    }

    /// Accept the next `count` sends but report them as failed.
    pub fn lose_next_acks(&self, count: usize) {
        self.inner.losing_acks.store(count, Ordering::SeqCst);
    }

    /// Hold delivery reports instead of invoking them.
    pub fn stall_sends(&self, stall: bool) {
        self.inner.stall.store(stall, Ordering::SeqCst);
    }

    /// Number of delivery reports currently held.
    #[must_use]
    pub fn stalled_count(&self) -> usize {
        self.inner.stalled.lock().unwrap().len()
    }

    /// End the subscription: `receive` returns [`BrokerError::Closed`] once
    /// the queue is drained.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("pending", &self.pending())
            .field("published", &self.published_count())
            .field("acked", &self.acked_count())
            .finish_non_exhaustive()
    }
}

impl MessagePublisher for InMemoryBroker {
    fn send_async(&self, message: OutgoingMessage, on_delivery: DeliveryCallback) {
        let inner = &self.inner;

        if take_one(&inner.failing_sends) {
            on_delivery(Err(BrokerError::SendFailed {
                key: message.key,
                reason: "injected send failure".to_string(),
            }));
            return;
        }

        let offset = inner.next_offset.fetch_add(1, Ordering::SeqCst);
        inner.published.lock().unwrap().push(message.clone());
        let key = message.key.clone();
        inner.enqueue(message);

        if take_one(&inner.losing_acks) {
            on_delivery(Err(BrokerError::SendFailed {
                key,
                reason: "delivery report lost".to_string(),
            }));
            return;
        }

        if inner.stall.load(Ordering::SeqCst) {
            inner.stalled.lock().unwrap().push(on_delivery);
            return;
        }

        on_delivery(Ok(DeliveryReceipt {
            partition: 0,
            offset,
        }));
    }
}

impl MessageSubscriber for InMemoryBroker {
    fn receive(&self) -> Pin<Box<dyn Future<Output = Result<Delivery, BrokerError>> + Send + '_>> {
        Box::pin(async move {
            loop {
                let next = self.inner.queue.lock().unwrap().pop_front();
                if let Some(message) = next {
                    let acker = InMemoryAcker {
                        inner: Arc::clone(&self.inner),
                        message: message.clone(),
                    };
                    return Ok(Delivery::new(
                        Some(message.key),
                        message.payload,
                        Box::new(acker),
                    ));
                }
                if self.inner.closed.load(Ordering::SeqCst) {
                    return Err(BrokerError::Closed);
                }
                self.inner.notify.notified().await;
            }
        })
    }
}

struct InMemoryAcker {
    inner: Arc<BrokerInner>,
    message: OutgoingMessage,
}

impl Acknowledge for InMemoryAcker {
    fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        self.inner.acked.lock().unwrap().push(self.message);
        Ok(())
    }

    fn nack(self: Box<Self>) -> Result<(), BrokerError> {
        self.inner.nacked.fetch_add(1, Ordering::SeqCst);
        self.inner.queue.lock().unwrap().push_front(self.message);
        self.inner.notify.notify_one();
        Ok(())
    }

    fn reject(self: Box<Self>) -> Result<(), BrokerError> {
        self.inner.rejected.lock().unwrap().push(self.message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn message(key: &str) -> OutgoingMessage {
        OutgoingMessage {
            key: key.to_string(),
            payload: key.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn nacked_message_is_redelivered_first() {
        let broker = InMemoryBroker::new();
        broker.push("a", "a");
        broker.push("b", "b");

        broker.receive().await.unwrap().nack().unwrap();
        let again = broker.receive().await.unwrap();

        assert_eq!(again.key.as_deref(), Some("a"));
        assert_eq!(broker.nacked_count(), 1);
    }

    #[tokio::test]
    async fn rejected_message_is_dropped() {
        let broker = InMemoryBroker::new();
        broker.push("a", "a");
        broker.push("b", "b");

        broker.receive().await.unwrap().reject().unwrap();
        let next = broker.receive().await.unwrap();

        assert_eq!(next.key.as_deref(), Some("b"));
        assert_eq!(broker.rejected(), vec![message("a")]);
        assert_eq!(broker.acked_count(), 0);
    }

    #[tokio::test]
    async fn lost_ack_still_delivers() {
        let broker = InMemoryBroker::new();
        broker.lose_next_acks(1);
        let outcome: Arc<Mutex<Option<Result<DeliveryReceipt, BrokerError>>>> = Arc::default();
        let slot = Arc::clone(&outcome);

        broker.send_async(
            message("k"),
            Box::new(move |result| *slot.lock().unwrap() = Some(result)),
        );

        assert!(matches!(
            outcome.lock().unwrap().take(),
            Some(Err(BrokerError::SendFailed { .. }))
        ));
        assert_eq!(broker.pending(), 1);
    }

    #[tokio::test]
    async fn receive_waits_for_a_publish() {
        let broker = InMemoryBroker::new();
        let consumer = broker.clone();
        let handle = tokio::spawn(async move { consumer.receive().await.map(|d| d.payload) });

        tokio::time::sleep(Duration::from_millis(10)).await;
        broker.send_async(message("late"), Box::new(|_| {}));

        assert_eq!(handle.await.unwrap().unwrap(), b"late");
    }

    #[tokio::test]
    async fn closed_and_drained_broker_ends_receive() {
        let broker = InMemoryBroker::new();
        broker.close();
        assert_eq!(broker.receive().await.unwrap_err(), BrokerError::Closed);
    }
}
