//! Message broker abstraction for the product event topic.
//!
//! The outbox publisher only needs "send this keyed payload and tell me when
//! the broker has it", and the inventory consumer only needs "give me the next
//! message; I'll ack or nack it". Both sides are expressed as traits so the
//! runtime can be driven by Redpanda in production and by an in-memory broker
//! in tests.
//!
//! # Delivery Semantics
//!
//! - At-least-once: a message is redelivered until it is acked
//! - Per-key ordering: messages with the same key arrive in send order
//! - A nacked message becomes eligible for redelivery
//! - A rejected message is settled without being applied and never comes back
//!
//! # Sending
//!
//! [`MessagePublisher::send_async`] is callback based, matching how producer
//! clients report delivery. The callback runs exactly once, on whichever task
//! the client uses for delivery reports. Callers that need to wait for the
//! outcome bridge it onto a channel.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during broker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Failed to connect to the broker.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker rejected or failed to persist a message.
    #[error("Failed to send message with key '{key}': {reason}")]
    SendFailed {
        /// Partition key of the message
        key: String,
        /// Failure reason
        reason: String,
    },

    /// Failed to receive the next message.
    #[error("Failed to receive message: {0}")]
    ReceiveFailed(String),

    /// Failed to ack or nack a message.
    #[error("Failed to settle message: {0}")]
    AckFailed(String),

    /// The broker connection or delivery channel is closed.
    #[error("Broker closed")]
    Closed,
}

/// A keyed message bound for the product topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Partition key
    pub key: String,
    /// Message body
    pub payload: Vec<u8>,
}

/// Where the broker stored a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Partition the message landed on
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
}

/// Completion callback for [`MessagePublisher::send_async`].
pub type DeliveryCallback = Box<dyn FnOnce(Result<DeliveryReceipt, BrokerError>) + Send>;

/// Producer side of the broker.
pub trait MessagePublisher: Send + Sync {
    /// Hand a message to the broker client.
    ///
    /// Returns immediately. `on_delivery` is invoked exactly once with the
    /// outcome, possibly on another task.
    fn send_async(&self, message: OutgoingMessage, on_delivery: DeliveryCallback);
}

/// Settles a received message with the broker.
///
/// Implemented per backend; consumed through [`Delivery::ack`],
/// [`Delivery::nack`] and [`Delivery::reject`].
pub trait Acknowledge: Send {
    /// Mark the message processed; it will not be redelivered.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AckFailed`] if the broker cannot record it.
    fn ack(self: Box<Self>) -> Result<(), BrokerError>;

    /// Return the message for redelivery.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AckFailed`] if the broker cannot record it.
    fn nack(self: Box<Self>) -> Result<(), BrokerError>;

    /// Skip a message that can never be processed.
    ///
    /// The message is settled like an ack so later messages on its partition
    /// are not held behind it.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AckFailed`] if the broker cannot record it.
    fn reject(self: Box<Self>) -> Result<(), BrokerError>;
}

/// A message received from the product topic.
///
/// Must be settled exactly once: `ack`, `nack` and `reject` consume it.
pub struct Delivery {
    /// Partition key, when the producer set one
    pub key: Option<String>,
    /// Message body
    pub payload: Vec<u8>,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    /// Wrap a received message with its backend acker.
    #[must_use]
    pub fn new(key: Option<String>, payload: Vec<u8>, acker: Box<dyn Acknowledge>) -> Self {
        Self {
            key,
            payload,
            acker,
        }
    }

    /// Acknowledge the message.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] if the broker cannot record the ack.
    pub fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack()
    }

    /// Negatively acknowledge the message so it is redelivered.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] if the broker cannot record the nack.
    pub fn nack(self) -> Result<(), BrokerError> {
        self.acker.nack()
    }

    /// Drop a malformed message without redelivery.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] if the broker cannot record the skip.
    pub fn reject(self) -> Result<(), BrokerError> {
        self.acker.reject()
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("key", &self.key)
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

/// Consumer side of the broker.
pub trait MessageSubscriber: Send + Sync {
    /// Wait for the next message.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ReceiveFailed`] on a transient failure, or
    /// [`BrokerError::Closed`] once the subscription has ended.
    fn receive(&self) -> Pin<Box<dyn Future<Output = Result<Delivery, BrokerError>> + Send + '_>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU8, Ordering};

    /// 1 = acked, 2 = nacked, 3 = rejected
    struct Recorder(Arc<AtomicU8>);

    impl Acknowledge for Recorder {
        fn ack(self: Box<Self>) -> Result<(), BrokerError> {
            self.0.store(1, Ordering::SeqCst);
            Ok(())
        }

        fn nack(self: Box<Self>) -> Result<(), BrokerError> {
            self.0.store(2, Ordering::SeqCst);
            Ok(())
        }

        fn reject(self: Box<Self>) -> Result<(), BrokerError> {
            self.0.store(3, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn delivery_routes_settlement_to_its_acker() {
        let state = Arc::new(AtomicU8::new(0));
        let delivery = Delivery::new(None, b"a".to_vec(), Box::new(Recorder(state.clone())));
        delivery.ack().unwrap();
        assert_eq!(state.load(Ordering::SeqCst), 1);

        let delivery = Delivery::new(None, b"b".to_vec(), Box::new(Recorder(state.clone())));
        delivery.nack().unwrap();
        assert_eq!(state.load(Ordering::SeqCst), 2);

        let delivery = Delivery::new(None, b"c".to_vec(), Box::new(Recorder(state.clone())));
        delivery.reject().unwrap();
        assert_eq!(state.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn debug_hides_payload_bytes() {
        let state = Arc::new(AtomicU8::new(0));
        let delivery = Delivery::new(
            Some("k".to_string()),
            vec![0; 12],
            Box::new(Recorder(state)),
        );
        let text = format!("{delivery:?}");
        assert!(text.contains("payload_len: 12"));
    }
}
