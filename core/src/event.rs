//! Domain event payloads carried through the outbox and the broker.
//!
//! Payloads are JSON snapshots of the full entity at write time, not deltas.
//! The outbox stores the JSON text; the publisher re-validates it by decoding
//! and re-encoding before handing it to the broker, and the consumer decodes
//! the same shape on the other side.

use crate::model::Product;
use thiserror::Error;

/// Event type tag written next to product-creation snapshots.
pub const CREATE_PRODUCT_EVENT: &str = "create_product_event";

/// Error types for event payload operations.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize a snapshot.
    #[error("Failed to serialize event payload: {0}")]
    SerializationError(String),

    /// Failed to deserialize a snapshot.
    #[error("Failed to deserialize event payload: {0}")]
    DeserializationError(String),
}

/// Serialize a product snapshot into an outbox payload.
///
/// # Errors
///
/// Returns [`EventError::SerializationError`] if the product cannot be encoded.
pub fn encode_product(product: &Product) -> Result<String, EventError> {
    serde_json::to_string(product).map_err(|e| EventError::SerializationError(e.to_string()))
}

/// Deserialize a product snapshot from payload bytes.
///
/// # Errors
///
/// Returns [`EventError::DeserializationError`] if the bytes are not a valid
/// product snapshot.
pub fn decode_product(payload: &[u8]) -> Result<Product, EventError> {
    serde_json::from_slice(payload).map_err(|e| EventError::DeserializationError(e.to_string()))
}

/// Broker partition key for an event: `event_type:entity_id`.
///
/// All events about one entity land on the same partition, which keeps them
/// ordered relative to each other.
#[must_use]
pub fn partition_key(event_type: &str, entity_id: u64) -> String {
    format!("{event_type}:{entity_id}")
}
