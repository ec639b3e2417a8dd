//! Outbox rows and their calendar-day buckets.
//!
//! An [`OutboxEvent`] is written in the same transaction as the domain row it
//! describes and lives until the broker has acknowledged its payload.
//!
//! # Buckets
//!
//! Rows are partitioned by the UTC calendar day of their creation
//! (`"YYYY-MM-DD"`). The bucket is computed once, at write time, and stored
//! on the row. Readers and the delete path always use the stored value and
//! never recompute "today", so an event written at 23:59:59 is still found
//! and deleted after midnight.

use crate::event::{self, EventError};
use crate::model::Product;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Format of a bucket key.
pub const BUCKET_FORMAT: &str = "%Y-%m-%d";

/// Compute the bucket for a creation time.
///
/// # Example
///
/// ```
/// use catalog_core::outbox::bucket_for;
/// use chrono::{TimeZone, Utc};
///
/// let at = Utc.with_ymd_and_hms(2025, 1, 31, 23, 59, 59).unwrap();
/// assert_eq!(bucket_for(at), "2025-01-31");
/// ```
#[must_use]
pub fn bucket_for(at: DateTime<Utc>) -> String {
    at.format(BUCKET_FORMAT).to_string()
}

/// A pending event awaiting publication.
///
/// Keyed by `(bucket, id)`. `id` comes from the time-ordered ID generator, so
/// ascending `id` within a bucket is creation order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Time-ordered unique id
    pub id: u64,
    /// Calendar day of creation, immutable
    pub bucket: String,
    /// Event type tag (e.g. [`event::CREATE_PRODUCT_EVENT`])
    pub event_type: String,
    /// Serialized snapshot of the entity
    pub payload: String,
}

impl OutboxEvent {
    /// Build the outbox row announcing a newly created product.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if the snapshot cannot be
    /// encoded.
    pub fn product_created(
        id: u64,
        product: &Product,
        created_at: DateTime<Utc>,
    ) -> Result<Self, EventError> {
        Ok(Self {
            id,
            bucket: bucket_for(created_at),
            event_type: event::CREATE_PRODUCT_EVENT.to_string(),
            payload: event::encode_product(product)?,
        })
    }
}
