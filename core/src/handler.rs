//! Event handler seam between the broker consumer and a read model.

use crate::event::EventError;
use crate::store::StoreError;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Why a message could not be applied.
#[derive(Error, Debug)]
pub enum HandleError {
    /// The payload is not a valid event. Redelivery will not help.
    #[error("Malformed event: {0}")]
    Decode(#[from] EventError),

    /// The read model could not be written.
    #[error("Failed to apply event: {0}")]
    Apply(#[from] StoreError),
}

/// Applies one message payload to a read model.
///
/// Implementations must be idempotent: the consumer acks after `handle`
/// returns, so a crash between the two replays the same payload.
pub trait EventHandler: Send + Sync {
    /// Apply `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError`] if the payload is malformed or cannot be
    /// applied. The consumer nacks the message in either case.
    fn handle<'a>(
        &'a self,
        payload: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), HandleError>> + Send + 'a>>;
}
