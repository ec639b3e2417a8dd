//! Error taxonomy returned by the product service.

use catalog_core::event::EventError;
use catalog_core::id::IdError;
use catalog_core::store::StoreError;
use std::fmt;
use thiserror::Error;

/// Transport-level status for a [`ServiceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// The caller sent a missing or zero field
    InvalidArgument,
    /// The addressed entity does not exist
    NotFound,
    /// Storage, serialization or id generation failed
    Internal,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "INVALID_ARGUMENT"),
            Self::NotFound => write!(f, "NOT_FOUND"),
            Self::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// Errors returned by [`ProductService`](crate::service::ProductService).
///
/// Validation failures never reach storage. Storage and id failures are
/// wrapped with the operation that hit them so the cause is not exposed raw.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// A required field is missing or zero.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other failure.
    #[error("Internal error: {context}: {source}")]
    Internal {
        /// Operation and ids involved
        context: String,
        /// Underlying cause
        #[source]
        source: InternalCause,
    },
}

/// Underlying cause of a [`ServiceError::Internal`].
#[derive(Error, Debug)]
pub enum InternalCause {
    /// Storage engine failure
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Id generator failure
    #[error(transparent)]
    Id(#[from] IdError),
    /// Payload encoding failure
    #[error(transparent)]
    Event(#[from] EventError),
}

impl ServiceError {
    /// Build an [`ServiceError::InvalidArgument`].
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Build a [`ServiceError::NotFound`].
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Wrap a lower-level failure with the operation that hit it.
    #[must_use]
    pub fn internal(context: impl Into<String>, source: impl Into<InternalCause>) -> Self {
        Self::Internal {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Status code for the transport layer.
    #[must_use]
    pub const fn code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) => StatusCode::InvalidArgument,
            Self::NotFound(_) => StatusCode::NotFound,
            Self::Internal { .. } => StatusCode::Internal,
        }
    }
}
