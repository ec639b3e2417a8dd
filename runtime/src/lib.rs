//! # Catalog Runtime
//!
//! The moving parts of the catalog service.
//!
//! ## Core Components
//!
//! - **[`ProductService`](service::ProductService)**: validated catalog
//!   operations; product creation writes the outbox event in the same unit
//! - **[`OutboxPoller`](poller::OutboxPoller)**: interval task that drains
//!   pending outbox buckets
//! - **[`OutboxPublisher`](publisher::OutboxPublisher)**: send, await the
//!   broker's delivery report, delete the row
//! - **[`EventConsumer`](consumer::EventConsumer)**: receive, apply, ack/nack
//! - **[`Shutdown`](shutdown::Shutdown)**: one signal observed by every
//!   background loop
//!
//! ## Example
//!
//! ```ignore
//! use catalog_runtime::{poller::OutboxPoller, publisher::OutboxPublisher, shutdown};
//!
//! let (trigger, shutdown) = shutdown::channel();
//! let publisher = OutboxPublisher::new(broker, outbox.clone());
//! let poller = OutboxPoller::new(outbox, publisher).spawn(shutdown.clone());
//!
//! // ... on SIGTERM
//! trigger.trigger();
//! poller.await?;
//! ```

pub mod consumer;
pub mod error;
/// Prometheus metrics for observability
pub mod metrics;
pub mod poller;
pub mod publisher;
pub mod service;
pub mod shutdown;

pub use consumer::{Disposition, EventConsumer};
pub use error::{ServiceError, StatusCode};
pub use poller::{OutboxPoller, TickReport};
pub use publisher::{OutboxPublisher, PublishError};
pub use service::ProductService;
pub use shutdown::{Shutdown, ShutdownTrigger};
