//! # Catalog Core
//!
//! Core types and traits for the product catalog and its transactional outbox.
//!
//! This crate holds everything the other crates agree on:
//!
//! - **Model**: [`Category`](model::Category), [`Product`](model::Product),
//!   [`InventoryRecord`](model::InventoryRecord)
//! - **Outbox**: [`OutboxEvent`](outbox::OutboxEvent) and the calendar-day bucket
//! - **Event payloads**: snapshot encoding of products for the broker
//! - **Cursor codec**: opaque, base64-wrapped paging tokens
//! - **Storage traits**: [`CatalogStore`](store::CatalogStore),
//!   [`OutboxStore`](store::OutboxStore), [`InventoryStore`](store::InventoryStore)
//! - **Broker traits**: [`MessagePublisher`](broker::MessagePublisher),
//!   [`MessageSubscriber`](broker::MessageSubscriber)
//! - **Environment**: [`Clock`](environment::Clock) and
//!   [`IdGenerator`](id::IdGenerator)
//!
//! ## Data Flow
//!
//! ```text
//! request ──► ProductService ──► CatalogStore (products + products_outbox, one transaction)
//!
//! OutboxPoller ──► OutboxStore ──► MessagePublisher ──► broker
//!                                                         │
//! InventoryStore ◄── EventHandler ◄── MessageSubscriber ◄─┘
//! ```
//!
//! The outbox table is the only coupling point between the request path and
//! the delivery pipeline.

pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod broker;
pub mod cursor;
pub mod environment;
pub mod event;
pub mod handler;
pub mod id;
pub mod model;
pub mod outbox;
pub mod store;
