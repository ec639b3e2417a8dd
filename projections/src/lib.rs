//! Inventory read model for the product catalog.
//!
//! # Overview
//!
//! - **[`InventoryProjection`]**: the [`EventHandler`](catalog_core::handler::EventHandler)
//!   the consumer runs for every product event
//! - **[`PostgresInventoryStore`]**: the `inventory` table
//!
//! # CQRS Separation
//!
//! The inventory table is written only by the consumer, never by the request
//! path. It may live in its own database:
//!
//! ```text
//! Catalog DB (Write)  →  Outbox  →  Broker  →  Inventory DB (Read)
//! ```
//!
//! # Wiring
//!
//! ```ignore
//! use catalog_projections::{InventoryProjection, PostgresInventoryStore};
//! use catalog_runtime::EventConsumer;
//!
//! let store = PostgresInventoryStore::new_with_separate_db(url, 10).await?;
//! store.migrate().await?;
//!
//! let projection = InventoryProjection::new(Arc::new(store));
//! let consumer = EventConsumer::new(subscriber, Arc::new(projection));
//! consumer.spawn(shutdown);
//! ```

pub mod inventory;
pub mod postgres;

// Re-export main types for convenience
pub use inventory::InventoryProjection;
pub use postgres::PostgresInventoryStore;
