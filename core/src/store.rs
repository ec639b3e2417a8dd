//! Storage traits for the catalog, the outbox and the inventory read model.
//!
//! # Implementations
//!
//! - `PostgresCatalogStore` (in `catalog-postgres`): catalog + outbox tables
//! - `PostgresInventoryStore` (in `catalog-projections`): inventory table
//! - `InMemoryCatalogStore` / `InMemoryInventoryStore` (in `catalog-testing`)
//!
//! # Atomicity
//!
//! [`CatalogStore::create_product_with_event`] is the outbox dual-write. An
//! implementation must make both rows visible together or neither: a
//! database transaction, a logged batch, or a single critical section.
//!
//! # Dyn Compatibility
//!
//! The traits return `Pin<Box<dyn Future>>` so they can be shared as
//! `Arc<dyn CatalogStore>` between the request path and the background tasks.

use crate::model::{Category, InventoryRecord, Product};
use crate::outbox::OutboxEvent;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    Database(String),

    /// Row could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A row with the same key already exists.
    #[error("Conflict: {0}")]
    Conflict(String),
}

/// A page request for a keyset-paginated scan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum number of rows to return (at least 1)
    pub page_size: u32,
    /// Continuation bytes from the previous page, if any
    pub continuation: Option<Vec<u8>>,
}

/// One page of a paginated scan.
#[derive(Clone, Debug, PartialEq)]
pub struct Page<T> {
    /// Rows on this page
    pub items: Vec<T>,
    /// Continuation bytes for the next page; empty when this was the last page
    pub continuation: Vec<u8>,
}

/// Catalog entity storage.
pub trait CatalogStore: Send + Sync {
    /// Insert a category.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the row cannot be written.
    fn insert_category<'a>(
        &'a self,
        category: &'a Category,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;

    /// Load a category by id. `Ok(None)` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup itself fails.
    fn get_category(
        &self,
        id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Category>, StoreError>> + Send + '_>>;

    /// Insert a product and its outbox event as one atomic unit.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if either write fails; in that case neither row
    /// is visible to any reader.
    fn create_product_with_event<'a>(
        &'a self,
        product: &'a Product,
        event: &'a OutboxEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;

    /// Load a product by category and id. `Ok(None)` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup itself fails.
    fn get_product(
        &self,
        category_id: u64,
        product_id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Product>, StoreError>> + Send + '_>>;

    /// List a category's products in ascending id order, one page at a time.
    ///
    /// Continuation bytes that the store does not recognize restart the scan
    /// from the first page.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the scan fails.
    fn list_products(
        &self,
        category_id: u64,
        page: PageRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Page<Product>, StoreError>> + Send + '_>>;
}

/// Outbox table access used by the poller and the publisher.
pub trait OutboxStore: Send + Sync {
    /// Buckets that currently hold at least one event, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the scan fails.
    fn pending_buckets(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, StoreError>> + Send + '_>>;

    /// All events in `bucket`, ascending by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the scan fails.
    fn events_in_bucket<'a>(
        &'a self,
        bucket: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxEvent>, StoreError>> + Send + 'a>>;

    /// Delete the event stored under `(bucket, id)`.
    ///
    /// Deleting a row that is already gone is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    fn delete_event<'a>(
        &'a self,
        bucket: &'a str,
        id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;
}

/// Inventory read-model storage, written only by the event consumer.
pub trait InventoryStore: Send + Sync {
    /// Insert or replace the row for `record.product_id`.
    ///
    /// Must be idempotent: writing the same record twice leaves the same row.
    /// A record whose `last_updated_at` is older than the stored row's is
    /// ignored so a late redelivery cannot roll the row back.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn upsert<'a>(
        &'a self,
        record: &'a InventoryRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;

    /// Load the row for a product.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup fails.
    fn get(
        &self,
        product_id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<InventoryRecord>, StoreError>> + Send + '_>>;
}
