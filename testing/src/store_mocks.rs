//! In-memory storage for fast, deterministic tests.
//!
//! - [`InMemoryCatalogStore`]: categories, products and the outbox behind one
//!   lock, so the product/outbox dual-write is trivially atomic
//! - [`InMemoryInventoryStore`]: the inventory read model
//!
//! Both count calls and can be told to fail, which lets tests assert that a
//! rejected request never touched storage or that a failed write left
//! nothing behind.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only follows a test panic

use catalog_core::cursor;
use catalog_core::model::{Category, InventoryRecord, Product};
use catalog_core::outbox::OutboxEvent;
use catalog_core::store::{
    CatalogStore, InventoryStore, OutboxStore, Page, PageRequest, StoreError,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct CatalogTables {
    categories: BTreeMap<u64, Category>,
    products: BTreeMap<(u64, u64), Product>,
    outbox: BTreeMap<(String, u64), OutboxEvent>,
}

#[derive(Debug, Default)]
struct Faults {
    writes: AtomicBool,
    reads: AtomicBool,
    scans: AtomicBool,
    deletes: AtomicBool,
}

/// In-memory catalog and outbox store.
///
/// Clones share the same tables.
///
/// # Example
///
/// ```
/// use catalog_testing::InMemoryCatalogStore;
/// use catalog_testing::fixtures::category;
/// use catalog_core::store::CatalogStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryCatalogStore::new();
/// store.insert_category(&category(1)).await?;
/// assert!(store.get_category(1).await?.is_some());
/// assert_eq!(store.calls(), 2);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryCatalogStore {
    tables: Arc<RwLock<CatalogTables>>,
    calls: Arc<AtomicUsize>,
    faults: Arc<Faults>,
}

impl InMemoryCatalogStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of trait calls made so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of stored products.
    #[must_use]
    pub fn product_count(&self) -> usize {
        self.tables.read().unwrap().products.len()
    }

    /// Number of pending outbox rows.
    #[must_use]
    pub fn outbox_len(&self) -> usize {
        self.tables.read().unwrap().outbox.len()
    }

    /// All pending outbox rows in `(bucket, id)` order.
    #[must_use]
    pub fn outbox_events(&self) -> Vec<OutboxEvent> {
        self.tables.read().unwrap().outbox.values().cloned().collect()
    }

    /// Place a row in the outbox directly, bypassing the product write.
    pub fn seed_outbox(&self, event: OutboxEvent) {
        self.tables
            .write()
            .unwrap()
            .outbox
            .insert((event.bucket.clone(), event.id), event);
    }

    /// Make product writes fail until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.faults.writes.store(fail, Ordering::SeqCst);
    }

    /// Make point lookups fail until reset.
    pub fn fail_reads(&self, fail: bool) {
        self.faults.reads.store(fail, Ordering::SeqCst);
    }

    /// Make outbox and product scans fail until reset.
    pub fn fail_scans(&self, fail: bool) {
        self.faults.scans.store(fail, Ordering::SeqCst);
    }

    /// Make outbox deletes fail until reset.
    pub fn fail_deletes(&self, fail: bool) {
        self.faults.deletes.store(fail, Ordering::SeqCst);
    }

    fn enter(&self, fault: &AtomicBool, what: &str) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if fault.load(Ordering::SeqCst) {
            return Err(StoreError::Database(format!("injected {what} failure")));
        }
        Ok(())
    }
}

impl CatalogStore for InMemoryCatalogStore {
    fn insert_category<'a>(
        &'a self,
        category: &'a Category,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            self.enter(&self.faults.writes, "write")?;
            let mut tables = self.tables.write().unwrap();
            if tables.categories.contains_key(&category.id) {
                return Err(StoreError::Conflict(format!("category {}", category.id)));
            }
            tables.categories.insert(category.id, category.clone());
            Ok(())
        })
    }

    fn get_category(
        &self,
        id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Category>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.enter(&self.faults.reads, "read")?;
            Ok(self.tables.read().unwrap().categories.get(&id).cloned())
        })
    }

    fn create_product_with_event<'a>(
        &'a self,
        product: &'a Product,
        event: &'a OutboxEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            self.enter(&self.faults.writes, "write")?;
            let mut tables = self.tables.write().unwrap();
            let product_key = (product.category_id, product.id);
            let event_key = (event.bucket.clone(), event.id);
            if tables.products.contains_key(&product_key) {
                return Err(StoreError::Conflict(format!("product {}", product.id)));
            }
            if tables.outbox.contains_key(&event_key) {
                return Err(StoreError::Conflict(format!("outbox event {}", event.id)));
            }
            tables.products.insert(product_key, product.clone());
            tables.outbox.insert(event_key, event.clone());
            Ok(())
        })
    }

    fn get_product(
        &self,
        category_id: u64,
        product_id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Product>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.enter(&self.faults.reads, "read")?;
            Ok(self
                .tables
                .read()
                .unwrap()
                .products
                .get(&(category_id, product_id))
                .cloned())
        })
    }

    fn list_products(
        &self,
        category_id: u64,
        page: PageRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Page<Product>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.enter(&self.faults.scans, "scan")?;
            let after = page
                .continuation
                .as_deref()
                .and_then(cursor::resume_after)
                .unwrap_or(0);
            let limit = usize::try_from(page.page_size.max(1)).unwrap_or(usize::MAX);

            let tables = self.tables.read().unwrap();
            let mut items: Vec<Product> = tables
                .products
                .range((category_id, after.saturating_add(1))..=(category_id, u64::MAX))
                .take(limit.saturating_add(1))
                .map(|(_, product)| product.clone())
                .collect();

            let continuation = if items.len() > limit {
                items.truncate(limit);
                items
                    .last()
                    .map(|last| cursor::continuation_after(last.id))
                    .unwrap_or_default()
            } else {
                Vec::new()
            };

            Ok(Page {
                items,
                continuation,
            })
        })
    }
}

impl OutboxStore for InMemoryCatalogStore {
    fn pending_buckets(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.enter(&self.faults.scans, "scan")?;
            let buckets: BTreeSet<String> = self
                .tables
                .read()
                .unwrap()
                .outbox
                .keys()
                .map(|(bucket, _)| bucket.clone())
                .collect();
            Ok(buckets.into_iter().collect())
        })
    }

    fn events_in_bucket<'a>(
        &'a self,
        bucket: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxEvent>, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            self.enter(&self.faults.scans, "scan")?;
            Ok(self
                .tables
                .read()
                .unwrap()
                .outbox
                .values()
                .filter(|event| event.bucket == bucket)
                .cloned()
                .collect())
        })
    }

    fn delete_event<'a>(
        &'a self,
        bucket: &'a str,
        id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            self.enter(&self.faults.deletes, "delete")?;
            self.tables
                .write()
                .unwrap()
                .outbox
                .remove(&(bucket.to_string(), id));
            Ok(())
        })
    }
}

/// In-memory inventory read model.
///
/// Applies the same stale-write guard as the Postgres table: a record older
/// than the stored row is ignored.
#[derive(Clone, Debug, Default)]
pub struct InMemoryInventoryStore {
    rows: Arc<RwLock<HashMap<u64, InventoryRecord>>>,
    upserts: Arc<AtomicUsize>,
    failing_upserts: Arc<AtomicUsize>,
}

impl InMemoryInventoryStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().unwrap().len()
    }

    /// Check if the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().unwrap().is_empty()
    }

    /// Number of upsert calls, including failed and ignored ones.
    #[must_use]
    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    /// Make the next `count` upserts fail.
    pub fn fail_next_upserts(&self, count: usize) {
        self.failing_upserts.store(count, Ordering::SeqCst);
    }

    /// Snapshot of a row.
    #[must_use]
    pub fn row(&self, product_id: u64) -> Option<InventoryRecord> {
        self.rows.read().unwrap().get(&product_id).cloned()
    }
}

impl InventoryStore for InMemoryInventoryStore {
    fn upsert<'a>(
        &'a self,
        record: &'a InventoryRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            self.upserts.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failing_upserts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if failing.is_ok() {
                return Err(StoreError::Database("injected upsert failure".to_string()));
            }

            let mut rows = self.rows.write().unwrap();
            let stale = rows
                .get(&record.product_id)
                .is_some_and(|existing| existing.last_updated_at > record.last_updated_at);
            if !stale {
                rows.insert(record.product_id, record.clone());
            }
            Ok(())
        })
    }

    fn get(
        &self,
        product_id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<InventoryRecord>, StoreError>> + Send + '_>> {
        Box::pin(async move { Ok(self.row(product_id)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::product;

    fn event(id: u64, bucket: &str) -> OutboxEvent {
        OutboxEvent {
            id,
            bucket: bucket.to_string(),
            event_type: "create_product_event".to_string(),
            payload: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn conflicting_outbox_row_leaves_no_product() {
        let store = InMemoryCatalogStore::new();
        store.seed_outbox(event(1, "2025-01-01"));

        let result = store
            .create_product_with_event(&product(1, 10), &event(1, "2025-01-01"))
            .await;

        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(store.product_count(), 0);
        assert_eq!(store.outbox_len(), 1);
    }

    #[tokio::test]
    async fn buckets_and_events_come_back_in_order() {
        let store = InMemoryCatalogStore::new();
        store.seed_outbox(event(9, "2025-01-02"));
        store.seed_outbox(event(5, "2025-01-01"));
        store.seed_outbox(event(2, "2025-01-01"));

        assert_eq!(
            store.pending_buckets().await.unwrap(),
            vec!["2025-01-01".to_string(), "2025-01-02".to_string()]
        );
        let ids: Vec<u64> = store
            .events_in_bucket("2025-01-01")
            .await
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![2, 5]);
    }

    #[tokio::test]
    async fn list_pages_by_id_within_a_category() {
        let store = InMemoryCatalogStore::new();
        for id in [3, 1, 2] {
            store
                .create_product_with_event(&product(7, id), &event(id, "2025-01-01"))
                .await
                .unwrap();
        }
        store
            .create_product_with_event(&product(8, 4), &event(4, "2025-01-01"))
            .await
            .unwrap();

        let first = store
            .list_products(
                7,
                PageRequest {
                    page_size: 2,
                    continuation: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(first.items.iter().map(|p| p.id).collect::<Vec<_>>(), [1, 2]);
        assert!(!first.continuation.is_empty());

        let second = store
            .list_products(
                7,
                PageRequest {
                    page_size: 2,
                    continuation: Some(first.continuation),
                },
            )
            .await
            .unwrap();
        assert_eq!(second.items.iter().map(|p| p.id).collect::<Vec<_>>(), [3]);
        assert!(second.continuation.is_empty());
    }

    #[tokio::test]
    async fn stale_inventory_write_is_ignored() {
        let store = InMemoryInventoryStore::new();
        let newer = InventoryRecord::from_product(&product(1, 5));
        let mut older = newer.clone();
        older.stock_count = 999;
        older.last_updated_at = newer.last_updated_at - chrono::Duration::seconds(1);

        store.upsert(&newer).await.unwrap();
        store.upsert(&older).await.unwrap();

        assert_eq!(store.row(5).unwrap().stock_count, newer.stock_count);
        assert_eq!(store.upsert_calls(), 2);
    }
}
