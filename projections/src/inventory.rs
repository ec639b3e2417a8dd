//! Inventory projection: product events in, inventory rows out.

use catalog_core::event;
use catalog_core::handler::{EventHandler, HandleError};
use catalog_core::model::InventoryRecord;
use catalog_core::store::InventoryStore;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Applies product snapshots to an [`InventoryStore`].
///
/// The row's `last_updated_at` is the product's `updated_at`, never the time
/// of application, so replaying a message writes exactly the same row.
///
/// # Example
///
/// ```
/// use catalog_projections::InventoryProjection;
/// use catalog_testing::InMemoryInventoryStore;
/// use std::sync::Arc;
///
/// let store = InMemoryInventoryStore::new();
/// let projection = InventoryProjection::new(Arc::new(store.clone()));
/// ```
#[derive(Clone)]
pub struct InventoryProjection {
    store: Arc<dyn InventoryStore>,
}

impl InventoryProjection {
    /// Create a projection writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }
}

impl std::fmt::Debug for InventoryProjection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryProjection").finish_non_exhaustive()
    }
}

impl EventHandler for InventoryProjection {
    fn handle<'a>(
        &'a self,
        payload: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), HandleError>> + Send + 'a>> {
        Box::pin(async move {
            let product = event::decode_product(payload)?;
            let record = InventoryRecord::from_product(&product);
            self.store.upsert(&record).await?;
            tracing::debug!(
                product_id = record.product_id,
                stock_count = record.stock_count,
                "Inventory updated"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use catalog_testing::InMemoryInventoryStore;
    use catalog_testing::fixtures::product;
    use catalog_testing::properties::arb_product;
    use proptest::prelude::*;

    #[tokio::test]
    async fn snapshot_becomes_an_inventory_row() {
        let store = InMemoryInventoryStore::new();
        let projection = InventoryProjection::new(Arc::new(store.clone()));
        let product = product(3, 30);

        projection
            .handle(event::encode_product(&product).unwrap().as_bytes())
            .await
            .unwrap();

        let row = store.row(30).unwrap();
        assert_eq!(row.category_id, 3);
        assert_eq!(row.stock_count, product.stock);
        assert_eq!(row.last_updated_at, product.updated_at);
    }

    #[tokio::test]
    async fn malformed_payload_is_a_decode_error() {
        let store = InMemoryInventoryStore::new();
        let projection = InventoryProjection::new(Arc::new(store.clone()));

        let err = projection.handle(b"not json").await.unwrap_err();

        assert!(matches!(err, HandleError::Decode(_)));
        assert_eq!(store.upsert_calls(), 0);
    }

    #[tokio::test]
    async fn store_failure_is_an_apply_error() {
        let store = InMemoryInventoryStore::new();
        store.fail_next_upserts(1);
        let projection = InventoryProjection::new(Arc::new(store.clone()));
        let payload = event::encode_product(&product(1, 1)).unwrap();

        let err = projection.handle(payload.as_bytes()).await.unwrap_err();

        assert!(matches!(err, HandleError::Apply(_)));
        assert!(store.is_empty());
    }

    proptest! {
        #[test]
        fn applying_twice_equals_applying_once(product in arb_product()) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let store = InMemoryInventoryStore::new();
            let projection = InventoryProjection::new(Arc::new(store.clone()));
            let payload = event::encode_product(&product).unwrap();

            rt.block_on(projection.handle(payload.as_bytes())).unwrap();
            let once = store.row(product.id);
            rt.block_on(projection.handle(payload.as_bytes())).unwrap();

            prop_assert_eq!(store.row(product.id), once);
            prop_assert_eq!(store.len(), 1);
        }
    }
}
