//! Catalog entities and the inventory read model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A product category.
///
/// Categories are immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Snowflake id
    pub id: u64,
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// A product in the catalog.
///
/// `category_id` is a trusted reference supplied by the caller; nothing joins
/// against the categories table to enforce it.
///
/// The whole struct is the payload of the `create_product_event` outbox
/// event, so its serde shape is a wire format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Snowflake id
    pub id: u64,
    /// Owning category
    pub category_id: u64,
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Unit price
    pub price: f32,
    /// Units in stock at creation
    pub stock: i32,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

/// Inventory row materialized by the event consumer.
///
/// Never written by the request path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    /// Product this row tracks (primary key)
    pub product_id: u64,
    /// Category of the product
    pub category_id: u64,
    /// Units in stock
    pub stock_count: i32,
    /// When the product was created
    pub created_at: DateTime<Utc>,
    /// Modification time of the product snapshot that produced this row
    pub last_updated_at: DateTime<Utc>,
}

impl InventoryRecord {
    /// Build the inventory row for a product snapshot.
    ///
    /// Every field comes from the snapshot, so applying the same event twice
    /// yields an identical row.
    #[must_use]
    pub const fn from_product(product: &Product) -> Self {
        Self {
            product_id: product.id,
            category_id: product.category_id,
            stock_count: product.stock,
            created_at: product.created_at,
            last_updated_at: product.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inventory_record_copies_snapshot_fields() {
        let at = DateTime::parse_from_rfc3339("2025-03-01T10:00:00Z")
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default();
        let product = Product {
            id: 42,
            category_id: 7,
            name: "Kettle".to_string(),
            description: "Stainless".to_string(),
            price: 19.5,
            stock: 12,
            created_at: at,
            updated_at: at,
        };

        let record = InventoryRecord::from_product(&product);

        assert_eq!(record.product_id, 42);
        assert_eq!(record.category_id, 7);
        assert_eq!(record.stock_count, 12);
        assert_eq!(record.last_updated_at, at);
        assert_eq!(record, InventoryRecord::from_product(&product));
    }
}
