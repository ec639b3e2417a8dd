//! `PostgreSQL` storage for the inventory read model.
//!
//! # Architecture
//!
//! ```text
//! Write Side (Catalog)              Read Side (Inventory)
//! ┌─────────────────────┐          ┌─────────────────────┐
//! │  PostgreSQL DB #1   │          │  PostgreSQL DB #2   │
//! │                     │          │                     │
//! │  categories         │   →→→    │  inventory          │
//! │  products           │  Broker  │                     │
//! │  products_outbox    │          │                     │
//! └─────────────────────┘          └─────────────────────┘
//! ```
//!
//! Both sides may share one database; the migrations do not collide.

use catalog_core::model::InventoryRecord;
use catalog_core::store::{InventoryStore, StoreError};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use std::future::Future;
use std::pin::Pin;

/// PostgreSQL-backed inventory store.
///
/// ```sql
/// CREATE TABLE inventory (
///     product_id      BIGINT PRIMARY KEY,
///     category_id     BIGINT NOT NULL,
///     stock_count     INTEGER NOT NULL,
///     created_at      TIMESTAMPTZ NOT NULL,
///     last_updated_at TIMESTAMPTZ NOT NULL
/// );
/// ```
///
/// # Example
///
/// ```ignore
/// let store = PostgresInventoryStore::new_with_separate_db(
///     "postgres://localhost/inventory",
///     10,
/// ).await?;
/// store.migrate().await?;
/// ```
#[derive(Clone, Debug)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    /// Create a store using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a store with its own connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection fails.
    pub async fn new_with_separate_db(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `inventory` table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let mut migrator = sqlx::migrate!("./migrations");
        // The catalog migrations may share this database.
        migrator.set_ignore_missing(true);
        migrator
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))
    }

    fn row_to_record(row: &PgRow) -> Result<InventoryRecord, StoreError> {
        let product_id: i64 = row.try_get("product_id").map_err(db)?;
        let category_id: i64 = row.try_get("category_id").map_err(db)?;
        Ok(InventoryRecord {
            product_id: from_db_id(product_id)?,
            category_id: from_db_id(category_id)?,
            stock_count: row.try_get("stock_count").map_err(db)?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(db)?,
            last_updated_at: row.try_get::<DateTime<Utc>, _>("last_updated_at").map_err(db)?,
        })
    }
}

#[allow(clippy::needless_pass_by_value)]
fn db(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn to_db_id(id: u64) -> Result<i64, StoreError> {
    i64::try_from(id).map_err(|_| StoreError::Serialization(format!("id {id} exceeds BIGINT")))
}

fn from_db_id(id: i64) -> Result<u64, StoreError> {
    u64::try_from(id).map_err(|_| StoreError::Serialization(format!("negative id {id}")))
}

impl InventoryStore for PostgresInventoryStore {
    fn upsert<'a>(
        &'a self,
        record: &'a InventoryRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            // A stale redelivery must not roll the row back.
            sqlx::query(
                r"
                INSERT INTO inventory
                    (product_id, category_id, stock_count, created_at, last_updated_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (product_id) DO UPDATE SET
                    category_id = EXCLUDED.category_id,
                    stock_count = EXCLUDED.stock_count,
                    last_updated_at = EXCLUDED.last_updated_at
                WHERE inventory.last_updated_at <= EXCLUDED.last_updated_at
                ",
            )
            .bind(to_db_id(record.product_id)?)
            .bind(to_db_id(record.category_id)?)
            .bind(record.stock_count)
            .bind(record.created_at)
            .bind(record.last_updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                StoreError::Database(format!(
                    "Failed to upsert inventory for product {}: {e}",
                    record.product_id
                ))
            })?;
            Ok(())
        })
    }

    fn get(
        &self,
        product_id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<InventoryRecord>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT product_id, category_id, stock_count, created_at, last_updated_at
                FROM inventory
                WHERE product_id = $1
                ",
            )
            .bind(to_db_id(product_id)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;

            row.as_ref().map(Self::row_to_record).transpose()
        })
    }
}
