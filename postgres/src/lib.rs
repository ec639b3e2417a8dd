//! `PostgreSQL` catalog store with a transactional outbox.
//!
//! [`PostgresCatalogStore`] implements both
//! [`CatalogStore`] and [`OutboxStore`] over one connection pool:
//!
//! - `categories(id)`
//! - `products(category_id, id)`, paged by ascending id
//! - `products_outbox(bucket, id)`, written in the same transaction as the
//!   product it announces
//!
//! # Example
//!
//! ```ignore
//! use catalog_postgres::PostgresCatalogStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresCatalogStore::new("postgres://localhost/catalog").await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use catalog_core::cursor;
use catalog_core::model::{Category, Product};
use catalog_core::outbox::OutboxEvent;
use catalog_core::store::{CatalogStore, OutboxStore, Page, PageRequest, StoreError};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// PostgreSQL-backed catalog and outbox store.
#[derive(Clone, Debug)]
pub struct PostgresCatalogStore {
    pool: PgPool,
}

impl PostgresCatalogStore {
    /// Connect with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection fails.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        Self::connect(database_url, 10, Duration::from_secs(30)).await
    }

    /// Connect with explicit pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection fails.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;

        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the catalog and outbox tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let mut migrator = sqlx::migrate!("./migrations");
        // The inventory migrations may share this database.
        migrator.set_ignore_missing(true);
        migrator
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))
    }

    fn row_to_category(row: &PgRow) -> Result<Category, StoreError> {
        Ok(Category {
            id: from_db_id(row.try_get("id").map_err(db)?)?,
            name: row.try_get("name").map_err(db)?,
            description: row.try_get("description").map_err(db)?,
            created_at: row.try_get("created_at").map_err(db)?,
        })
    }

    fn row_to_product(row: &PgRow) -> Result<Product, StoreError> {
        Ok(Product {
            id: from_db_id(row.try_get("id").map_err(db)?)?,
            category_id: from_db_id(row.try_get("category_id").map_err(db)?)?,
            name: row.try_get("name").map_err(db)?,
            description: row.try_get("description").map_err(db)?,
            price: row.try_get("price").map_err(db)?,
            stock: row.try_get("stock").map_err(db)?,
            created_at: row.try_get("created_at").map_err(db)?,
            updated_at: row.try_get("updated_at").map_err(db)?,
        })
    }

    fn row_to_event(row: &PgRow) -> Result<OutboxEvent, StoreError> {
        Ok(OutboxEvent {
            id: from_db_id(row.try_get("id").map_err(db)?)?,
            bucket: row.try_get("bucket").map_err(db)?,
            event_type: row.try_get("event_type").map_err(db)?,
            payload: row.try_get("payload").map_err(db)?,
        })
    }
}

#[allow(clippy::needless_pass_by_value)]
fn db(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

/// Map a write error, turning unique violations into [`StoreError::Conflict`].
#[allow(clippy::needless_pass_by_value)]
fn write_error(what: &str, e: sqlx::Error) -> StoreError {
    let duplicate = e
        .as_database_error()
        .is_some_and(|d| d.is_unique_violation());
    if duplicate {
        StoreError::Conflict(format!("{what} already exists"))
    } else {
        StoreError::Database(format!("Failed to insert {what}: {e}"))
    }
}

fn to_db_id(id: u64) -> Result<i64, StoreError> {
    i64::try_from(id).map_err(|_| StoreError::Serialization(format!("id {id} exceeds BIGINT")))
}

fn from_db_id(id: i64) -> Result<u64, StoreError> {
    u64::try_from(id).map_err(|_| StoreError::Serialization(format!("negative id {id}")))
}

impl CatalogStore for PostgresCatalogStore {
    fn insert_category<'a>(
        &'a self,
        category: &'a Category,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO categories (id, name, description, created_at)
                VALUES ($1, $2, $3, $4)
                ",
            )
            .bind(to_db_id(category.id)?)
            .bind(&category.name)
            .bind(&category.description)
            .bind(category.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| write_error(&format!("category {}", category.id), e))?;
            Ok(())
        })
    }

    fn get_category(
        &self,
        id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Category>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT id, name, description, created_at FROM categories WHERE id = $1",
            )
            .bind(to_db_id(id)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;

            row.as_ref().map(Self::row_to_category).transpose()
        })
    }

    fn create_product_with_event<'a>(
        &'a self,
        product: &'a Product,
        event: &'a OutboxEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(db)?;

            sqlx::query(
                r"
                INSERT INTO products
                    (category_id, id, name, description, price, stock, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ",
            )
            .bind(to_db_id(product.category_id)?)
            .bind(to_db_id(product.id)?)
            .bind(&product.name)
            .bind(&product.description)
            .bind(product.price)
            .bind(product.stock)
            .bind(product.created_at)
            .bind(product.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error(&format!("product {}", product.id), e))?;

            sqlx::query(
                r"
                INSERT INTO products_outbox (bucket, id, event_type, payload)
                VALUES ($1, $2, $3, $4)
                ",
            )
            .bind(&event.bucket)
            .bind(to_db_id(event.id)?)
            .bind(&event.event_type)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error(&format!("outbox event {}", event.id), e))?;

            // Dropping `tx` on any early return above rolls both inserts back.
            tx.commit().await.map_err(db)?;

            tracing::debug!(
                product_id = product.id,
                event_id = event.id,
                bucket = %event.bucket,
                "Product and outbox event committed"
            );
            Ok(())
        })
    }

    fn get_product(
        &self,
        category_id: u64,
        product_id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Product>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT category_id, id, name, description, price, stock, created_at, updated_at
                FROM products
                WHERE category_id = $1 AND id = $2
                ",
            )
            .bind(to_db_id(category_id)?)
            .bind(to_db_id(product_id)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;

            row.as_ref().map(Self::row_to_product).transpose()
        })
    }

    fn list_products(
        &self,
        category_id: u64,
        page: PageRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Page<Product>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let after = page
                .continuation
                .as_deref()
                .and_then(cursor::resume_after)
                .and_then(|id| i64::try_from(id).ok())
                .unwrap_or(0);
            let limit = page.page_size.max(1);

            let rows = sqlx::query(
                r"
                SELECT category_id, id, name, description, price, stock, created_at, updated_at
                FROM products
                WHERE category_id = $1 AND id > $2
                ORDER BY id ASC
                LIMIT $3
                ",
            )
            .bind(to_db_id(category_id)?)
            .bind(after)
            .bind(i64::from(limit) + 1)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;

            let mut items = rows
                .iter()
                .map(Self::row_to_product)
                .collect::<Result<Vec<_>, _>>()?;

            let limit = usize::try_from(limit).unwrap_or(usize::MAX);
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

impl OutboxStore for PostgresCatalogStore {
    fn pending_buckets(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query("SELECT DISTINCT bucket FROM products_outbox ORDER BY bucket ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(db)?;

            rows.iter()
                .map(|row| row.try_get::<String, _>("bucket").map_err(db))
                .collect()
        })
    }

    fn events_in_bucket<'a>(
        &'a self,
        bucket: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxEvent>, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT bucket, id, event_type, payload
                FROM products_outbox
                WHERE bucket = $1
                ORDER BY id ASC
                ",
            )
            .bind(bucket)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;

            rows.iter().map(Self::row_to_event).collect()
        })
    }

    fn delete_event<'a>(
        &'a self,
        bucket: &'a str,
        id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM products_outbox WHERE bucket = $1 AND id = $2")
                .bind(bucket)
                .bind(to_db_id(id)?)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    StoreError::Database(format!(
                        "Failed to delete outbox event {id} in bucket {bucket}: {e}"
                    ))
                })?;
            Ok(())
        })
    }
}
