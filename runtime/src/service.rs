//! Product catalog operations exposed to the transport layer.
//!
//! [`ProductService`] validates each request before touching storage, writes
//! products together with their outbox event, and maps every failure onto
//! [`ServiceError`]. It keeps no mutable state of its own; clones share the
//! same store, id generator and clock.

use crate::error::ServiceError;
use catalog_core::cursor::{self, PageCursor};
use catalog_core::environment::Clock;
use catalog_core::id::IdGenerator;
use catalog_core::model::{Category, Product};
use catalog_core::outbox::OutboxEvent;
use catalog_core::store::{CatalogStore, PageRequest};
use catalog_core::{DateTime, Utc};
use chrono::SubsecRound;
use std::sync::Arc;

/// Page size used when a list request does not give a positive one.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Input for [`ProductService::create_category`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateCategoryRequest {
    /// Display name (required)
    pub name: String,
    /// Description (required)
    pub description: String,
}

/// Input for [`ProductService::create_product`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CreateProductRequest {
    /// Owning category (required, non-zero)
    pub category_id: u64,
    /// Display name (required)
    pub name: String,
    /// Description (required)
    pub description: String,
    /// Unit price (required, non-zero)
    pub price: f32,
    /// Initial stock (required, non-zero)
    pub stock: i32,
}

/// Input for [`ProductService::list_products`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListProductsRequest {
    /// Category to list (required, non-zero)
    pub category_id: u64,
    /// Page size; absent or non-positive means [`DEFAULT_PAGE_SIZE`]
    pub page_size: Option<i32>,
    /// Cursor returned by the previous page
    pub cursor: Option<String>,
}

/// One page of products.
#[derive(Clone, Debug, PartialEq)]
pub struct ProductPage {
    /// Products in ascending id order
    pub products: Vec<Product>,
    /// Cursor for the next page; `None` on the last page
    pub next_cursor: Option<PageCursor>,
}

/// Catalog operations: create and read categories and products.
#[derive(Clone)]
pub struct ProductService {
    store: Arc<dyn CatalogStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl ProductService {
    /// Create a service over the given store, id generator and clock.
    #[must_use]
    pub fn new(
        store: Arc<dyn CatalogStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, ids, clock }
    }

    /// Current time at the precision Postgres stores (microseconds).
    fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(6)
    }

    /// Create a category.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::InvalidArgument`] if `name` or `description` is empty
    /// - [`ServiceError::Internal`] if id generation or the write fails
    #[tracing::instrument(skip(self, request), name = "create_category")]
    pub async fn create_category(
        &self,
        request: CreateCategoryRequest,
    ) -> Result<Category, ServiceError> {
        if request.name.is_empty() || request.description.is_empty() {
            return Err(ServiceError::invalid("name and description are required"));
        }

        let id = self
            .ids
            .next_id()
            .map_err(|e| ServiceError::internal("generate category id", e))?;

        let category = Category {
            id,
            name: request.name,
            description: request.description,
            created_at: self.now(),
        };

        self.store
            .insert_category(&category)
            .await
            .map_err(|e| ServiceError::internal(format!("create category {id}"), e))?;

        tracing::info!(category_id = id, "Category created");
        Ok(category)
    }

    /// Create a product and record its creation event in the outbox.
    ///
    /// The product row and the outbox row are written as one atomic unit;
    /// if the call fails neither is visible.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::InvalidArgument`] if any field is missing or zero
    /// - [`ServiceError::Internal`] if id generation, payload encoding or the
    ///   write fails
    #[tracing::instrument(skip(self, request), fields(category_id = request.category_id), name = "create_product")]
    pub async fn create_product(
        &self,
        request: CreateProductRequest,
    ) -> Result<Product, ServiceError> {
        if request.name.is_empty()
            || request.description.is_empty()
            || request.price == 0.0
            || request.stock == 0
            || request.category_id == 0
        {
            return Err(ServiceError::invalid(
                "name, description, price, stock and category id are required",
            ));
        }

        let product_id = self
            .ids
            .next_id()
            .map_err(|e| ServiceError::internal("generate product id", e))?;
        let outbox_id = self
            .ids
            .next_id()
            .map_err(|e| ServiceError::internal("generate outbox id", e))?;

        let now = self.now();
        let product = Product {
            id: product_id,
            category_id: request.category_id,
            name: request.name,
            description: request.description,
            price: request.price,
            stock: request.stock,
            created_at: now,
            updated_at: now,
        };

        let event = OutboxEvent::product_created(outbox_id, &product, now).map_err(|e| {
            ServiceError::internal(format!("encode product {product_id}"), e)
        })?;

        self.store
            .create_product_with_event(&product, &event)
            .await
            .map_err(|e| ServiceError::internal(format!("create product {product_id}"), e))?;

        tracing::info!(
            product_id,
            event_id = outbox_id,
            bucket = %event.bucket,
            "Product created with outbox event"
        );
        Ok(product)
    }

    /// Fetch a category by id.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::InvalidArgument`] if `id` is zero
    /// - [`ServiceError::NotFound`] if no such category exists
    /// - [`ServiceError::Internal`] if the lookup fails
    pub async fn get_category(&self, id: u64) -> Result<Category, ServiceError> {
        if id == 0 {
            return Err(ServiceError::invalid("id is required"));
        }

        self.store
            .get_category(id)
            .await
            .map_err(|e| ServiceError::internal(format!("get category {id}"), e))?
            .ok_or_else(|| ServiceError::not_found(format!("category {id} not found")))
    }

    /// Fetch a product by category and id.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::InvalidArgument`] if either id is zero
    /// - [`ServiceError::NotFound`] if no such product exists
    /// - [`ServiceError::Internal`] if the lookup fails
    pub async fn get_product(
        &self,
        category_id: u64,
        product_id: u64,
    ) -> Result<Product, ServiceError> {
        if category_id == 0 || product_id == 0 {
            return Err(ServiceError::invalid(
                "category id and product id are required",
            ));
        }

        self.store
            .get_product(category_id, product_id)
            .await
            .map_err(|e| {
                ServiceError::internal(
                    format!("get product {product_id} in category {category_id}"),
                    e,
                )
            })?
            .ok_or_else(|| {
                ServiceError::not_found(format!(
                    "product {product_id} not found in category {category_id}"
                ))
            })
    }

    /// List a category's products one page at a time.
    ///
    /// A cursor that cannot be decoded restarts the listing from the first
    /// page instead of failing.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::InvalidArgument`] if `category_id` is zero
    /// - [`ServiceError::Internal`] if the scan fails
    pub async fn list_products(
        &self,
        request: ListProductsRequest,
    ) -> Result<ProductPage, ServiceError> {
        let category_id = request.category_id;
        if category_id == 0 {
            return Err(ServiceError::invalid("category id is required"));
        }

        let page_size = request
            .page_size
            .and_then(|size| u32::try_from(size).ok())
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE);

        let continuation = keyset_continuation(request.cursor.as_deref());
        if continuation.is_none() && request.cursor.as_deref().is_some_and(|c| !c.is_empty()) {
            tracing::warn!(category_id, "Malformed page cursor, listing from the first page");
        }

        let page = self
            .store
            .list_products(
                category_id,
                PageRequest {
                    page_size,
                    continuation,
                },
            )
            .await
            .map_err(|e| ServiceError::internal(format!("list products in category {category_id}"), e))?;

        Ok(ProductPage {
            products: page.items,
            next_cursor: cursor::encode(&page.continuation),
        })
    }
}

/// Decode a client cursor into keyset continuation bytes.
///
/// Anything that does not carry a resume point, valid base64 included, reads
/// as "start from the first page".
fn keyset_continuation(raw: Option<&str>) -> Option<Vec<u8>> {
    cursor::decode(raw).filter(|bytes| cursor::resume_after(bytes).is_some())
}

impl std::fmt::Debug for ProductService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductService").finish_non_exhaustive()
    }
}
