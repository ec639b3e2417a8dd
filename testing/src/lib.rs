//! # Catalog Testing
//!
//! Test doubles and helpers for the catalog outbox.
//!
//! This crate provides:
//! - Deterministic environment: [`FixedClock`], [`SequentialIdGenerator`]
//! - In-memory storage: [`InMemoryCatalogStore`], [`InMemoryInventoryStore`]
//! - In-memory broker: [`InMemoryBroker`] (publisher and subscriber)
//! - Fixtures and proptest strategies for domain types
//!
//! ## Example
//!
//! ```ignore
//! use catalog_testing::{InMemoryCatalogStore, SequentialIdGenerator, test_clock};
//!
//! #[tokio::test]
//! async fn creates_a_product() {
//!     let store = Arc::new(InMemoryCatalogStore::new());
//!     let service = ProductService::new(
//!         store.clone(),
//!         Arc::new(SequentialIdGenerator::starting_at(100)),
//!         Arc::new(test_clock()),
//!     );
//!     // ...
//!     assert_eq!(store.outbox_len(), 1);
//! }
//! ```

pub mod broker_mocks;
pub mod store_mocks;

/// Mock implementations of environment traits.
pub mod mocks {
    use catalog_core::environment::Clock;
    use catalog_core::id::{IdError, IdGenerator};
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use catalog_testing::mocks::FixedClock;
    /// use catalog_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Predictable ids: `start`, `start + 1`, ...
    #[derive(Debug)]
    pub struct SequentialIdGenerator {
        next: AtomicU64,
    }

    impl SequentialIdGenerator {
        /// Generator whose first id is `start`.
        #[must_use]
        pub const fn starting_at(start: u64) -> Self {
            Self {
                next: AtomicU64::new(start),
            }
        }
    }

    impl Default for SequentialIdGenerator {
        fn default() -> Self {
            Self::starting_at(1)
        }
    }

    impl IdGenerator for SequentialIdGenerator {
        fn next_id(&self) -> Result<u64, IdError> {
            Ok(self.next.fetch_add(1, Ordering::SeqCst))
        }
    }

    /// Generator that always fails.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct FailingIdGenerator;

    impl IdGenerator for FailingIdGenerator {
        fn next_id(&self) -> Result<u64, IdError> {
            Err(IdError::SequenceExhausted { timestamp_ms: 0 })
        }
    }
}

/// Domain fixtures.
pub mod fixtures {
    use crate::mocks::test_clock;
    use catalog_core::environment::Clock;
    use catalog_core::model::{Category, Product};

    /// A category with the given id.
    #[must_use]
    pub fn category(id: u64) -> Category {
        Category {
            id,
            name: format!("Category {id}"),
            description: "Test category".to_string(),
            created_at: test_clock().now(),
        }
    }

    /// A product with the given ids, stamped at [`test_clock`] time.
    #[must_use]
    pub fn product(category_id: u64, id: u64) -> Product {
        let now = test_clock().now();
        Product {
            id,
            category_id,
            name: format!("Product {id}"),
            description: "Test product".to_string(),
            price: 9.5,
            stock: 10,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Property-based testing strategies for domain types.
pub mod properties {
    use catalog_core::model::Product;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;

    /// Timestamps with whole-microsecond precision between 2020 and 2040.
    ///
    /// Postgres `TIMESTAMPTZ` keeps microseconds, so these survive a round
    /// trip through the database unchanged.
    pub fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
        (1_577_836_800_000_000_i64..2_208_988_800_000_000_i64).prop_filter_map(
            "in chrono range",
            |micros| Utc.timestamp_micros(micros).single(),
        )
    }

    /// Arbitrary products with positive ids.
    pub fn arb_product() -> impl Strategy<Value = Product> {
        (
            1..u64::from(u32::MAX),
            1..u64::from(u32::MAX),
            "[a-zA-Z ]{1,24}",
            "[a-zA-Z ]{1,48}",
            1_i32..100_000,
            -500_i32..500,
            arb_timestamp(),
            arb_timestamp(),
        )
            .prop_map(
                |(id, category_id, name, description, cents, stock, created_at, updated_at)| {
                    #[allow(clippy::cast_precision_loss)]
                    let price = cents as f32 / 100.0;
                    Product {
                        id,
                        category_id,
                        name,
                        description,
                        price,
                        stock,
                        created_at,
                        updated_at,
                    }
                },
            )
    }
}

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use broker_mocks::InMemoryBroker;
pub use mocks::{FailingIdGenerator, FixedClock, SequentialIdGenerator, test_clock};
pub use store_mocks::{InMemoryCatalogStore, InMemoryInventoryStore};
