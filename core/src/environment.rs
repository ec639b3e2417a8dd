//! Environment traits injected into the service and the ID generator.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
///
/// Outbox buckets, `created_at` stamps and snowflake timestamps all read the
/// clock, so tests can pin a day boundary without sleeping.
///
/// # Examples
///
/// ```
/// use catalog_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let _now = clock.now();
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
