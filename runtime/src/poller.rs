//! Background task that drains the outbox on a fixed interval.
//!
//! Each tick lists the buckets that still hold events (oldest first), reads
//! each bucket in ascending id order and publishes its events one at a time.
//! A failed event is logged and skipped; it stays in the outbox and is tried
//! again next tick. A failed scan is logged and the loop waits for the next
//! tick.
//!
//! On shutdown the poller finishes the event in hand, abandons the rest of
//! the tick and exits.

use crate::metrics::OutboxMetrics;
use crate::publisher::{OutboxPublisher, PublishError};
use crate::shutdown::Shutdown;
use catalog_core::store::{OutboxStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default time between poll ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(4);

/// Outcome of one poll tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Events published and removed from the outbox
    pub published: usize,
    /// Events left in the outbox after a failure
    pub failed: usize,
    /// Whether shutdown cut the tick short
    pub interrupted: bool,
}

/// Periodic outbox drainer.
///
/// # Example
///
/// ```ignore
/// let poller = OutboxPoller::new(outbox.clone(), publisher)
///     .with_interval(Duration::from_secs(4));
/// let handle = poller.spawn(shutdown.clone());
///
/// // ... later
/// trigger.trigger();
/// handle.await?;
/// ```
pub struct OutboxPoller {
    outbox: Arc<dyn OutboxStore>,
    publisher: OutboxPublisher,
    interval: Duration,
}

impl OutboxPoller {
    /// Create a poller with the default interval.
    #[must_use]
    pub fn new(outbox: Arc<dyn OutboxStore>, publisher: OutboxPublisher) -> Self {
        Self {
            outbox,
            publisher,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the time between ticks.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run a single tick.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the outbox cannot be scanned. Per-event
    /// publish failures are counted in the report, not returned.
    pub async fn poll_once(&self, shutdown: &Shutdown) -> Result<TickReport, StoreError> {
        let mut report = TickReport::default();

        for bucket in self.outbox.pending_buckets().await? {
            let events = self.outbox.events_in_bucket(&bucket).await?;

            for event in events {
                if shutdown.is_triggered() {
                    report.interrupted = true;
                    return Ok(report);
                }

                match self.publisher.publish(&event, shutdown).await {
                    Ok(_) => report.published += 1,
                    Err(PublishError::Cancelled { event_id, reason }) => {
                        report.failed += 1;
                        OutboxMetrics::record_failed();
                        tracing::warn!(event_id, bucket = %bucket, reason, "Outbox publish cancelled");
                    }
                    Err(e) => {
                        report.failed += 1;
                        OutboxMetrics::record_failed();
                        tracing::error!(
                            event_id = event.id,
                            bucket = %bucket,
                            error = %e,
                            "Failed to publish outbox event"
                        );
                    }
                }
            }
        }

        Ok(report)
    }

    /// Spawn the poll loop as a background task.
    #[must_use]
    pub fn spawn(self, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Poll until shutdown is requested.
    pub async fn run(self, mut shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_ms = self.interval.as_millis(), "Outbox poller started");

        loop {
            tokio::select! {
                () = shutdown.triggered() => break,
                _ = ticker.tick() => {}
            }

            match self.poll_once(&shutdown).await {
                Ok(report) if report.published > 0 || report.failed > 0 => {
                    tracing::info!(
                        published = report.published,
                        failed = report.failed,
                        "Outbox tick complete"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    OutboxMetrics::record_poll_error();
                    tracing::error!(error = %e, "Outbox scan failed, retrying next tick");
                }
            }
        }

        tracing::info!("Outbox poller stopped");
    }
}

impl std::fmt::Debug for OutboxPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxPoller")
            .field("interval", &self.interval)
            .field("publisher", &self.publisher)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::shutdown;
    use catalog_core::event;
    use catalog_core::outbox::OutboxEvent;
    use catalog_testing::fixtures::product;
    use catalog_testing::{InMemoryBroker, InMemoryCatalogStore};

    fn poller(broker: &InMemoryBroker, store: &InMemoryCatalogStore) -> OutboxPoller {
        let publisher = OutboxPublisher::new(Arc::new(broker.clone()), Arc::new(store.clone()))
            .with_timeout(Duration::from_millis(100));
        OutboxPoller::new(Arc::new(store.clone()), publisher)
            .with_interval(Duration::from_millis(10))
    }

    fn seed(store: &InMemoryCatalogStore, id: u64, bucket: &str) {
        let product = product(1, id * 10);
        let mut event = OutboxEvent::product_created(id, &product, product.created_at).unwrap();
        event.bucket = bucket.to_string();
        store.seed_outbox(event);
    }

    fn published_product_ids(broker: &InMemoryBroker) -> Vec<u64> {
        broker
            .published()
            .iter()
            .map(|m| event::decode_product(&m.payload).unwrap().id)
            .collect()
    }

    #[tokio::test]
    async fn drains_a_bucket_in_id_order() {
        let broker = InMemoryBroker::new();
        let store = InMemoryCatalogStore::new();
        for id in [5, 2, 9] {
            seed(&store, id, "2025-01-01");
        }
        let (_trigger, shutdown) = shutdown::channel();

        let report = poller(&broker, &store).poll_once(&shutdown).await.unwrap();

        assert_eq!(report.published, 3);
        assert_eq!(published_product_ids(&broker), vec![20, 50, 90]);
        assert_eq!(store.outbox_len(), 0);
    }

    #[tokio::test]
    async fn yesterdays_bucket_is_drained_first() {
        let broker = InMemoryBroker::new();
        let store = InMemoryCatalogStore::new();
        seed(&store, 1, "2025-01-02");
        seed(&store, 2, "2025-01-01");
        let (_trigger, shutdown) = shutdown::channel();

        poller(&broker, &store).poll_once(&shutdown).await.unwrap();

        assert_eq!(published_product_ids(&broker), vec![20, 10]);
    }

    #[tokio::test]
    async fn one_failed_event_does_not_stop_the_tick() {
        let broker = InMemoryBroker::new();
        let store = InMemoryCatalogStore::new();
        for id in [1, 2, 3] {
            seed(&store, id, "2025-01-01");
        }
        broker.fail_next_sends(1);
        let (_trigger, shutdown) = shutdown::channel();

        let report = poller(&broker, &store).poll_once(&shutdown).await.unwrap();

        assert_eq!(report.published, 2);
        assert_eq!(report.failed, 1);
        let left: Vec<u64> = store.outbox_events().iter().map(|e| e.id).collect();
        assert_eq!(left, vec![1]);
    }

    #[tokio::test]
    async fn scan_failure_is_an_error_for_the_tick() {
        let broker = InMemoryBroker::new();
        let store = InMemoryCatalogStore::new();
        store.fail_scans(true);
        let (_trigger, shutdown) = shutdown::channel();

        let result = poller(&broker, &store).poll_once(&shutdown).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn shutdown_abandons_the_rest_of_the_tick() {
        let broker = InMemoryBroker::new();
        let store = InMemoryCatalogStore::new();
        seed(&store, 1, "2025-01-01");
        let (trigger, shutdown) = shutdown::channel();
        trigger.trigger();

        let report = poller(&broker, &store).poll_once(&shutdown).await.unwrap();

        assert!(report.interrupted);
        assert_eq!(broker.published_count(), 0);
        assert_eq!(store.outbox_len(), 1);
    }

    #[tokio::test]
    async fn run_loop_keeps_going_after_scan_errors_and_stops_on_shutdown() {
        let broker = InMemoryBroker::new();
        let store = InMemoryCatalogStore::new();
        store.fail_scans(true);
        seed(&store, 1, "2025-01-01");
        let (trigger, shutdown) = shutdown::channel();

        let handle = poller(&broker, &store).spawn(shutdown);
        tokio::time::sleep(Duration::from_millis(30)).await;
        store.fail_scans(false);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.outbox_len(), 0);
        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
