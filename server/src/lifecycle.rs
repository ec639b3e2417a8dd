//! Application lifecycle management and graceful shutdown.
//!
//! The `Application` owns the product service and the two background tasks
//! that keep the read model in step with the catalog:
//!
//! 1. **Startup**: connect stores, run migrations, build broker clients
//! 2. **Runtime**: outbox poller and inventory consumer run until a signal
//! 3. **Shutdown**: signal both tasks, wait for them with a bounded timeout
//!
//! # Graceful Shutdown
//!
//! When a shutdown signal is received (Ctrl+C or SIGTERM):
//! 1. Shutdown is broadcast to the poller and the consumer
//! 2. The poller finishes the event in hand; the consumer its current message
//! 3. Both tasks share one `SHUTDOWN_TIMEOUT` deadline; any still running
//!    after it are abandoned
//!
//! Anything not yet published stays in the outbox for the next start.

use crate::config::Config;
use anyhow::Context;
use catalog_core::broker::{MessagePublisher, MessageSubscriber};
use catalog_core::environment::{Clock, SystemClock};
use catalog_core::handler::EventHandler;
use catalog_core::id::{IdGenerator, SnowflakeIdGenerator};
use catalog_core::store::{CatalogStore, InventoryStore, OutboxStore};
use catalog_postgres::PostgresCatalogStore;
use catalog_projections::{InventoryProjection, PostgresInventoryStore};
use catalog_redpanda::{RedpandaPublisher, RedpandaSubscriber};
use catalog_runtime::{EventConsumer, OutboxPoller, OutboxPublisher, ProductService, shutdown};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

/// Fully wired catalog process.
///
/// # Example
///
/// ```rust,ignore
/// let app = Application::build(Config::from_env()).await?;
/// let service = app.service();
/// app.run().await;
/// ```
pub struct Application {
    service: ProductService,
    poller: OutboxPoller,
    consumer: EventConsumer,
    shutdown_timeout: Duration,
}

impl Application {
    /// Connect to Postgres and the broker and wire every component.
    ///
    /// # Errors
    ///
    /// Returns an error if a database connection, a migration or a broker
    /// client cannot be set up.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let catalog = PostgresCatalogStore::connect(
            &config.postgres.url,
            config.postgres.max_connections,
            config.connect_timeout(),
        )
        .await
        .context("connecting to the catalog database")?;
        catalog
            .migrate()
            .await
            .context("migrating the catalog database")?;
        let catalog = Arc::new(catalog);

        let inventory = PostgresInventoryStore::new_with_separate_db(
            &config.inventory_url,
            config.postgres.max_connections,
        )
        .await
        .context("connecting to the inventory database")?;
        inventory
            .migrate()
            .await
            .context("migrating the inventory database")?;
        let inventory: Arc<dyn InventoryStore> = Arc::new(inventory);

        let publisher = RedpandaPublisher::builder()
            .brokers(&config.redpanda.brokers)
            .topic(&config.redpanda.product_topic)
            .producer_acks(&config.redpanda.acks)
            .timeout(config.send_timeout())
            .build()
            .context("creating the product event producer")?;
        let subscriber = RedpandaSubscriber::builder()
            .brokers(&config.redpanda.brokers)
            .topic(&config.redpanda.product_topic)
            .consumer_group(&config.redpanda.consumer_group)
            .build()
            .context("subscribing to the product topic")?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ids: Arc<dyn IdGenerator> = Arc::new(
            SnowflakeIdGenerator::new(config.node_id, clock.clone())
                .context("creating the id generator")?,
        );

        info!(
            topic = %config.redpanda.product_topic,
            consumer_group = %config.redpanda.consumer_group,
            node_id = config.node_id,
            "Catalog components connected"
        );

        Ok(Self::from_parts(
            &config,
            Parts {
                catalog: catalog.clone(),
                outbox: catalog,
                ids,
                clock,
                publisher: Arc::new(publisher),
                subscriber: Arc::new(subscriber),
                handler: Arc::new(InventoryProjection::new(inventory)),
            },
        ))
    }

    /// Wire an application from already-built components.
    #[must_use]
    pub fn from_parts(config: &Config, parts: Parts) -> Self {
        let service = ProductService::new(parts.catalog, parts.ids, parts.clock);
        let publisher = OutboxPublisher::new(parts.publisher, parts.outbox.clone())
            .with_timeout(config.publish_timeout());
        let poller =
            OutboxPoller::new(parts.outbox, publisher).with_interval(config.poll_interval());
        let consumer = EventConsumer::new(parts.subscriber, parts.handler);

        Self {
            service,
            poller,
            consumer,
            shutdown_timeout: config.shutdown_timeout(),
        }
    }

    /// Handle to the product service for the transport layer.
    #[must_use]
    pub fn service(&self) -> ProductService {
        self.service.clone()
    }

    /// Run until Ctrl+C or SIGTERM, then shut down gracefully.
    pub async fn run(self) {
        self.run_until(shutdown_signal()).await;
    }

    /// Run until `signal` completes, then shut down gracefully.
    pub async fn run_until(self, signal: impl Future<Output = ()>) {
        let (trigger, shutdown) = shutdown::channel();

        info!("Starting outbox poller and inventory consumer");
        let poller = self.poller.spawn(trigger.subscribe());
        let consumer = self.consumer.spawn(shutdown);

        signal.await;
        info!("Shutdown requested, stopping background tasks");
        trigger.trigger();

        Self::await_shutdown(
            self.shutdown_timeout,
            [("outbox_poller", poller), ("inventory_consumer", consumer)],
        )
        .await;

        info!("Graceful shutdown complete");
    }

    /// Wait for every background task until one shared deadline `timeout`
    /// from now.
    async fn await_shutdown<const N: usize>(
        timeout: Duration,
        handles: [(&'static str, JoinHandle<()>); N],
    ) {
        let deadline = Instant::now() + timeout;
        for (task, handle) in handles {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => info!(task, "Task stopped gracefully"),
                Ok(Err(e)) => warn!(task, error = %e, "Task failed"),
                Err(_) => warn!(task, "Task shutdown timed out"),
            }
        }
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("poller", &self.poller)
            .field("consumer", &self.consumer)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

/// Components an [`Application`] is assembled from.
pub struct Parts {
    /// Catalog storage used by the product service
    pub catalog: Arc<dyn CatalogStore>,
    /// Outbox storage drained by the poller
    pub outbox: Arc<dyn OutboxStore>,
    /// Id source for products and outbox rows
    pub ids: Arc<dyn IdGenerator>,
    /// Time source for timestamps and buckets
    pub clock: Arc<dyn Clock>,
    /// Producer for the product topic
    pub publisher: Arc<dyn MessagePublisher>,
    /// Consumer for the product topic
    pub subscriber: Arc<dyn MessageSubscriber>,
    /// Read-model handler fed by the consumer
    pub handler: Arc<dyn EventHandler>,
}

impl std::fmt::Debug for Parts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parts").finish_non_exhaustive()
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use catalog_runtime::service::CreateProductRequest;
    use catalog_testing::{
        InMemoryBroker, InMemoryCatalogStore, InMemoryInventoryStore, SequentialIdGenerator,
        test_clock,
    };

    fn test_config() -> Config {
        Config::from_lookup(|key| match key {
            "OUTBOX_POLL_INTERVAL_MS" => Some("10".to_string()),
            "SHUTDOWN_TIMEOUT" => Some("1".to_string()),
            _ => None,
        })
    }

    #[tokio::test]
    async fn shutdown_timeout_bounds_all_tasks_together() {
        let stuck = || tokio::spawn(std::future::pending::<()>());
        let started = Instant::now();

        Application::await_shutdown(
            Duration::from_millis(100),
            [("first", stuck()), ("second", stuck()), ("third", stuck())],
        )
        .await;

        assert!(started.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn created_product_reaches_inventory_and_tasks_stop_on_signal() {
        let catalog = InMemoryCatalogStore::new();
        let inventory = InMemoryInventoryStore::new();
        let broker = InMemoryBroker::new();
        let app = Application::from_parts(
            &test_config(),
            Parts {
                catalog: Arc::new(catalog.clone()),
                outbox: Arc::new(catalog.clone()),
                ids: Arc::new(SequentialIdGenerator::starting_at(500)),
                clock: Arc::new(test_clock()),
                publisher: Arc::new(broker.clone()),
                subscriber: Arc::new(broker.clone()),
                handler: Arc::new(InventoryProjection::new(Arc::new(inventory.clone()))),
            },
        );

        let product = app
            .service()
            .create_product(CreateProductRequest {
                category_id: 1,
                name: "Lamp".to_string(),
                description: "Desk lamp".to_string(),
                price: 19.0,
                stock: 4,
            })
            .await
            .unwrap();

        let probe = inventory.clone();
        tokio::time::timeout(
            Duration::from_secs(5),
            app.run_until(async move {
                while probe.row(product.id).is_none() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }),
        )
        .await
        .unwrap();

        assert_eq!(inventory.row(product.id).unwrap().stock_count, 4);
        assert_eq!(catalog.outbox_len(), 0);
    }
}
