//! Catalog server.
//!
//! Runs the product service's background half:
//! - Migrates the catalog and inventory schemas
//! - Drains the products outbox to the product topic
//! - Applies product events to the inventory read model
//! - Optionally exposes Prometheus metrics on `METRICS_ADDR`
//!
//! # Usage
//!
//! ```bash
//! # Start infrastructure
//! docker compose up -d
//!
//! # Run server
//! cargo run --bin catalog-server
//! ```

use catalog_runtime::metrics::MetricsServer;
use catalog_server::{Application, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.server.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        redpanda = %config.redpanda.brokers,
        topic = %config.redpanda.product_topic,
        poll_interval_ms = config.outbox.poll_interval_ms,
        "Configuration loaded"
    );

    let _metrics = match config.server.metrics_addr {
        Some(addr) => {
            let mut server = MetricsServer::new(addr);
            server.start()?;
            Some(server)
        }
        None => None,
    };

    let app = Application::build(config).await?;
    tracing::info!("Catalog server running, press Ctrl+C to shut down");

    app.run().await;
    Ok(())
}
