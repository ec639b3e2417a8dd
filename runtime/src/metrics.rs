//! Prometheus metrics for the outbox pipeline.
//!
//! This module provides metric collection for:
//! - Outbox polling and publishing
//! - Inventory event consumption
//!
//! # Example
//!
//! ```rust,no_run
//! use catalog_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Serve metrics on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the recorder and start serving `/metrics`.
    ///
    /// Must be called from within a Tokio runtime; the HTTP listener runs as
    /// a spawned task.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), the call
    /// logs a warning and leaves the existing recorder in place.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        if let Err(e) = metrics::set_global_recorder(recorder) {
            tracing::warn!(error = %e, "Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        let addr = self.addr;
        tokio::spawn(async move {
            // `ExporterError` implements neither `Debug` nor `Display`.
            if exporter.await.is_err() {
                tracing::error!(%addr, "Metrics exporter stopped");
            }
        });

        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        self.handle = Some(handle);
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Outbox
    describe_counter!(
        "outbox_events_published_total",
        "Outbox events acknowledged by the broker and removed from the outbox"
    );
    describe_counter!(
        "outbox_events_failed_total",
        "Outbox events whose publish or delete failed (left for the next tick)"
    );
    describe_counter!(
        "outbox_poll_errors_total",
        "Poll ticks that could not scan the outbox"
    );
    describe_histogram!(
        "outbox_publish_duration_seconds",
        "Time from send to broker acknowledgment"
    );

    // Inventory consumer
    describe_counter!(
        "inventory_events_applied_total",
        "Product events applied to the inventory read model and acked"
    );
    describe_counter!(
        "inventory_events_nacked_total",
        "Product events that failed to apply and were returned for redelivery"
    );
    describe_counter!(
        "inventory_events_rejected_total",
        "Malformed product events skipped without being applied"
    );
    describe_counter!(
        "inventory_receive_errors_total",
        "Failed broker receive attempts"
    );
}

/// Outbox poller and publisher metrics recorder.
pub struct OutboxMetrics;

impl OutboxMetrics {
    /// Record an event published and removed from the outbox.
    pub fn record_published(duration: Duration) {
        counter!("outbox_events_published_total").increment(1);
        histogram!("outbox_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record an event left in the outbox after a failure.
    pub fn record_failed() {
        counter!("outbox_events_failed_total").increment(1);
    }

    /// Record a failed outbox scan.
    pub fn record_poll_error() {
        counter!("outbox_poll_errors_total").increment(1);
    }
}

/// Inventory consumer metrics recorder.
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record an applied and acked message.
    pub fn record_applied() {
        counter!("inventory_events_applied_total").increment(1);
    }

    /// Record a nacked message.
    pub fn record_nacked() {
        counter!("inventory_events_nacked_total").increment(1);
    }

    /// Record a malformed message that was skipped.
    pub fn record_rejected() {
        counter!("inventory_events_rejected_total").increment(1);
    }

    /// Record a failed receive.
    pub fn record_receive_error() {
        counter!("inventory_receive_errors_total").increment(1);
    }
}
