//! Prometheus metrics for the bootstrap subsystem and the replication pipeline.
//!
//! Metrics are recorded through the `metrics` facade and are no-ops until a
//! recorder is installed, so library code records unconditionally.
//!
//! # Example
//!
//! ```rust,no_run
//! use cdc_bootstrap_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

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
/// Installs the Prometheus recorder and renders the scrape payload.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address the scrape endpoint is served on (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// A recorder can only be installed once per process. A second call (e.g.,
    /// from another test) logs a warning and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0, 900.0, 3600.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Bootstrap lifecycle
    describe_counter!(
        "bootstrap_started_total",
        "Total number of bootstraps that began emitting historical rows"
    );
    describe_counter!(
        "bootstrap_completed_total",
        "Total number of bootstraps that emitted their terminal marker"
    );
    describe_counter!(
        "bootstrap_failed_total",
        "Total number of bootstraps that failed during emission"
    );
    describe_counter!(
        "bootstrap_rows_emitted_total",
        "Total number of historical rows pushed to the producer"
    );
    describe_gauge!(
        "bootstrap_running",
        "Whether a bootstrap is currently running (0 or 1)"
    );
    describe_histogram!(
        "bootstrap_duration_seconds",
        "Time taken to emit a table's historical rows"
    );

    // Replication pipeline
    describe_counter!(
        "replication_rows_processed_total",
        "Total number of replicated rows processed by the pipeline"
    );
    describe_counter!(
        "replication_rows_deferred_total",
        "Total number of live rows held back while their table was bootstrapping"
    );
    describe_gauge!(
        "replication_rows_held_back",
        "Live rows currently buffered until the running bootstrap completes"
    );
    describe_counter!(
        "replication_checkpoints_saved_total",
        "Total number of replication positions committed"
    );
    describe_counter!(
        "replication_checkpoints_deferred_total",
        "Total number of position commits postponed by a running bootstrap"
    );
}

/// Bootstrap metrics recorder.
pub struct BootstrapMetrics;

impl BootstrapMetrics {
    /// Record a bootstrap beginning emission.
    pub fn record_started() {
        counter!("bootstrap_started_total").increment(1);
    }

    /// Record emitted historical rows.
    pub fn record_rows(count: u64) {
        counter!("bootstrap_rows_emitted_total").increment(count);
    }

    /// Record a finished emission.
    pub fn record_emission(duration: Duration) {
        histogram!("bootstrap_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a terminal marker emitted.
    pub fn record_completed() {
        counter!("bootstrap_completed_total").increment(1);
    }

    /// Record a failed emission.
    pub fn record_failed() {
        counter!("bootstrap_failed_total").increment(1);
    }

    /// Record whether a bootstrap is running.
    pub fn record_running(running: bool) {
        gauge!("bootstrap_running").set(if running { 1.0 } else { 0.0 });
    }
}

/// Replication pipeline metrics recorder.
pub struct ReplicationMetrics;

impl ReplicationMetrics {
    /// Record a processed row.
    pub fn record_row() {
        counter!("replication_rows_processed_total").increment(1);
    }

    /// Record a live row held back by a bootstrap.
    pub fn record_deferred_row() {
        counter!("replication_rows_deferred_total").increment(1);
    }

    /// Record the size of the held-back buffer.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_held_back(rows: usize) {
        gauge!("replication_rows_held_back").set(rows as f64);
    }

    /// Record a committed position.
    pub fn record_checkpoint() {
        counter!("replication_checkpoints_saved_total").increment(1);
    }

    /// Record a postponed position commit.
    pub fn record_deferred_checkpoint() {
        counter!("replication_checkpoints_deferred_total").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn test_bootstrap_metrics_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        BootstrapMetrics::record_started();
        BootstrapMetrics::record_rows(25);
        BootstrapMetrics::record_running(true);
        ReplicationMetrics::record_deferred_checkpoint();
        ReplicationMetrics::record_held_back(3);

        // Another test may have installed the recorder first; metrics are still
        // recorded, only this server has no handle.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("bootstrap_started_total"));
            assert!(rendered.contains("bootstrap_rows_emitted_total"));
            assert!(rendered.contains("replication_checkpoints_deferred_total"));
            assert!(rendered.contains("replication_rows_held_back"));
        }
    }
}
