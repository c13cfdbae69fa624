//! Reference replication loop around a [`Bootstrapper`].
//!
//! # Overview
//!
//! The `ReplicationPipeline` drives one row stream:
//! - Restores the committed position and resumes interrupted bootstraps
//! - Routes control rows to the bootstrapper
//! - Forwards every other row to the producer unless the bootstrapper holds it
//!   back
//! - Commits its position periodically, but never while a bootstrap is running
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │  Row stream  │ (binlog / WAL reader)
//! └──────┬───────┘
//!        │ rows
//!        ▼
//! ┌───────────────────┐      control rows      ┌──────────────┐
//! │ReplicationPipeline│ ─────────────────────► │ Bootstrapper │
//! └────┬─────────┬────┘                        └──────┬───────┘
//!      │ live    │ position                           │ bootstrap-*
//!      ▼         ▼                                    ▼
//! ┌────────┐ ┌─────────────┐                    ┌──────────┐
//! │Producer│ │PositionStore│                    │ Producer │
//! └────────┘ └─────────────┘                    └──────────┘
//! ```
//!
//! # Checkpoints
//!
//! Holding the committed position back while a bootstrap runs means a crash
//! mid-bootstrap rewinds the stream to before the start row. The replayed start
//! row is skipped (the request is no longer Pending), `resume` redoes the scan
//! and any live rows held back by the asynchronous strategy are replayed by the
//! stream itself.

use cdc_bootstrap_core::bootstrapper::{BootstrapError, Bootstrapper};
use cdc_bootstrap_core::config::PipelineConfig;
use cdc_bootstrap_core::producer::{Producer, ProducerError};
use cdc_bootstrap_core::replication::{
    Position, PositionStore, PositionTracker, ReplicationError, RowStream, TrackedPosition,
};
use cdc_bootstrap_core::row::RowMap;
use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

use crate::metrics::ReplicationMetrics;

/// Errors that stop the pipeline.
///
/// Every error is fatal: the pipeline returns and the process is expected to
/// restart from the committed position.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The bootstrapper failed.
    #[error("Bootstrap error: {0}")]
    Bootstrap(#[from] BootstrapError),

    /// A live row could not be delivered.
    #[error("Delivery error: {0}")]
    Delivery(#[from] ProducerError),

    /// The row stream or the position store failed.
    #[error("Replication error: {0}")]
    Replication(#[from] ReplicationError),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Drives a row stream through a bootstrapper into a producer.
///
/// # Example
///
/// ```ignore
/// let (mut pipeline, shutdown) = ReplicationPipeline::new(
///     AnyBootstrapper::from_config(&bootstrap_config, store, source, Arc::new(SystemClock)),
///     producer,
///     position_store,
///     &PipelineConfig::from_env()?,
/// );
///
/// tokio::spawn(async move {
///     tokio::signal::ctrl_c().await.ok();
///     shutdown.send(true).ok();
/// });
///
/// let from = pipeline.committed_position().await?;
/// pipeline.run(open_binlog_stream(from)).await?;
/// ```
pub struct ReplicationPipeline<B>
where
    B: Bootstrapper,
{
    bootstrapper: Arc<B>,
    producer: Arc<dyn Producer>,
    positions: Arc<dyn PositionStore>,
    tracker: Arc<TrackedPosition>,
    client_id: String,
    /// Commit the position every N rows
    checkpoint_interval: u64,
    /// Rows processed since the last commit
    uncommitted: u64,
    shutdown: watch::Receiver<bool>,
}

impl<B> ReplicationPipeline<B>
where
    B: Bootstrapper,
{
    /// Create a pipeline.
    ///
    /// Returns the pipeline and a shutdown sender. Send `true` to stop it after
    /// the row in flight.
    #[must_use]
    pub fn new(
        bootstrapper: B,
        producer: Arc<dyn Producer>,
        positions: Arc<dyn PositionStore>,
        config: &PipelineConfig,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pipeline = Self {
            bootstrapper: Arc::new(bootstrapper),
            producer,
            positions,
            tracker: Arc::new(TrackedPosition::default()),
            client_id: config.client_id.clone(),
            checkpoint_interval: config.checkpoint_interval.max(1),
            uncommitted: 0,
            shutdown: shutdown_rx,
        };

        (pipeline, shutdown_tx)
    }

    /// The bootstrapper driven by this pipeline.
    #[must_use]
    pub const fn bootstrapper(&self) -> &Arc<B> {
        &self.bootstrapper
    }

    /// Handle onto the live replication position.
    #[must_use]
    pub fn tracker(&self) -> Arc<TrackedPosition> {
        Arc::clone(&self.tracker)
    }

    /// Load the committed position and seed the tracker with it.
    ///
    /// The caller opens the row stream from this position.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Replication`] if the position cannot be loaded.
    pub async fn committed_position(&self) -> Result<Option<Position>> {
        let committed = self.positions.load_position(&self.client_id).await?;
        match &committed {
            Some(position) => {
                tracing::info!(client_id = %self.client_id, position = %position, "Resuming from committed position");
                self.tracker.advance(position.clone());
            }
            None => {
                tracing::info!(client_id = %self.client_id, "No committed position, starting fresh");
            }
        }
        Ok(committed)
    }

    /// Process `rows` until the stream ends or a shutdown signal arrives.
    ///
    /// Interrupted bootstraps are resumed before the first row is read.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] on the first failure of the stream, the
    /// bootstrapper, the producer or the position store.
    pub async fn run(&mut self, mut rows: RowStream) -> Result<()> {
        tracing::info!(client_id = %self.client_id, "Starting replication pipeline");

        self.bootstrapper
            .resume(&self.producer, self.tracker.as_ref())
            .await?;

        let mut shutdown_open = true;
        while !*self.shutdown.borrow() {
            tokio::select! {
                item = rows.next() => match item {
                    Some(Ok(row)) => self.process_row(row).await?,
                    Some(Err(e)) => {
                        tracing::error!(client_id = %self.client_id, error = %e, "Replication stream failed");
                        return Err(e.into());
                    }
                    None => {
                        tracing::info!(client_id = %self.client_id, "Replication stream ended");
                        break;
                    }
                },

                changed = self.shutdown.changed(), if shutdown_open => {
                    if changed.is_err() {
                        shutdown_open = false;
                    } else if *self.shutdown.borrow() {
                        tracing::info!(client_id = %self.client_id, "Shutdown signal received");
                        break;
                    }
                }
            }
        }

        if self.uncommitted > 0 && !self.bootstrapper.is_running() {
            self.commit().await?;
        }
        tracing::info!(client_id = %self.client_id, "Replication pipeline stopped");
        Ok(())
    }

    async fn process_row(&mut self, row: RowMap) -> Result<()> {
        if let Some(position) = row.position() {
            self.tracker.advance(position.clone());
        }

        if self.bootstrapper.classifier().is_bootstrap_row(&row) {
            self.bootstrapper
                .work(&row, &self.producer, self.tracker.as_ref())
                .await?;
        } else if self.bootstrapper.should_skip(&row).await? {
            tracing::trace!(row = %row, "Row held back by bootstrapper");
        } else {
            self.producer.push(&row).await?;
        }

        ReplicationMetrics::record_row();
        self.uncommitted += 1;

        if self.uncommitted >= self.checkpoint_interval {
            if self.bootstrapper.is_running() {
                ReplicationMetrics::record_deferred_checkpoint();
                tracing::debug!(
                    client_id = %self.client_id,
                    uncommitted = self.uncommitted,
                    "Bootstrap running, deferring checkpoint"
                );
            } else {
                self.commit().await?;
            }
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let Some(position) = self.tracker.current() else {
            return Ok(());
        };
        self.positions
            .save_position(&self.client_id, position.clone())
            .await?;
        ReplicationMetrics::record_checkpoint();
        tracing::debug!(client_id = %self.client_id, position = %position, "Checkpoint saved");
        self.uncommitted = 0;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::noop::NoOpBootstrapper;
    use cdc_bootstrap_testing::helpers::{at, live_row};
    use cdc_bootstrap_testing::{InMemoryPositionStore, RecordingProducer, ReplicationFeed};

    fn pipeline(
        producer: &RecordingProducer,
        positions: &InMemoryPositionStore,
        interval: u64,
    ) -> (ReplicationPipeline<NoOpBootstrapper>, watch::Sender<bool>) {
        ReplicationPipeline::new(
            NoOpBootstrapper::new("maxwell"),
            Arc::new(producer.clone()),
            Arc::new(positions.clone()),
            &PipelineConfig {
                client_id: "test".to_string(),
                checkpoint_interval: interval,
            },
        )
    }

    #[tokio::test]
    async fn forwards_rows_and_commits_every_interval() {
        let producer = RecordingProducer::new();
        let positions = InMemoryPositionStore::new();
        let (mut pipeline, _shutdown) = pipeline(&producer, &positions, 2);
        let (feed, rows) = ReplicationFeed::channel();
        for offset in 1..=5 {
            feed.send(at(live_row("shop", "orders", 1), "binlog.000001", offset));
        }
        drop(feed);

        pipeline.run(rows).await.unwrap();

        assert_eq!(producer.len(), 5);
        let saved: Vec<u64> = positions.saves().into_iter().map(|(_, p)| p.offset).collect();
        // Two interval commits plus the final flush
        assert_eq!(saved, vec![2, 4, 5]);
    }

    #[tokio::test]
    async fn stream_errors_are_fatal() {
        let producer = RecordingProducer::new();
        let positions = InMemoryPositionStore::new();
        let (mut pipeline, _shutdown) = pipeline(&producer, &positions, 10);
        let (feed, rows) = ReplicationFeed::channel();
        feed.fail("connection reset");

        let err = pipeline.run(rows).await.unwrap_err();
        assert!(matches!(err, PipelineError::Replication(_)));
    }

    #[tokio::test]
    async fn committed_position_seeds_the_tracker() {
        let producer = RecordingProducer::new();
        let positions =
            InMemoryPositionStore::new().with_position("test", Position::new("binlog.000009", 4));
        let (pipeline, _shutdown) = pipeline(&producer, &positions, 10);

        let committed = pipeline.committed_position().await.unwrap();

        assert_eq!(committed, Some(Position::new("binlog.000009", 4)));
        assert_eq!(pipeline.tracker().current(), committed);
    }

    #[tokio::test]
    async fn shutdown_stops_an_idle_pipeline() {
        let producer = RecordingProducer::new();
        let positions = InMemoryPositionStore::new();
        let (mut pipeline, shutdown) = pipeline(&producer, &positions, 10);
        let (_feed, rows) = ReplicationFeed::channel();

        let handle = tokio::spawn(async move { pipeline.run(rows).await });
        shutdown.send(true).unwrap();

        handle.await.unwrap().unwrap();
        assert!(positions.saves().is_empty());
    }
}
