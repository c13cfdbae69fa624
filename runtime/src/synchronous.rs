//! Strategy that emits historical rows inline with the row stream.
//!
//! `start_bootstrap` does not return until every row of the table has been
//! pushed and the request marked Complete, so the replication loop is blocked
//! for the whole scan. The bootstrap stays running until the completion update
//! comes back through replication and `complete_bootstrap` pushes the terminal
//! marker.

use cdc_bootstrap_core::bootstrapper::{Bootstrapper, Result};
use cdc_bootstrap_core::control::{ControlRow, ControlRowClassifier};
use cdc_bootstrap_core::producer::Producer;
use cdc_bootstrap_core::replication::PositionTracker;
use cdc_bootstrap_core::row::RowMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::executor::{BootstrapContext, complete_marker};
use crate::lifecycle::Lifecycle;
use crate::metrics::BootstrapMetrics;

/// Inline bootstrap strategy.
///
/// # Example
///
/// ```ignore
/// let bootstrapper = SynchronousBootstrapper::new("maxwell", context);
///
/// // Blocks until the table has been emitted
/// bootstrapper.work(&start_row, &producer, &tracker).await?;
/// assert!(bootstrapper.is_running());
///
/// // The completion update arrives later through replication
/// bootstrapper.work(&complete_row, &producer, &tracker).await?;
/// assert!(!bootstrapper.is_running());
/// ```
pub struct SynchronousBootstrapper {
    classifier: ControlRowClassifier,
    context: BootstrapContext,
    lifecycle: Mutex<Lifecycle>,
}

impl SynchronousBootstrapper {
    /// Create a synchronous bootstrapper for `control_database`.
    #[must_use]
    pub fn new(control_database: impl Into<String>, context: BootstrapContext) -> Self {
        Self {
            classifier: ControlRowClassifier::new(control_database),
            context,
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Number of start requests waiting for the running bootstrap.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.lifecycle().queued()
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the slot and emit, or queue `request` behind the running bootstrap.
    async fn run(
        &self,
        request: ControlRow,
        producer: &Arc<dyn Producer>,
        position: &dyn PositionTracker,
    ) -> Result<()> {
        let captured = position.current();
        let claimed = self.lifecycle().claim(&request, captured.clone());
        if !claimed {
            tracing::warn!(
                id = %request.id,
                database = %request.database_name,
                table = %request.table_name,
                "Bootstrap already running, request queued"
            );
            return Ok(());
        }
        BootstrapMetrics::record_running(true);

        if let Err(e) = self.context.execute(&request, producer.as_ref(), captured).await {
            self.lifecycle().release(request.id);
            BootstrapMetrics::record_running(false);
            return Err(e);
        }
        Ok(())
    }

    /// Start the oldest queued request that still needs to run.
    async fn start_next(&self, producer: &Arc<dyn Producer>, position: &dyn PositionTracker) -> Result<()> {
        loop {
            let next = self.lifecycle().next_queued();
            let Some(next) = next else {
                return Ok(());
            };
            if let Some(persisted) = self.context.still_pending_work(next.id).await? {
                return self.run(persisted, producer, position).await;
            }
            tracing::debug!(id = %next.id, "Queued bootstrap already complete, dropping");
        }
    }
}

impl Bootstrapper for SynchronousBootstrapper {
    fn classifier(&self) -> &ControlRowClassifier {
        &self.classifier
    }

    async fn should_skip(&self, row: &RowMap) -> Result<bool> {
        if !self.classifier.is_start_bootstrap_row(row) {
            return Ok(false);
        }
        let request = self.classifier.decode(row)?;
        let known = self.lifecycle().is_known(request.id);
        if known {
            return Ok(true);
        }
        self.context.is_stale_request(request.id).await
    }

    async fn start_bootstrap(
        &self,
        row: &RowMap,
        producer: &Arc<dyn Producer>,
        position: &dyn PositionTracker,
    ) -> Result<()> {
        let request = self.classifier.decode(row)?;
        self.run(request, producer, position).await
    }

    async fn complete_bootstrap(
        &self,
        row: &RowMap,
        producer: &Arc<dyn Producer>,
        position: &dyn PositionTracker,
    ) -> Result<()> {
        let completed = self.classifier.decode(row)?;

        let (finished, began_at) = {
            let lifecycle = self.lifecycle();
            (
                lifecycle.is_finished(completed.id),
                lifecycle.position_of(completed.id),
            )
        };
        if finished {
            tracing::debug!(id = %completed.id, "Terminal marker already emitted");
        } else {
            let marker_position = began_at.unwrap_or_else(|| position.current());
            producer
                .push(&complete_marker(&completed, marker_position, self.context.now()))
                .await?;
            BootstrapMetrics::record_completed();
            tracing::info!(
                id = %completed.id,
                database = %completed.database_name,
                table = %completed.table_name,
                rows = completed.inserted_rows,
                "Bootstrap complete"
            );
        }

        let released = {
            let mut lifecycle = self.lifecycle();
            lifecycle.mark_finished(completed.id);
            lifecycle.release(completed.id).is_some()
        };
        if released {
            BootstrapMetrics::record_running(false);
            self.start_next(producer, position).await?;
        }
        Ok(())
    }

    async fn resume(&self, producer: &Arc<dyn Producer>, position: &dyn PositionTracker) -> Result<()> {
        let running = self.context.store().find_running().await?;
        if running.is_empty() {
            return Ok(());
        }
        tracing::info!(count = running.len(), "Resuming interrupted bootstraps");
        for request in running {
            self.run(request, producer, position).await?;
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.lifecycle().is_running()
    }
}
