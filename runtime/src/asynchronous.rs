//! Strategy that emits historical rows on a worker task.
//!
//! The replication loop keeps flowing while a table is scanned. Live rows for
//! the table being bootstrapped are held back by `should_skip` and replayed, in
//! arrival order, right after the terminal marker, so downstream consumers see
//! every live change after the snapshot it may overwrite.
//!
//! ```text
//! start row ──► claim slot ──► spawn worker ─────────────► mark_completed
//!                                  │                           │
//! live rows (same table) ──► deferred                          │ replication
//!                                  │                           ▼
//!                                  └──────► complete row ──► join worker
//!                                                             push marker
//!                                                             replay deferred
//!                                                             start next queued
//! ```
//!
//! Held-back rows live in memory for the length of the bootstrap; the
//! `replication_rows_held_back` gauge tracks the buffer. Asking about the same
//! row twice holds it back once.
//!
//! A worker failure is reported by the next `should_skip` call, or the next
//! `work` call with a control row.

use cdc_bootstrap_core::bootstrapper::{BootstrapError, Bootstrapper, Result, dispatch};
use cdc_bootstrap_core::control::{ControlRow, ControlRowClassifier, RowClass};
use cdc_bootstrap_core::producer::Producer;
use cdc_bootstrap_core::replication::PositionTracker;
use cdc_bootstrap_core::row::RowMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

use crate::executor::{BootstrapContext, complete_marker};
use crate::lifecycle::Lifecycle;
use crate::metrics::{BootstrapMetrics, ReplicationMetrics};

type Worker = JoinHandle<Result<ControlRow>>;

#[derive(Default)]
struct AsyncState {
    lifecycle: Lifecycle,
    worker: Option<Worker>,
    deferred: HeldBack,
}

/// Live rows waiting for the terminal marker, in arrival order.
#[derive(Default)]
struct HeldBack {
    rows: Vec<RowMap>,
    seen: HashSet<String>,
}

impl HeldBack {
    /// Buffer `row` unless an identical row is already held.
    fn hold(&mut self, row: &RowMap) -> bool {
        let fresh = match row.to_json() {
            Ok(rendered) => self.seen.insert(rendered),
            Err(_) => !self.rows.contains(row),
        };
        if fresh {
            self.rows.push(row.clone());
        }
        fresh
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn clear(&mut self) {
        self.rows.clear();
        self.seen.clear();
        ReplicationMetrics::record_held_back(0);
    }
}

/// Background bootstrap strategy.
///
/// Must be used from within a tokio runtime.
pub struct AsynchronousBootstrapper {
    classifier: ControlRowClassifier,
    context: Arc<BootstrapContext>,
    state: Mutex<AsyncState>,
}

impl AsynchronousBootstrapper {
    /// Create an asynchronous bootstrapper for `control_database`.
    #[must_use]
    pub fn new(control_database: impl Into<String>, context: BootstrapContext) -> Self {
        Self {
            classifier: ControlRowClassifier::new(control_database),
            context: Arc::new(context),
            state: Mutex::new(AsyncState::default()),
        }
    }

    /// Number of start requests waiting for the running bootstrap.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.state().lifecycle.queued()
    }

    /// Number of live rows currently held back.
    #[must_use]
    pub fn deferred(&self) -> usize {
        self.state().deferred.len()
    }

    fn state(&self) -> MutexGuard<'_, AsyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report a worker that finished with an error.
    ///
    /// The slot is released and held-back rows are dropped; the control row stays
    /// Running so the next process resumes it.
    async fn surface_failure(&self) -> Result<()> {
        let finished = {
            let mut state = self.state();
            if state.worker.as_ref().is_some_and(JoinHandle::is_finished) {
                state.worker.take()
            } else {
                None
            }
        };
        let Some(worker) = finished else {
            return Ok(());
        };
        self.settle(worker).await.map(|_| ())
    }

    /// Await `worker`, releasing the slot if it failed.
    async fn settle(&self, worker: Worker) -> Result<Option<ControlRow>> {
        let error = match worker.await {
            Ok(Ok(completed)) => return Ok(Some(completed)),
            Ok(Err(e)) => e,
            Err(join) => {
                tracing::error!(error = %join, "Bootstrap worker died");
                BootstrapError::Worker(join.to_string())
            }
        };

        let dropped = {
            let mut state = self.state();
            let active = state.lifecycle.release_any();
            state.deferred.clear();
            active
        };
        if let Some(active) = dropped {
            tracing::error!(
                id = %active.request.id,
                database = %active.request.database_name,
                table = %active.request.table_name,
                error = %error,
                "Bootstrap failed, request left running for resume"
            );
        }
        BootstrapMetrics::record_running(false);
        Err(error)
    }

    /// Claim the slot and spawn a worker, or queue `request`.
    fn run(&self, request: ControlRow, producer: &Arc<dyn Producer>, position: &dyn PositionTracker) {
        let captured = position.current();
        let mut state = self.state();
        if !state.lifecycle.claim(&request, captured.clone()) {
            tracing::warn!(
                id = %request.id,
                database = %request.database_name,
                table = %request.table_name,
                "Bootstrap already running, request queued"
            );
            return;
        }
        BootstrapMetrics::record_running(true);

        let context = Arc::clone(&self.context);
        let producer = Arc::clone(producer);
        state.worker = Some(tokio::spawn(async move {
            context.execute(&request, producer.as_ref(), captured).await
        }));
    }

    /// Start the oldest queued request that still needs to run.
    async fn start_next(&self, producer: &Arc<dyn Producer>, position: &dyn PositionTracker) -> Result<()> {
        loop {
            let next = self.state().lifecycle.next_queued();
            let Some(next) = next else {
                return Ok(());
            };
            if let Some(persisted) = self.context.still_pending_work(next.id).await? {
                self.run(persisted, producer, position);
                return Ok(());
            }
            tracing::debug!(id = %next.id, "Queued bootstrap already complete, dropping");
        }
    }

    async fn replay(&self, producer: &Arc<dyn Producer>, rows: &[RowMap]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        tracing::info!(rows = rows.len(), "Replaying rows held back during bootstrap");
        for row in rows {
            producer.push(row).await?;
        }
        Ok(())
    }
}

impl Bootstrapper for AsynchronousBootstrapper {
    fn classifier(&self) -> &ControlRowClassifier {
        &self.classifier
    }

    async fn should_skip(&self, row: &RowMap) -> Result<bool> {
        self.surface_failure().await?;

        if self.classifier.is_start_bootstrap_row(row) {
            let request = self.classifier.decode(row)?;
            let known = self.state().lifecycle.is_known(request.id);
            if known {
                return Ok(true);
            }
            return self.context.is_stale_request(request.id).await;
        }

        if self.classifier.is_bootstrap_row(row) {
            return Ok(false);
        }

        let mut state = self.state();
        if !state.lifecycle.targets(row) {
            return Ok(false);
        }
        if state.deferred.hold(row) {
            ReplicationMetrics::record_deferred_row();
            ReplicationMetrics::record_held_back(state.deferred.len());
            tracing::trace!(row = %row, "Holding back live row until bootstrap completes");
        }
        Ok(true)
    }

    async fn start_bootstrap(
        &self,
        row: &RowMap,
        producer: &Arc<dyn Producer>,
        position: &dyn PositionTracker,
    ) -> Result<()> {
        let request = self.classifier.decode(row)?;
        self.run(request, producer, position);
        Ok(())
    }

    async fn complete_bootstrap(
        &self,
        row: &RowMap,
        producer: &Arc<dyn Producer>,
        position: &dyn PositionTracker,
    ) -> Result<()> {
        let completed = self.classifier.decode(row)?;

        let (finished, began_at, worker) = {
            let mut state = self.state();
            let began_at = state.lifecycle.position_of(completed.id);
            let worker = if began_at.is_some() { state.worker.take() } else { None };
            (state.lifecycle.is_finished(completed.id), began_at, worker)
        };
        if let Some(worker) = worker {
            self.settle(worker).await?;
        }

        if finished {
            tracing::debug!(id = %completed.id, "Terminal marker already emitted");
        } else {
            let marker_position = began_at.clone().unwrap_or_else(|| position.current());
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

        if began_at.is_none() {
            self.state().lifecycle.mark_finished(completed.id);
            return Ok(());
        }

        let held_back = self.state().deferred.rows.clone();
        self.replay(producer, &held_back).await?;

        {
            let mut state = self.state();
            state.lifecycle.mark_finished(completed.id);
            state.lifecycle.release(completed.id);
            state.deferred.clear();
        }
        BootstrapMetrics::record_running(false);
        self.start_next(producer, position).await
    }

    async fn resume(&self, producer: &Arc<dyn Producer>, position: &dyn PositionTracker) -> Result<()> {
        let running = self.context.store().find_running().await?;
        if running.is_empty() {
            return Ok(());
        }
        tracing::info!(count = running.len(), "Resuming interrupted bootstraps");
        for request in running {
            self.run(request, producer, position);
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.state().lifecycle.is_running()
    }

    async fn work(
        &self,
        row: &RowMap,
        producer: &Arc<dyn Producer>,
        position: &dyn PositionTracker,
    ) -> Result<()> {
        if self.classifier.classify(row) == RowClass::NotBootstrap {
            return Ok(());
        }
        self.surface_failure().await?;
        dispatch(self, row, producer, position).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use cdc_bootstrap_core::control::BootstrapRequest;
    use cdc_bootstrap_core::control_store::ControlStore;
    use cdc_bootstrap_core::replication::TrackedPosition;
    use cdc_bootstrap_testing::helpers::live_row;
    use cdc_bootstrap_testing::{InMemoryControlStore, InMemoryRowSource, RecordingProducer, test_clock};

    #[tokio::test]
    async fn other_tables_are_not_deferred() {
        let store = InMemoryControlStore::new("maxwell");
        let context = BootstrapContext::new(
            Arc::new(store.clone()),
            Arc::new(InMemoryRowSource::new().with_numbered_rows("shop", "orders", 2)),
            Arc::new(test_clock()),
        );
        let bootstrapper = AsynchronousBootstrapper::new("maxwell", context);
        let producer: Arc<dyn Producer> = Arc::new(RecordingProducer::new());
        let request = store.request(BootstrapRequest::new("shop", "orders")).await.unwrap();

        bootstrapper.run(request, &producer, &TrackedPosition::default());

        assert!(bootstrapper.should_skip(&live_row("shop", "orders", 9)).await.unwrap());
        assert!(!bootstrapper.should_skip(&live_row("shop", "customers", 9)).await.unwrap());
        assert_eq!(bootstrapper.deferred(), 1);
        assert!(bootstrapper.is_running());
    }

    #[test]
    fn identical_rows_are_held_once() {
        let mut held = HeldBack::default();
        let row = live_row("shop", "orders", 1);

        assert!(held.hold(&row));
        assert!(!held.hold(&row));
        assert!(held.hold(&live_row("shop", "orders", 2)));
        assert_eq!(held.len(), 2);

        held.clear();
        assert!(held.hold(&row));
    }
}
