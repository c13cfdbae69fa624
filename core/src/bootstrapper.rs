//! The bootstrapper contract.
//!
//! A [`Bootstrapper`] owns the bootstrap lifecycle for one replication process. The
//! replication loop hands it every replicated row through [`Bootstrapper::work`];
//! the bootstrapper recognises control rows and drives them through
//! `Pending → Running → Complete`:
//!
//! ```text
//!  replicated row
//!        │
//!        ▼
//!  ┌──────────────┐  not a control row   ┌──────────────┐
//!  │   classify   │ ───────────────────► │    no-op     │  (caller forwards it)
//!  └──────┬───────┘                      └──────────────┘
//!         │
//!   ┌─────┼────────────────┬───────────────────┐
//!   │ start-shaped         │ complete-shaped   │ anything else
//!   ▼                      ▼                   ▼
//! should_skip? ──no──► start_bootstrap   complete_bootstrap   ignored
//!   │ yes                 (historical       (terminal marker,
//!   ▼                      emission)          running flag off)
//! ignored
//! ```
//!
//! Exactly one strategy is active per process. Strategies are tagged variants
//! chosen at construction time (see `AnyBootstrapper` in `cdc-bootstrap-runtime`):
//! disabled, synchronous (emission inline with the row stream) and asynchronous
//! (emission on a worker task).
//!
//! # Errors
//!
//! Every operation returns a [`BootstrapError`]. Nothing is swallowed: the
//! replication loop decides whether an error halts the process. A failed
//! emission leaves the control row Running so [`Bootstrapper::resume`] can redo
//! it after a restart.

use crate::control::{ControlRowClassifier, ControlRowError, RowClass};
use crate::control_store::ControlStoreError;
use crate::producer::{Producer, ProducerError};
use crate::replication::PositionTracker;
use crate::row::RowMap;
use crate::row_source::ScanError;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by bootstrap operations.
#[derive(Error, Debug, Clone)]
pub enum BootstrapError {
    /// A control row could not be decoded.
    #[error("Invalid control row: {0}")]
    InvalidControlRow(#[from] ControlRowError),

    /// Reading or writing control-table state failed.
    #[error("Control table error: {0}")]
    Persistence(#[from] ControlStoreError),

    /// Reading the table being bootstrapped failed.
    #[error("Historical scan failed: {0}")]
    Scan(#[from] ScanError),

    /// The producer rejected an emitted row.
    #[error("Delivery failed: {0}")]
    Delivery(#[from] ProducerError),

    /// A background bootstrap worker failed or died.
    #[error("Bootstrap worker failed: {0}")]
    Worker(String),
}

impl BootstrapError {
    /// Whether the failure came from storage (control table or scanned table).
    #[must_use]
    pub const fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Scan(_))
    }

    /// Whether the failure came from the producer.
    #[must_use]
    pub const fn is_delivery(&self) -> bool {
        matches!(self, Self::Delivery(_))
    }
}

/// Result type for bootstrap operations.
pub type Result<T> = std::result::Result<T, BootstrapError>;

/// Bootstrap lifecycle driver.
///
/// # Thread Safety
///
/// Implementations are `Send + Sync` and take `&self`; running state lives behind
/// interior mutability so the replication loop and worker tasks can share one
/// instance.
///
/// # Example
///
/// ```ignore
/// // Inside the replication loop
/// if bootstrapper.classifier().is_bootstrap_row(&row) {
///     bootstrapper.work(&row, &producer, &tracker).await?;
/// } else if !bootstrapper.should_skip(&row).await? {
///     producer.push(&row).await?;
/// }
/// ```
pub trait Bootstrapper: Send + Sync {
    /// Classifier configured with this process's control database.
    fn classifier(&self) -> &ControlRowClassifier;

    /// Whether `row` must not be processed again.
    ///
    /// For start-shaped control rows this consults persisted state: a request that
    /// is no longer Pending (picked up by an earlier run) is skipped.
    ///
    /// Asking again about the same row gives the same answer and has no further
    /// effect.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Persistence`] if persisted state cannot be read.
    fn should_skip(&self, row: &RowMap) -> impl Future<Output = Result<bool>> + Send;

    /// Start the bootstrap requested by a start-shaped control row.
    ///
    /// Marks the request Running, then emits (or schedules emission of) the
    /// target table's rows, each tagged as bootstrap-origin.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] if the request cannot be decoded, persisted
    /// state cannot be updated, or the scan or any emission fails. On failure the
    /// request is left Running.
    fn start_bootstrap(
        &self,
        row: &RowMap,
        producer: &Arc<dyn Producer>,
        position: &dyn PositionTracker,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Finish the bootstrap reported by a complete-shaped control row.
    ///
    /// Emits the terminal marker and clears the running flag.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] if the row cannot be decoded or the marker
    /// cannot be emitted.
    fn complete_bootstrap(
        &self,
        row: &RowMap,
        producer: &Arc<dyn Producer>,
        position: &dyn PositionTracker,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Re-drive every request left Running by a previous process.
    ///
    /// Called once at startup, before the first row is processed.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] if persisted state cannot be read or a resumed
    /// bootstrap fails.
    fn resume(
        &self,
        producer: &Arc<dyn Producer>,
        position: &dyn PositionTracker,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Whether a bootstrap is currently executing in this process.
    fn is_running(&self) -> bool;

    /// Single entry point for every replicated row.
    ///
    /// Non-control rows are a no-op: they never touch running state or the
    /// producer.
    ///
    /// # Errors
    ///
    /// Propagates every error of the delegated operation.
    fn work(
        &self,
        row: &RowMap,
        producer: &Arc<dyn Producer>,
        position: &dyn PositionTracker,
    ) -> impl Future<Output = Result<()>> + Send {
        dispatch(self, row, producer, position)
    }
}

/// Classify `row` and delegate to the matching lifecycle operation.
///
/// This is the default body of [`Bootstrapper::work`], exposed so strategies
/// that override `work` can still reuse it.
///
/// # Errors
///
/// Propagates every error of `should_skip`, `start_bootstrap` and
/// `complete_bootstrap`.
pub async fn dispatch<B>(
    bootstrapper: &B,
    row: &RowMap,
    producer: &Arc<dyn Producer>,
    position: &dyn PositionTracker,
) -> Result<()>
where
    B: Bootstrapper + ?Sized,
{
    match bootstrapper.classifier().classify(row) {
        RowClass::NotBootstrap => Ok(()),
        RowClass::Start => {
            if bootstrapper.should_skip(row).await? {
                tracing::debug!(row = %row, "Skipping already-handled bootstrap request");
                return Ok(());
            }
            bootstrapper.start_bootstrap(row, producer, position).await
        }
        RowClass::Complete => bootstrapper.complete_bootstrap(row, producer, position).await,
        RowClass::InProgress => {
            tracing::trace!(row = %row, "Ignoring in-progress bootstrap row");
            Ok(())
        }
    }
}
