//! Historical emission shared by the synchronous and asynchronous strategies.
//!
//! [`BootstrapContext`] bundles the collaborators one bootstrap needs and runs a
//! request end to end:
//!
//! ```text
//! load persisted row ──► Pending? mark_started ──► push bootstrap-start
//!                        Running? (resume)             │
//!                                                      ▼
//!                       mark_completed(n) ◄── push n × bootstrap-insert ◄── scan
//! ```
//!
//! The terminal `bootstrap-complete` marker is *not* pushed here: it is pushed
//! when the completion update comes back through replication.

use cdc_bootstrap_core::bootstrapper::Result;
use cdc_bootstrap_core::control::{BootstrapState, ControlRow, ControlRowId};
use cdc_bootstrap_core::control_store::{ControlStore, ControlStoreError};
use cdc_bootstrap_core::environment::Clock;
use cdc_bootstrap_core::producer::Producer;
use cdc_bootstrap_core::replication::Position;
use cdc_bootstrap_core::row::{RowMap, RowType};
use cdc_bootstrap_core::row_source::{RowSource, ScanRequest};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;

use crate::metrics::BootstrapMetrics;

/// Default number of rows between progress log lines.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10_000;

/// The `bootstrap-start` marker pushed before a table's historical rows.
#[must_use]
pub fn start_marker(request: &ControlRow, position: Option<Position>, at: DateTime<Utc>) -> RowMap {
    RowMap::new(
        RowType::BootstrapStart,
        &request.database_name,
        &request.table_name,
        at,
    )
    .with_position(position)
}

/// The `bootstrap-complete` marker pushed once a bootstrap has finished.
#[must_use]
pub fn complete_marker(request: &ControlRow, position: Option<Position>, at: DateTime<Utc>) -> RowMap {
    RowMap::new(
        RowType::BootstrapComplete,
        &request.database_name,
        &request.table_name,
        at,
    )
    .with_position(position)
}

/// Collaborators needed to execute a bootstrap.
#[derive(Clone)]
pub struct BootstrapContext {
    store: Arc<dyn ControlStore>,
    source: Arc<dyn RowSource>,
    clock: Arc<dyn Clock>,
    progress_interval: u64,
}

impl BootstrapContext {
    /// Create a context logging progress every [`DEFAULT_PROGRESS_INTERVAL`] rows.
    #[must_use]
    pub fn new(
        store: Arc<dyn ControlStore>,
        source: Arc<dyn RowSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            source,
            clock,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Log progress every `interval` emitted rows (at least 1).
    #[must_use]
    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval.max(1);
        self
    }

    /// The control store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ControlStore> {
        &self.store
    }

    /// The current time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Whether a start request has already been handled by some process.
    ///
    /// A request is stale when its persisted row is gone or no longer Pending.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Persistence`](cdc_bootstrap_core::bootstrapper::BootstrapError::Persistence)
    /// if the control row cannot be loaded.
    pub async fn is_stale_request(&self, id: ControlRowId) -> Result<bool> {
        let persisted = self.store.load(id).await?;
        Ok(persisted.is_none_or(|row| row.state() != BootstrapState::Pending))
    }

    /// The persisted row of a queued request, `None` if it no longer needs to run.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Persistence`](cdc_bootstrap_core::bootstrapper::BootstrapError::Persistence)
    /// if the control row cannot be loaded.
    pub async fn still_pending_work(&self, id: ControlRowId) -> Result<Option<ControlRow>> {
        let persisted = self.store.load(id).await?;
        Ok(persisted.filter(|row| row.state() != BootstrapState::Complete))
    }

    /// Run `request` to completion: mark it Running, emit its table's rows and
    /// mark it Complete with the number of rows emitted.
    ///
    /// Every emitted record carries `position`.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`](cdc_bootstrap_core::bootstrapper::BootstrapError)
    /// if the control row cannot be transitioned, the scan fails or the producer
    /// rejects a row. The control row is then left Running.
    pub async fn execute(
        &self,
        request: &ControlRow,
        producer: &dyn Producer,
        position: Option<Position>,
    ) -> Result<ControlRow> {
        let began = Instant::now();
        let result = self.emit(request, producer, position).await;

        match &result {
            Ok(completed) => {
                BootstrapMetrics::record_emission(began.elapsed());
                tracing::info!(
                    id = %completed.id,
                    database = %completed.database_name,
                    table = %completed.table_name,
                    rows = completed.inserted_rows,
                    elapsed_ms = u64::try_from(began.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "Bootstrap emission finished"
                );
            }
            Err(e) => {
                BootstrapMetrics::record_failed();
                tracing::error!(
                    id = %request.id,
                    database = %request.database_name,
                    table = %request.table_name,
                    error = %e,
                    "Bootstrap emission failed"
                );
            }
        }
        result
    }

    async fn emit(
        &self,
        request: &ControlRow,
        producer: &dyn Producer,
        position: Option<Position>,
    ) -> Result<ControlRow> {
        let running = self.begin(request).await?;
        BootstrapMetrics::record_started();

        producer
            .push(&start_marker(&running, position.clone(), self.now()))
            .await?;

        let mut rows = self.source.scan(&ScanRequest::from(&running)).await?;
        let mut emitted: u64 = 0;
        while let Some(data) = rows.next().await {
            let row = RowMap::new(
                RowType::BootstrapInsert,
                &running.database_name,
                &running.table_name,
                self.now(),
            )
            .with_data(data?)
            .with_position(position.clone());

            producer.push(&row).await?;
            emitted += 1;
            BootstrapMetrics::record_rows(1);

            if emitted % self.progress_interval == 0 {
                tracing::info!(
                    id = %running.id,
                    database = %running.database_name,
                    table = %running.table_name,
                    rows = emitted,
                    "Bootstrap progress"
                );
            }
        }

        Ok(self
            .store
            .mark_completed(running.id, self.now(), emitted)
            .await?)
    }

    async fn begin(&self, request: &ControlRow) -> Result<ControlRow> {
        let persisted = self
            .store
            .load(request.id)
            .await?
            .ok_or(ControlStoreError::NotFound(request.id))?;

        match persisted.state() {
            BootstrapState::Pending => {
                let running = self.store.mark_started(persisted.id, self.now()).await?;
                tracing::info!(
                    id = %running.id,
                    database = %running.database_name,
                    table = %running.table_name,
                    "Bootstrap started"
                );
                Ok(running)
            }
            BootstrapState::Running => {
                tracing::info!(
                    id = %persisted.id,
                    database = %persisted.database_name,
                    table = %persisted.table_name,
                    "Resuming interrupted bootstrap"
                );
                Ok(persisted)
            }
            BootstrapState::Complete => Err(ControlStoreError::InvalidTransition {
                id: persisted.id,
                from: BootstrapState::Complete,
                to: BootstrapState::Running,
            }
            .into()),
        }
    }
}
