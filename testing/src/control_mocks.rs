//! In-memory bootstrap testing utilities
//!
//! Provides fast, deterministic stand-ins for every boundary the bootstrapper
//! talks to:
//! - [`InMemoryControlStore`]: control table with guarded transitions
//! - [`InMemoryRowSource`]: tables to scan, with failure injection
//! - [`RecordingProducer`]: captures pushed rows, with failure injection
//! - [`InMemoryPositionStore`]: committed replication positions
//! - [`ReplicationFeed`]: a row stream the test pushes into

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use async_stream::stream;
use cdc_bootstrap_core::control::{BootstrapRequest, BootstrapState, ControlRow, ControlRowId};
use cdc_bootstrap_core::control_store::{ControlStore, ControlStoreError, StoreFuture};
use cdc_bootstrap_core::producer::{Producer, ProducerError};
use cdc_bootstrap_core::replication::{Position, PositionStore, ReplicationError, RowStream};
use cdc_bootstrap_core::row::{RowData, RowMap, RowType};
use cdc_bootstrap_core::row_source::{RowSource, ScanError, ScanRequest, ScanStream};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

type FeedItem = Result<RowMap, ReplicationError>;

/// A replication stream driven by the test.
///
/// Rows sent through the feed come out of the paired [`RowStream`] in order.
/// The stream ends once every clone of the feed has been dropped.
///
/// # Example
///
/// ```
/// use cdc_bootstrap_testing::{ReplicationFeed, helpers};
/// use futures::StreamExt;
///
/// # tokio_test::block_on(async {
/// let (feed, mut rows) = ReplicationFeed::channel();
/// feed.send(helpers::live_row("shop", "orders", 1));
/// drop(feed);
///
/// assert!(rows.next().await.is_some());
/// assert!(rows.next().await.is_none());
/// # });
/// ```
#[derive(Clone, Debug)]
pub struct ReplicationFeed {
    tx: mpsc::UnboundedSender<FeedItem>,
}

impl ReplicationFeed {
    /// Create a feed and the stream it drives.
    #[must_use]
    pub fn channel() -> (Self, RowStream) {
        let (tx, mut rx) = mpsc::unbounded_channel::<FeedItem>();
        let rows = stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        };
        (Self { tx }, Box::pin(rows))
    }

    /// Deliver a row.
    pub fn send(&self, row: RowMap) {
        let _ = self.tx.send(Ok(row));
    }

    /// Deliver a stream error.
    pub fn fail(&self, reason: &str) {
        let _ = self.tx.send(Err(ReplicationError::Stream(reason.to_string())));
    }
}

#[derive(Debug, Default)]
struct ControlTable {
    rows: BTreeMap<i64, ControlRow>,
    next_id: i64,
    changes: Vec<RowMap>,
    failing: bool,
}

/// In-memory control table.
///
/// Every write is also recorded as the row the change log would carry, so tests
/// can feed the store's own updates back through replication, either by hand
/// via [`InMemoryControlStore::take_changes`] or automatically via
/// [`InMemoryControlStore::replicate_to`].
///
/// # Example
///
/// ```
/// use cdc_bootstrap_testing::InMemoryControlStore;
/// use cdc_bootstrap_core::control::{BootstrapRequest, BootstrapState};
/// use cdc_bootstrap_core::control_store::ControlStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryControlStore::new("maxwell");
/// let request = store.request(BootstrapRequest::new("shop", "orders")).await?;
///
/// assert_eq!(request.state(), BootstrapState::Pending);
/// assert_eq!(store.take_changes().len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryControlStore {
    control_database: String,
    table: Arc<RwLock<ControlTable>>,
    replica: Arc<RwLock<Option<ReplicationFeed>>>,
}

impl InMemoryControlStore {
    /// Create an empty control table living in `control_database`.
    #[must_use]
    pub fn new(control_database: impl Into<String>) -> Self {
        Self {
            control_database: control_database.into(),
            table: Arc::new(RwLock::new(ControlTable {
                next_id: 1,
                ..ControlTable::default()
            })),
            replica: Arc::new(RwLock::new(None)),
        }
    }

    /// Seed a row as-is, bypassing transition guards.
    ///
    /// Useful for simulating state left behind by a previous process.
    pub fn insert(&self, row: ControlRow) {
        let mut table = self.table.write().unwrap();
        table.next_id = table.next_id.max(row.id.get() + 1);
        table.rows.insert(row.id.get(), row);
    }

    /// Current persisted state of a request.
    #[must_use]
    pub fn get(&self, id: ControlRowId) -> Option<ControlRow> {
        self.table.read().unwrap().rows.get(&id.get()).cloned()
    }

    /// All persisted requests, by id.
    #[must_use]
    pub fn rows(&self) -> Vec<ControlRow> {
        self.table.read().unwrap().rows.values().cloned().collect()
    }

    /// Drain the change-log rows produced by writes so far.
    #[must_use]
    pub fn take_changes(&self) -> Vec<RowMap> {
        std::mem::take(&mut self.table.write().unwrap().changes)
    }

    /// Also deliver every future write to `feed`, as replication would.
    pub fn replicate_to(&self, feed: &ReplicationFeed) {
        *self.replica.write().unwrap() = Some(feed.clone());
    }

    /// Stop delivering writes to a feed.
    pub fn stop_replicating(&self) {
        *self.replica.write().unwrap() = None;
    }

    /// Make every subsequent operation fail with a database error.
    pub fn set_failing(&self, failing: bool) {
        self.table.write().unwrap().failing = failing;
    }

    fn check_available(table: &ControlTable) -> Result<(), ControlStoreError> {
        if table.failing {
            return Err(ControlStoreError::DatabaseError(
                "injected control store failure".to_string(),
            ));
        }
        Ok(())
    }

    fn record(&self, table: &mut ControlTable, row: &ControlRow, row_type: RowType, at: DateTime<Utc>) {
        let change = row.to_row_map(&self.control_database, row_type, at);
        if let Some(feed) = self.replica.read().unwrap().as_ref() {
            feed.send(change.clone());
        }
        table.changes.push(change);
    }

    fn insert_request(&self, request: BootstrapRequest) -> Result<ControlRow, ControlStoreError> {
        let mut table = self.table.write().unwrap();
        Self::check_available(&table)?;

        let id = table.next_id;
        table.next_id += 1;
        let row = ControlRow {
            id: ControlRowId::new(id),
            database_name: request.database_name,
            table_name: request.table_name,
            field_name: request.field_name,
            start_date: request.start_date,
            started_at: None,
            completed_at: None,
            is_complete: false,
            inserted_rows: 0,
        };
        table.rows.insert(id, row.clone());
        self.record(&mut table, &row, RowType::Insert, Utc::now());
        Ok(row)
    }

    fn transition(
        &self,
        id: ControlRowId,
        to: BootstrapState,
        at: DateTime<Utc>,
        apply: impl FnOnce(&mut ControlRow),
    ) -> Result<ControlRow, ControlStoreError> {
        let mut table = self.table.write().unwrap();
        Self::check_available(&table)?;

        let row = table
            .rows
            .get_mut(&id.get())
            .ok_or(ControlStoreError::NotFound(id))?;
        let required = match to {
            BootstrapState::Running => BootstrapState::Pending,
            BootstrapState::Complete => BootstrapState::Running,
            BootstrapState::Pending => {
                return Err(ControlStoreError::InvalidTransition {
                    id,
                    from: row.state(),
                    to,
                });
            }
        };
        if row.state() != required {
            return Err(ControlStoreError::InvalidTransition {
                id,
                from: row.state(),
                to,
            });
        }

        apply(row);
        let updated = row.clone();
        self.record(&mut table, &updated, RowType::Update, at);
        Ok(updated)
    }
}

impl ControlStore for InMemoryControlStore {
    fn request(&self, request: BootstrapRequest) -> StoreFuture<'_, ControlRow> {
        let result = self.insert_request(request);
        Box::pin(async move { result })
    }

    fn load(&self, id: ControlRowId) -> StoreFuture<'_, Option<ControlRow>> {
        let result = {
            let table = self.table.read().unwrap();
            Self::check_available(&table).map(|()| table.rows.get(&id.get()).cloned())
        };
        Box::pin(async move { result })
    }

    fn mark_started(&self, id: ControlRowId, started_at: DateTime<Utc>) -> StoreFuture<'_, ControlRow> {
        let result = self.transition(id, BootstrapState::Running, started_at, |row| {
            row.started_at = Some(started_at);
        });
        Box::pin(async move { result })
    }

    fn mark_completed(
        &self,
        id: ControlRowId,
        completed_at: DateTime<Utc>,
        inserted_rows: u64,
    ) -> StoreFuture<'_, ControlRow> {
        let result = self.transition(id, BootstrapState::Complete, completed_at, |row| {
            row.completed_at = Some(completed_at);
            row.is_complete = true;
            row.inserted_rows = inserted_rows;
        });
        Box::pin(async move { result })
    }

    fn find_running(&self) -> StoreFuture<'_, Vec<ControlRow>> {
        let result = {
            let table = self.table.read().unwrap();
            Self::check_available(&table).map(|()| {
                table
                    .rows
                    .values()
                    .filter(|row| row.state() == BootstrapState::Running)
                    .cloned()
                    .collect()
            })
        };
        Box::pin(async move { result })
    }
}

/// In-memory tables to bootstrap from.
///
/// Scans honour the request's `field >= start` filter using string comparison
/// (which orders ISO-8601 timestamps correctly) and order rows by `field` when
/// one is given.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRowSource {
    tables: Arc<RwLock<HashMap<(String, String), Vec<RowData>>>>,
    scans: Arc<RwLock<Vec<ScanRequest>>>,
    fail_after: Arc<RwLock<Option<usize>>>,
}

impl InMemoryRowSource {
    /// Create a source with no tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a table.
    #[must_use]
    pub fn with_table(self, database: &str, table: &str, rows: Vec<RowData>) -> Self {
        self.tables
            .write()
            .unwrap()
            .insert((database.to_string(), table.to_string()), rows);
        self
    }

    /// Add a table of `count` rows shaped `{"id": n}` for `n` in `1..=count`.
    #[must_use]
    pub fn with_numbered_rows(self, database: &str, table: &str, count: i64) -> Self {
        let rows = (1..=count)
            .map(|id| {
                let mut data = RowData::new();
                data.insert("id".to_string(), Value::from(id));
                data
            })
            .collect();
        self.with_table(database, table, rows)
    }

    /// Make scans yield a database error after `rows` rows; `None` disables it.
    pub fn fail_after(&self, rows: Option<usize>) {
        *self.fail_after.write().unwrap() = rows;
    }

    /// Every scan opened so far.
    #[must_use]
    pub fn scans(&self) -> Vec<ScanRequest> {
        self.scans.read().unwrap().clone()
    }

    fn matching_rows(&self, request: &ScanRequest) -> Result<Vec<RowData>, ScanError> {
        let tables = self.tables.read().unwrap();
        let mut rows = tables
            .get(&(request.database.clone(), request.table.clone()))
            .cloned()
            .ok_or_else(|| ScanError::TableNotFound {
                database: request.database.clone(),
                table: request.table.clone(),
            })?;

        if let Some(field) = &request.field {
            if let Some(start) = &request.start {
                rows.retain(|row| row.get(field).and_then(comparable).is_some_and(|v| v >= *start));
            }
            rows.sort_by_key(|row| row.get(field).and_then(comparable));
        }
        Ok(rows)
    }
}

fn comparable(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl RowSource for InMemoryRowSource {
    fn scan(
        &self,
        request: &ScanRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ScanStream, ScanError>> + Send + '_>> {
        self.scans.write().unwrap().push(request.clone());
        let result = self.matching_rows(request).map(|rows| {
            let fail_after = *self.fail_after.read().unwrap();
            let mut items: Vec<Result<RowData, ScanError>> = Vec::with_capacity(rows.len() + 1);
            for (index, row) in rows.into_iter().enumerate() {
                if fail_after == Some(index) {
                    break;
                }
                items.push(Ok(row));
            }
            if fail_after.is_some_and(|limit| limit <= items.len()) {
                items.push(Err(ScanError::DatabaseError("injected scan failure".to_string())));
            }
            Box::pin(futures::stream::iter(items)) as ScanStream
        });
        Box::pin(async move { result })
    }
}

/// Producer that records every pushed row.
///
/// # Example
///
/// ```
/// use cdc_bootstrap_testing::{RecordingProducer, helpers};
/// use cdc_bootstrap_core::producer::Producer;
///
/// # tokio_test::block_on(async {
/// let producer = RecordingProducer::new();
/// producer.push(&helpers::live_row("shop", "orders", 1)).await.unwrap();
///
/// assert_eq!(producer.len(), 1);
/// # });
/// ```
#[derive(Clone, Debug, Default)]
pub struct RecordingProducer {
    pushed: Arc<RwLock<Vec<RowMap>>>,
    fail_after: Arc<RwLock<Option<usize>>>,
}

impl RecordingProducer {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every push once `accepted` rows have been recorded; `None`
    /// disables it.
    pub fn fail_after(&self, accepted: Option<usize>) {
        *self.fail_after.write().unwrap() = accepted;
    }

    /// All recorded rows, in push order.
    #[must_use]
    pub fn pushed(&self) -> Vec<RowMap> {
        self.pushed.read().unwrap().clone()
    }

    /// Row types of all recorded rows, in push order.
    #[must_use]
    pub fn types(&self) -> Vec<RowType> {
        self.pushed.read().unwrap().iter().map(RowMap::row_type).collect()
    }

    /// Number of recorded rows of `row_type`.
    #[must_use]
    pub fn count_of(&self, row_type: RowType) -> usize {
        self.pushed
            .read()
            .unwrap()
            .iter()
            .filter(|row| row.row_type() == row_type)
            .count()
    }

    /// Number of recorded rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pushed.read().unwrap().len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pushed.read().unwrap().is_empty()
    }

    /// Forget recorded rows.
    pub fn clear(&self) {
        self.pushed.write().unwrap().clear();
    }
}

impl Producer for RecordingProducer {
    fn push(&self, row: &RowMap) -> Pin<Box<dyn Future<Output = Result<(), ProducerError>> + Send + '_>> {
        let result = {
            let mut pushed = self.pushed.write().unwrap();
            match *self.fail_after.read().unwrap() {
                Some(limit) if pushed.len() >= limit => Err(ProducerError::PublishFailed {
                    topic: format!("{}.{}", row.database(), row.table()),
                    reason: "injected delivery failure".to_string(),
                }),
                _ => {
                    pushed.push(row.clone());
                    Ok(())
                }
            }
        };
        Box::pin(async move { result })
    }
}

/// In-memory committed positions.
#[derive(Clone, Debug, Default)]
pub struct InMemoryPositionStore {
    positions: Arc<RwLock<HashMap<String, Position>>>,
    saves: Arc<RwLock<Vec<(String, Position)>>>,
}

impl InMemoryPositionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a committed position.
    #[must_use]
    pub fn with_position(self, client_id: &str, position: Position) -> Self {
        self.positions
            .write()
            .unwrap()
            .insert(client_id.to_string(), position);
        self
    }

    /// The committed position for `client_id`.
    #[must_use]
    pub fn committed(&self, client_id: &str) -> Option<Position> {
        self.positions.read().unwrap().get(client_id).cloned()
    }

    /// Every save, in order.
    #[must_use]
    pub fn saves(&self) -> Vec<(String, Position)> {
        self.saves.read().unwrap().clone()
    }
}

impl PositionStore for InMemoryPositionStore {
    fn save_position(
        &self,
        client_id: &str,
        position: Position,
    ) -> Pin<Box<dyn Future<Output = Result<(), ReplicationError>> + Send + '_>> {
        self.positions
            .write()
            .unwrap()
            .insert(client_id.to_string(), position.clone());
        self.saves
            .write()
            .unwrap()
            .push((client_id.to_string(), position));
        Box::pin(async move { Ok(()) })
    }

    fn load_position(
        &self,
        client_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Position>, ReplicationError>> + Send + '_>> {
        let position = self.committed(client_id);
        Box::pin(async move { Ok(position) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn transitions_are_guarded() {
        let store = InMemoryControlStore::new("maxwell");
        let request = store
            .request(BootstrapRequest::new("shop", "orders"))
            .await
            .unwrap();

        let err = store
            .mark_completed(request.id, Utc::now(), 0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControlStoreError::InvalidTransition {
                from: BootstrapState::Pending,
                to: BootstrapState::Complete,
                ..
            }
        ));

        let running = store.mark_started(request.id, Utc::now()).await.unwrap();
        assert_eq!(running.state(), BootstrapState::Running);
        assert!(store.mark_started(request.id, Utc::now()).await.is_err());

        let complete = store.mark_completed(request.id, Utc::now(), 3).await.unwrap();
        assert_eq!(complete.state(), BootstrapState::Complete);
        assert_eq!(complete.inserted_rows, 3);
    }

    #[tokio::test]
    async fn writes_are_recorded_as_change_rows() {
        let store = InMemoryControlStore::new("maxwell");
        let request = store
            .request(BootstrapRequest::new("shop", "orders"))
            .await
            .unwrap();
        store.mark_started(request.id, Utc::now()).await.unwrap();

        let changes = store.take_changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].row_type(), RowType::Insert);
        assert_eq!(changes[1].row_type(), RowType::Update);
        assert!(changes.iter().all(|row| row.table() == "bootstrap"));
        assert!(store.take_changes().is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let store = InMemoryControlStore::new("maxwell");
        let id = ControlRowId::new(42);

        assert!(store.load(id).await.unwrap().is_none());
        assert!(matches!(
            store.mark_started(id, Utc::now()).await,
            Err(ControlStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn failing_store_reports_database_errors() {
        let store = InMemoryControlStore::new("maxwell");
        store.set_failing(true);

        assert!(matches!(
            store.find_running().await,
            Err(ControlStoreError::DatabaseError(_))
        ));
    }

    #[tokio::test]
    async fn scans_filter_and_order_by_field() {
        let row = |id: i64, at: &str| {
            let mut data = RowData::new();
            data.insert("id".to_string(), Value::from(id));
            data.insert("updated_at".to_string(), Value::from(at));
            data
        };
        let source = InMemoryRowSource::new().with_table(
            "shop",
            "orders",
            vec![
                row(1, "2025-03-01 00:00:00"),
                row(2, "2024-12-31 00:00:00"),
                row(3, "2025-02-01 00:00:00"),
            ],
        );
        let request = ScanRequest {
            database: "shop".to_string(),
            table: "orders".to_string(),
            field: Some("updated_at".to_string()),
            start: Some("2025-01-01".to_string()),
        };

        let rows: Vec<_> = source.scan(&request).await.unwrap().collect().await;
        let ids: Vec<_> = rows
            .into_iter()
            .map(|row| row.unwrap()["id"].as_i64().unwrap())
            .collect();

        assert_eq!(ids, vec![3, 1]);
        assert_eq!(source.scans(), vec![request]);
    }

    #[tokio::test]
    async fn scans_of_missing_tables_fail() {
        let source = InMemoryRowSource::new();
        let request = ScanRequest {
            database: "shop".to_string(),
            table: "missing".to_string(),
            field: None,
            start: None,
        };

        assert!(matches!(
            source.scan(&request).await,
            Err(ScanError::TableNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn injected_scan_failure_follows_accepted_rows() {
        let source = InMemoryRowSource::new().with_numbered_rows("shop", "orders", 5);
        source.fail_after(Some(2));
        let request = ScanRequest {
            database: "shop".to_string(),
            table: "orders".to_string(),
            field: None,
            start: None,
        };

        let rows: Vec<_> = source.scan(&request).await.unwrap().collect().await;
        assert_eq!(rows.len(), 3);
        assert!(rows[0].is_ok() && rows[1].is_ok());
        assert!(rows[2].is_err());
    }

    #[tokio::test]
    async fn producer_fails_after_limit() {
        let producer = RecordingProducer::new();
        producer.fail_after(Some(1));
        let row = RowMap::new(RowType::Insert, "shop", "orders", Utc::now());

        assert!(producer.push(&row).await.is_ok());
        assert!(producer.push(&row).await.is_err());
        assert_eq!(producer.len(), 1);
    }

    #[tokio::test]
    async fn position_store_round_trips() {
        let store = InMemoryPositionStore::new();
        assert!(store.load_position("maxwell").await.unwrap().is_none());

        store
            .save_position("maxwell", Position::new("binlog.000002", 120))
            .await
            .unwrap();

        assert_eq!(
            store.load_position("maxwell").await.unwrap(),
            Some(Position::new("binlog.000002", 120))
        );
        assert_eq!(store.saves().len(), 1);
    }
}
