//! Persistence boundary for the bootstrap control table.
//!
//! The bootstrapper never writes the control table through the change log; it
//! issues updates to the table's storage directly, and those updates then come
//! back through replication. [`ControlStore`] is the narrow contract it needs:
//!
//! - Look up a request by id (duplicate detection)
//! - Move a request `Pending → Running` and `Running → Complete`
//! - List requests left `Running` by a previous process (resume)
//! - Insert new requests (operator tooling)
//!
//! Transitions are guarded: a store must refuse to start a request that is not
//! Pending and to complete one that is not Running, reporting
//! [`ControlStoreError::InvalidTransition`]. Requests are never deleted.
//!
//! # Implementations
//!
//! - `PostgresControlStore` (in `cdc-bootstrap-postgres`): production storage
//! - `InMemoryControlStore` (in `cdc-bootstrap-testing`): fast, deterministic tests

use crate::control::{BootstrapRequest, BootstrapState, ControlRow, ControlRowId};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during control-table operations.
#[derive(Error, Debug, Clone)]
pub enum ControlStoreError {
    /// No request with this id exists.
    #[error("Bootstrap request {0} not found")]
    NotFound(ControlRowId),

    /// The request is not in the state the transition requires.
    #[error("Bootstrap request {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The request.
        id: ControlRowId,
        /// Its persisted state.
        from: BootstrapState,
        /// The state that was requested.
        to: BootstrapState,
    },

    /// A stored row could not be decoded.
    #[error("Invalid control row: {0}")]
    InvalidRow(String),

    /// Database connection or query error.
    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// Boxed future returned by [`ControlStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ControlStoreError>> + Send + 'a>>;

/// Storage for bootstrap control rows.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// to enable trait object usage (`Arc<dyn ControlStore>`), which the
/// asynchronous bootstrapper moves into its worker task.
pub trait ControlStore: Send + Sync {
    /// Insert a new Pending request and return it.
    ///
    /// # Errors
    ///
    /// Returns [`ControlStoreError::DatabaseError`] if the insert fails.
    fn request(&self, request: BootstrapRequest) -> StoreFuture<'_, ControlRow>;

    /// Load a request by id, `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ControlStoreError::DatabaseError`] or
    /// [`ControlStoreError::InvalidRow`] if the lookup fails.
    fn load(&self, id: ControlRowId) -> StoreFuture<'_, Option<ControlRow>>;

    /// Move a request from Pending to Running, recording `started_at`.
    ///
    /// # Errors
    ///
    /// - [`ControlStoreError::NotFound`]: unknown id
    /// - [`ControlStoreError::InvalidTransition`]: the request is not Pending
    /// - [`ControlStoreError::DatabaseError`]: the update failed
    fn mark_started(&self, id: ControlRowId, started_at: DateTime<Utc>) -> StoreFuture<'_, ControlRow>;

    /// Move a request from Running to Complete, recording `completed_at` and the
    /// number of rows emitted.
    ///
    /// # Errors
    ///
    /// - [`ControlStoreError::NotFound`]: unknown id
    /// - [`ControlStoreError::InvalidTransition`]: the request is not Running
    /// - [`ControlStoreError::DatabaseError`]: the update failed
    fn mark_completed(
        &self,
        id: ControlRowId,
        completed_at: DateTime<Utc>,
        inserted_rows: u64,
    ) -> StoreFuture<'_, ControlRow>;

    /// All requests that were started but never completed, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ControlStoreError::DatabaseError`] if the query fails.
    fn find_running(&self) -> StoreFuture<'_, Vec<ControlRow>>;
}
