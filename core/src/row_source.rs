//! Historical row source: where a bootstrap reads a table's current contents.
//!
//! How rows are read is up to the implementation; the bootstrapper only needs an
//! ordered stream of column data for the table named by a [`ScanRequest`].

use crate::control::ControlRow;
use crate::row::RowData;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised while scanning a table.
#[derive(Error, Debug, Clone)]
pub enum ScanError {
    /// The table to bootstrap does not exist.
    #[error("Table {database}.{table} not found")]
    TableNotFound {
        /// Database of the missing table.
        database: String,
        /// Missing table.
        table: String,
    },

    /// A row could not be decoded into column data.
    #[error("Failed to decode row: {0}")]
    DecodeError(String),

    /// Database connection or query error.
    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// Stream of historical rows.
pub type ScanStream = Pin<Box<dyn Stream<Item = Result<RowData, ScanError>> + Send>>;

/// What to scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanRequest {
    /// Database of the table.
    pub database: String,
    /// Table to read.
    pub table: String,
    /// Optional filter / ordering column.
    pub field: Option<String>,
    /// Optional lower bound for `field`; ignored without `field`.
    pub start: Option<String>,
}

impl From<&ControlRow> for ScanRequest {
    fn from(row: &ControlRow) -> Self {
        Self {
            database: row.database_name.clone(),
            table: row.table_name.clone(),
            field: row.field_name.clone(),
            start: row.start_date.clone(),
        }
    }
}

/// Reads the current contents of a table.
///
/// # Dyn Compatibility
///
/// Explicit `Pin<Box<dyn Future>>` returns allow `Arc<dyn RowSource>`.
pub trait RowSource: Send + Sync {
    /// Open a scan over the requested table.
    ///
    /// Errors while opening (unknown table, connection failure) are returned
    /// here; errors while streaming are yielded by the stream.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError`] if the scan cannot be opened.
    fn scan(
        &self,
        request: &ScanRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ScanStream, ScanError>> + Send + '_>>;
}
