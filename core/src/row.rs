//! Replicated row model.
//!
//! Every record that flows through the pipeline, whether it was read from the
//! change log or synthesised by a bootstrap, is a [`RowMap`]. A row carries the
//! database and table it belongs to, a [`RowType`] tag, the time it was captured,
//! the replication [`Position`] it was read at (when known) and its column data
//! as a JSON object.
//!
//! Bootstrap-origin rows are distinguished from live rows by their type tag
//! (`bootstrap-start`, `bootstrap-insert`, `bootstrap-complete`), so consumers
//! can tell a historical re-emission apart from an ordinary insert.
//!
//! # Example
//!
//! ```
//! use cdc_bootstrap_core::row::{RowMap, RowType};
//! use chrono::Utc;
//!
//! let row = RowMap::new(RowType::Insert, "shop", "orders", Utc::now())
//!     .with_field("id", 42)
//!     .with_field("status", "placed");
//!
//! assert_eq!(row.database(), "shop");
//! assert_eq!(row.data("id"), Some(&serde_json::json!(42)));
//! assert!(row.is_null("shipped_at"));
//! ```

use crate::replication::Position;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Column data of a row, keyed by column name.
pub type RowData = Map<String, Value>;

/// Error types for row operations.
#[derive(Error, Debug)]
pub enum RowError {
    /// Failed to render the row as JSON.
    #[error("Failed to serialize row: {0}")]
    SerializationError(String),

    /// Unknown row type tag.
    #[error("Unknown row type: {0}")]
    UnknownRowType(String),
}

/// What kind of change a row represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RowType {
    /// Live insert read from the change log.
    Insert,
    /// Live update read from the change log.
    Update,
    /// Live delete read from the change log.
    Delete,
    /// Marker emitted before the historical rows of a bootstrap.
    BootstrapStart,
    /// Historical row re-emitted by a bootstrap.
    BootstrapInsert,
    /// Terminal marker emitted once a bootstrap has completed.
    BootstrapComplete,
}

impl RowType {
    /// Wire name of the row type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::BootstrapStart => "bootstrap-start",
            Self::BootstrapInsert => "bootstrap-insert",
            Self::BootstrapComplete => "bootstrap-complete",
        }
    }

    /// Whether the row was synthesised by a bootstrap rather than replicated.
    #[must_use]
    pub const fn is_bootstrap(self) -> bool {
        matches!(
            self,
            Self::BootstrapStart | Self::BootstrapInsert | Self::BootstrapComplete
        )
    }
}

impl fmt::Display for RowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RowType {
    type Err = RowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "bootstrap-start" => Ok(Self::BootstrapStart),
            "bootstrap-insert" => Ok(Self::BootstrapInsert),
            "bootstrap-complete" => Ok(Self::BootstrapComplete),
            other => Err(RowError::UnknownRowType(other.to_string())),
        }
    }
}

/// A single replicated (or synthesised) row.
///
/// Missing columns and columns holding JSON `null` are treated the same way:
/// both are "null" for [`RowMap::is_null`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RowMap {
    #[serde(rename = "type")]
    row_type: RowType,
    database: String,
    table: String,
    ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<Position>,
    #[serde(default)]
    data: RowData,
}

impl RowMap {
    /// Create a row with no column data and no position.
    #[must_use]
    pub fn new(
        row_type: RowType,
        database: impl Into<String>,
        table: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            row_type,
            database: database.into(),
            table: table.into(),
            ts: timestamp,
            position: None,
            data: RowData::new(),
        }
    }

    /// Replace the column data.
    #[must_use]
    pub fn with_data(mut self, data: RowData) -> Self {
        self.data = data;
        self
    }

    /// Set a single column.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(name.into(), value.into());
        self
    }

    /// Attach the replication position the row was read at.
    #[must_use]
    pub fn with_position(mut self, position: Option<Position>) -> Self {
        self.position = position;
        self
    }

    /// The row type tag.
    #[must_use]
    pub const fn row_type(&self) -> RowType {
        self.row_type
    }

    /// Database (schema) the row belongs to.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Table the row belongs to.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// When the row was captured.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.ts
    }

    /// Replication position the row was read at, if known.
    #[must_use]
    pub const fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    /// Value of a column, `None` when the column is absent.
    #[must_use]
    pub fn data(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// All column data.
    #[must_use]
    pub const fn fields(&self) -> &RowData {
        &self.data
    }

    /// Whether a column is absent or holds `null`.
    #[must_use]
    pub fn is_null(&self, field: &str) -> bool {
        self.data.get(field).is_none_or(Value::is_null)
    }

    /// Render the row as a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`RowError::SerializationError`] if the row cannot be rendered.
    pub fn to_json(&self) -> Result<String, RowError> {
        serde_json::to_string(self).map_err(|e| RowError::SerializationError(e.to_string()))
    }
}

impl fmt::Display for RowMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RowMap {{ type: {}, table: {}.{}, columns: {} }}",
            self.row_type,
            self.database,
            self.table,
            self.data.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> RowMap {
        RowMap::new(RowType::Insert, "shop", "orders", Utc::now())
            .with_field("id", 7)
            .with_field("note", Value::Null)
    }

    #[test]
    fn row_type_wire_names_parse_back() {
        for row_type in [
            RowType::Insert,
            RowType::Update,
            RowType::Delete,
            RowType::BootstrapStart,
            RowType::BootstrapInsert,
            RowType::BootstrapComplete,
        ] {
            assert_eq!(row_type.as_str().parse::<RowType>().ok(), Some(row_type));
        }
        assert!("upsert".parse::<RowType>().is_err());
    }

    #[test]
    fn only_bootstrap_types_are_bootstrap() {
        assert!(RowType::BootstrapInsert.is_bootstrap());
        assert!(RowType::BootstrapComplete.is_bootstrap());
        assert!(!RowType::Insert.is_bootstrap());
        assert!(!RowType::Delete.is_bootstrap());
    }

    #[test]
    fn missing_and_null_columns_are_null() {
        let row = sample();
        assert!(row.is_null("note"));
        assert!(row.is_null("absent"));
        assert!(!row.is_null("id"));
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if rendering fails
    fn json_rendering_uses_wire_type() {
        let row = RowMap::new(RowType::BootstrapInsert, "shop", "orders", Utc::now())
            .with_field("id", 1)
            .with_position(Some(Position::new("binlog.000003", 4)));

        let rendered: Value =
            serde_json::from_str(&row.to_json().expect("row should render")).expect("valid json");

        assert_eq!(rendered["type"], json!("bootstrap-insert"));
        assert_eq!(rendered["database"], json!("shop"));
        assert_eq!(rendered["data"]["id"], json!(1));
        assert_eq!(rendered["position"]["offset"], json!(4));
    }

    #[test]
    fn display_is_compact() {
        let display = format!("{}", sample());
        assert!(display.contains("shop.orders"));
        assert!(display.contains("columns: 2"));
    }
}
