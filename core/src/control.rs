//! Bootstrap control rows and their classification.
//!
//! An operator asks for a bootstrap by inserting a row into the reserved control
//! table `<control database>.bootstrap`. Because that table is itself replicated,
//! the insert (and every later update the bootstrapper makes to the row) comes back
//! through the change log like any other row. This module decides what such a row
//! means.
//!
//! # Lifecycle
//!
//! ```text
//!   inserted by operator        started_at set            completed_at set,
//!                                                          is_complete = 1
//!   ┌─────────┐  start     ┌─────────┐  historical rows  ┌──────────┐
//!   │ Pending │ ─────────► │ Running │ ────────────────► │ Complete │
//!   └─────────┘            └─────────┘                   └──────────┘
//! ```
//!
//! # Classification
//!
//! [`ControlRowClassifier`] offers total predicates over raw [`RowMap`]s. They never
//! fail: a row that does not look like a start or complete row is simply neither.
//! Once a row is known to be a control row, [`ControlRow::from_row`] decodes and
//! validates every column exactly once so the rest of the subsystem works with
//! typed values.

use crate::row::{RowMap, RowType};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Name of the reserved control table inside the control database.
pub const BOOTSTRAP_TABLE: &str = "bootstrap";

/// Errors raised while decoding a control row.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlRowError {
    /// A required column is absent or null.
    #[error("Control row is missing required field '{0}'")]
    MissingField(&'static str),

    /// A column holds a value of the wrong shape.
    #[error("Control row field '{field}' is invalid: {reason}")]
    InvalidField {
        /// The offending column.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The row does not belong to the control table.
    #[error("Row {database}.{table} is not a bootstrap control row")]
    NotControlRow {
        /// Database of the rejected row.
        database: String,
        /// Table of the rejected row.
        table: String,
    },
}

/// Opaque identifier of a bootstrap request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ControlRowId(i64);

impl ControlRowId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ControlRowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a persisted control row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BootstrapState {
    /// Requested, not yet picked up.
    Pending,
    /// Picked up; historical rows are being (or were being) emitted.
    Running,
    /// All historical rows emitted.
    Complete,
}

impl BootstrapState {
    /// Lower-case name, used in logs and storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bootstrap request as the operator submits it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapRequest {
    /// Database of the table to bootstrap.
    pub database_name: String,
    /// Table to bootstrap.
    pub table_name: String,
    /// Optional column used to filter and order the historical scan.
    pub field_name: Option<String>,
    /// Optional lower bound applied to `field_name`.
    pub start_date: Option<String>,
}

impl BootstrapRequest {
    /// Request a full bootstrap of `database.table`.
    #[must_use]
    pub fn new(database_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            table_name: table_name.into(),
            field_name: None,
            start_date: None,
        }
    }

    /// Only re-emit rows whose `field` is at or after `start_date`.
    #[must_use]
    pub fn since(mut self, field: impl Into<String>, start_date: impl Into<String>) -> Self {
        self.field_name = Some(field.into());
        self.start_date = Some(start_date.into());
        self
    }
}

/// A decoded, validated control row.
///
/// Invariants guaranteed by [`ControlRow::from_row`]:
/// - `database_name` and `table_name` are non-empty
/// - `completed_at.is_some() == is_complete`
/// - `completed_at` is only set when `started_at` is set
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRow {
    /// Identifier of the request.
    pub id: ControlRowId,
    /// Database of the table to bootstrap.
    pub database_name: String,
    /// Table to bootstrap.
    pub table_name: String,
    /// Optional column filter / ordering hint for the scan.
    pub field_name: Option<String>,
    /// Optional lower bound for `field_name`.
    pub start_date: Option<String>,
    /// When the bootstrap started executing.
    pub started_at: Option<DateTime<Utc>>,
    /// When the bootstrap finished.
    pub completed_at: Option<DateTime<Utc>>,
    /// Completion flag.
    pub is_complete: bool,
    /// Number of historical rows emitted by the last completed run.
    pub inserted_rows: u64,
}

impl ControlRow {
    /// Decode a control row from a replicated row.
    ///
    /// # Errors
    ///
    /// - [`ControlRowError::MissingField`] when `id`, `database_name`, `table_name`
    ///   or `is_complete` is absent
    /// - [`ControlRowError::InvalidField`] when a column has the wrong shape or the
    ///   lifecycle columns contradict each other
    pub fn from_row(row: &RowMap) -> Result<Self, ControlRowError> {
        let id = required(row, "id", decode_id)?;
        let database_name = required(row, "database_name", decode_name)?;
        let table_name = required(row, "table_name", decode_name)?;
        let field_name = optional(row, "field_name", decode_text)?.filter(|s| !s.is_empty());
        let start_date = optional(row, "start_date", decode_text)?.filter(|s| !s.is_empty());
        let started_at = optional(row, "started_at", decode_timestamp)?;
        let completed_at = optional(row, "completed_at", decode_timestamp)?;
        let is_complete = required(row, "is_complete", decode_flag)?;
        let inserted_rows = optional(row, "inserted_rows", decode_count)?.unwrap_or(0);

        if completed_at.is_some() != is_complete {
            return Err(ControlRowError::InvalidField {
                field: "is_complete",
                reason: "completed_at must be set exactly when is_complete is true".to_string(),
            });
        }
        if completed_at.is_some() && started_at.is_none() {
            return Err(ControlRowError::InvalidField {
                field: "completed_at",
                reason: "completed_at set before started_at".to_string(),
            });
        }

        Ok(Self {
            id,
            database_name,
            table_name,
            field_name,
            start_date,
            started_at,
            completed_at,
            is_complete,
            inserted_rows,
        })
    }

    /// Lifecycle state implied by the lifecycle columns.
    #[must_use]
    pub const fn state(&self) -> BootstrapState {
        if self.is_complete {
            BootstrapState::Complete
        } else if self.started_at.is_some() {
            BootstrapState::Running
        } else {
            BootstrapState::Pending
        }
    }

    /// Database of the table to bootstrap.
    #[must_use]
    pub fn bootstrap_database(&self) -> &str {
        &self.database_name
    }

    /// Table to bootstrap.
    #[must_use]
    pub fn bootstrap_table(&self) -> &str {
        &self.table_name
    }

    /// Column filter / ordering hint.
    #[must_use]
    pub fn bootstrap_field(&self) -> Option<&str> {
        self.field_name.as_deref()
    }

    /// Lower bound for the column filter.
    #[must_use]
    pub fn bootstrap_start(&self) -> Option<&str> {
        self.start_date.as_deref()
    }

    /// Whether this request targets `database.table`.
    #[must_use]
    pub fn targets(&self, database: &str, table: &str) -> bool {
        self.database_name == database && self.table_name == table
    }

    /// Render the row the way it appears in the change log.
    ///
    /// Used by storage adapters that replicate their own writes and by tests.
    #[must_use]
    pub fn to_row_map(&self, control_database: &str, row_type: RowType, at: DateTime<Utc>) -> RowMap {
        let timestamp = |value: Option<DateTime<Utc>>| {
            value.map_or(Value::Null, |ts| Value::String(ts.to_rfc3339()))
        };
        let text = |value: Option<&String>| value.map_or(Value::Null, |s| Value::String(s.clone()));

        RowMap::new(row_type, control_database, BOOTSTRAP_TABLE, at)
            .with_field("id", self.id.get())
            .with_field("database_name", self.database_name.clone())
            .with_field("table_name", self.table_name.clone())
            .with_field("field_name", text(self.field_name.as_ref()))
            .with_field("start_date", text(self.start_date.as_ref()))
            .with_field("started_at", timestamp(self.started_at))
            .with_field("completed_at", timestamp(self.completed_at))
            .with_field("is_complete", i64::from(self.is_complete))
            .with_field("inserted_rows", self.inserted_rows)
    }
}

/// How a replicated row relates to the bootstrap lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowClass {
    /// Ordinary data row.
    NotBootstrap,
    /// Freshly requested bootstrap (Pending shape).
    Start,
    /// Completed bootstrap (Complete shape).
    Complete,
    /// Any other control-row shape, e.g. a bootstrap observed mid-flight.
    InProgress,
}

/// Total predicates over replicated rows.
///
/// The control database is passed in explicitly; nothing is read from global
/// configuration.
///
/// # Example
///
/// ```
/// use cdc_bootstrap_core::control::{ControlRowClassifier, RowClass};
/// use cdc_bootstrap_core::row::{RowMap, RowType};
/// use chrono::Utc;
///
/// let classifier = ControlRowClassifier::new("maxwell");
/// let row = RowMap::new(RowType::Insert, "maxwell", "bootstrap", Utc::now())
///     .with_field("started_at", serde_json::Value::Null)
///     .with_field("completed_at", serde_json::Value::Null)
///     .with_field("is_complete", 0);
///
/// assert!(classifier.is_start_bootstrap_row(&row));
/// assert_eq!(classifier.classify(&row), RowClass::Start);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlRowClassifier {
    control_database: String,
}

impl ControlRowClassifier {
    /// Create a classifier for the given control database.
    #[must_use]
    pub fn new(control_database: impl Into<String>) -> Self {
        Self {
            control_database: control_database.into(),
        }
    }

    /// The configured control database.
    #[must_use]
    pub fn control_database(&self) -> &str {
        &self.control_database
    }

    /// Whether the row belongs to the control table.
    #[must_use]
    pub fn is_bootstrap_row(&self, row: &RowMap) -> bool {
        row.database() == self.control_database && row.table() == BOOTSTRAP_TABLE
    }

    /// Whether the row is a control row that has not been picked up yet.
    #[must_use]
    pub fn is_start_bootstrap_row(&self, row: &RowMap) -> bool {
        self.is_bootstrap_row(row)
            && row.is_null("started_at")
            && row.is_null("completed_at")
            && completion_flag(row) == Some(false)
    }

    /// Whether the row is a control row whose bootstrap has finished.
    #[must_use]
    pub fn is_complete_bootstrap_row(&self, row: &RowMap) -> bool {
        self.is_bootstrap_row(row)
            && !row.is_null("started_at")
            && !row.is_null("completed_at")
            && completion_flag(row) == Some(true)
    }

    /// Classify a row in one pass.
    #[must_use]
    pub fn classify(&self, row: &RowMap) -> RowClass {
        if !self.is_bootstrap_row(row) {
            RowClass::NotBootstrap
        } else if self.is_start_bootstrap_row(row) {
            RowClass::Start
        } else if self.is_complete_bootstrap_row(row) {
            RowClass::Complete
        } else {
            RowClass::InProgress
        }
    }

    /// Decode a row known to belong to the control table.
    ///
    /// # Errors
    ///
    /// Returns [`ControlRowError::NotControlRow`] for rows outside the control
    /// table, otherwise the errors of [`ControlRow::from_row`].
    pub fn decode(&self, row: &RowMap) -> Result<ControlRow, ControlRowError> {
        if !self.is_bootstrap_row(row) {
            return Err(ControlRowError::NotControlRow {
                database: row.database().to_string(),
                table: row.table().to_string(),
            });
        }
        ControlRow::from_row(row)
    }
}

fn completion_flag(row: &RowMap) -> Option<bool> {
    row.data("is_complete").and_then(flag)
}

/// Read a completion flag stored as a JSON bool, a 0/1 integer of any width or
/// its string form.
fn flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(0), _) | (_, Some(0)) => Some(false),
            (Some(1), _) | (_, Some(1)) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.as_str() {
            "0" | "false" => Some(false),
            "1" | "true" => Some(true),
            _ => None,
        },
        _ => None,
    }
}

fn required<T>(
    row: &RowMap,
    field: &'static str,
    decode: impl Fn(&'static str, &Value) -> Result<T, ControlRowError>,
) -> Result<T, ControlRowError> {
    optional(row, field, decode)?.ok_or(ControlRowError::MissingField(field))
}

fn optional<T>(
    row: &RowMap,
    field: &'static str,
    decode: impl Fn(&'static str, &Value) -> Result<T, ControlRowError>,
) -> Result<Option<T>, ControlRowError> {
    match row.data(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => decode(field, value).map(Some),
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ControlRowError {
    ControlRowError::InvalidField {
        field,
        reason: reason.into(),
    }
}

fn decode_id(field: &'static str, value: &Value) -> Result<ControlRowId, ControlRowError> {
    let id = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    };
    id.map(ControlRowId::new)
        .ok_or_else(|| invalid(field, format!("expected an integer, got {value}")))
}

fn decode_count(field: &'static str, value: &Value) -> Result<u64, ControlRowError> {
    value
        .as_u64()
        .ok_or_else(|| invalid(field, format!("expected a non-negative integer, got {value}")))
}

fn decode_text(field: &'static str, value: &Value) -> Result<String, ControlRowError> {
    value
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| invalid(field, format!("expected a string, got {value}")))
}

fn decode_name(field: &'static str, value: &Value) -> Result<String, ControlRowError> {
    let name = decode_text(field, value)?;
    if name.is_empty() {
        return Err(invalid(field, "must not be empty"));
    }
    Ok(name)
}

fn decode_flag(field: &'static str, value: &Value) -> Result<bool, ControlRowError> {
    flag(value).ok_or_else(|| invalid(field, format!("expected 0/1 or a boolean, got {value}")))
}

fn decode_timestamp(field: &'static str, value: &Value) -> Result<DateTime<Utc>, ControlRowError> {
    let text = value
        .as_str()
        .ok_or_else(|| invalid(field, format!("expected a timestamp string, got {value}")))?;

    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| invalid(field, format!("unrecognised timestamp '{text}'")))
}
