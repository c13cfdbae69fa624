//! # CDC Bootstrap Testing
//!
//! Testing utilities for the bootstrap subsystem.
//!
//! This crate provides:
//! - In-memory implementations of every boundary trait (control store, row
//!   source, producer, position store) and a scripted replication feed
//! - A fixed clock for deterministic lifecycle timestamps
//! - Builders for control rows and live rows
//! - proptest strategies for classifier properties
//!
//! ## Example
//!
//! ```ignore
//! use cdc_bootstrap_testing::{InMemoryControlStore, RecordingProducer, helpers};
//!
//! #[tokio::test]
//! async fn bootstrap_emits_rows() {
//!     let store = InMemoryControlStore::new("maxwell");
//!     let request = store.request(BootstrapRequest::new("shop", "orders")).await?;
//!     let row = helpers::start_row("maxwell", &request);
//!
//!     bootstrapper.work(&row, &producer, &tracker).await?;
//!     assert_eq!(recording.count_of(RowType::BootstrapStart), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use cdc_bootstrap_core::environment::Clock;

mod control_mocks;

pub use control_mocks::{
    InMemoryControlStore, InMemoryPositionStore, InMemoryRowSource, RecordingProducer,
    ReplicationFeed,
};

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use cdc_bootstrap_testing::mocks::FixedClock;
    /// use cdc_bootstrap_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Builders for rows as they arrive from the change log.
pub mod helpers {
    use super::mocks::test_clock;
    use super::Clock;
    use cdc_bootstrap_core::control::{ControlRow, ControlRowId};
    use cdc_bootstrap_core::replication::Position;
    use cdc_bootstrap_core::row::{RowMap, RowType};

    /// A Pending request for `database.table`.
    #[must_use]
    pub fn pending_request(id: i64, database: &str, table: &str) -> ControlRow {
        ControlRow {
            id: ControlRowId::new(id),
            database_name: database.to_string(),
            table_name: table.to_string(),
            field_name: None,
            start_date: None,
            started_at: None,
            completed_at: None,
            is_complete: false,
            inserted_rows: 0,
        }
    }

    /// The insert the change log carries when `request` is created.
    #[must_use]
    pub fn start_row(control_database: &str, request: &ControlRow) -> RowMap {
        request.to_row_map(control_database, RowType::Insert, test_clock().now())
    }

    /// The update the change log carries when `request` is completed.
    ///
    /// Lifecycle columns missing from `request` are filled from the test clock.
    #[must_use]
    pub fn complete_row(control_database: &str, request: &ControlRow) -> RowMap {
        let now = test_clock().now();
        let completed = ControlRow {
            started_at: request.started_at.or(Some(now)),
            completed_at: request.completed_at.or(Some(now)),
            is_complete: true,
            ..request.clone()
        };
        completed.to_row_map(control_database, RowType::Update, now)
    }

    /// The update the change log carries when `request` is marked Running.
    #[must_use]
    pub fn running_row(control_database: &str, request: &ControlRow) -> RowMap {
        let now = test_clock().now();
        let running = ControlRow {
            started_at: request.started_at.or(Some(now)),
            ..request.clone()
        };
        running.to_row_map(control_database, RowType::Update, now)
    }

    /// An ordinary replicated insert with a single `id` column.
    #[must_use]
    pub fn live_row(database: &str, table: &str, id: i64) -> RowMap {
        RowMap::new(RowType::Insert, database, table, test_clock().now()).with_field("id", id)
    }

    /// Attach a change-log position to `row`.
    #[must_use]
    pub fn at(row: RowMap, log: &str, offset: u64) -> RowMap {
        row.with_position(Some(Position::new(log, offset)))
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use super::mocks::test_clock;
    use super::Clock;
    use cdc_bootstrap_core::row::{RowMap, RowType};
    use proptest::prelude::*;
    use serde_json::Value;

    /// Any row type.
    pub fn arb_row_type() -> impl Strategy<Value = RowType> {
        prop_oneof![
            Just(RowType::Insert),
            Just(RowType::Update),
            Just(RowType::Delete),
            Just(RowType::BootstrapStart),
            Just(RowType::BootstrapInsert),
            Just(RowType::BootstrapComplete),
        ]
    }

    /// A completion flag in any of the encodings seen on the wire, plus junk.
    pub fn arb_flag() -> impl Strategy<Value = Option<Value>> {
        prop_oneof![
            Just(None),
            Just(Some(Value::Null)),
            Just(Some(Value::from(0))),
            Just(Some(Value::from(1))),
            Just(Some(Value::from(2))),
            Just(Some(Value::Bool(false))),
            Just(Some(Value::Bool(true))),
            Just(Some(Value::from("0"))),
            Just(Some(Value::from("1"))),
            Just(Some(Value::from("yes"))),
        ]
    }

    /// A nullable timestamp column: absent, null or set.
    pub fn arb_timestamp() -> impl Strategy<Value = Option<Value>> {
        prop_oneof![
            Just(None),
            Just(Some(Value::Null)),
            Just(Some(Value::from("2025-01-01T00:00:00Z"))),
            Just(Some(Value::from("2025-01-01 12:30:00"))),
        ]
    }

    /// A database name that is sometimes `control_database`.
    pub fn arb_database(control_database: &'static str) -> impl Strategy<Value = String> {
        prop_oneof![
            Just(control_database.to_string()),
            Just("shop".to_string()),
            "[a-z]{1,8}",
        ]
    }

    /// A table name that is sometimes `bootstrap`.
    pub fn arb_table() -> impl Strategy<Value = String> {
        prop_oneof![Just("bootstrap".to_string()), Just("orders".to_string()), "[a-z]{1,8}"]
    }

    /// A row that may or may not be a control row, in any lifecycle shape.
    pub fn arb_row(control_database: &'static str) -> impl Strategy<Value = RowMap> {
        (
            arb_row_type(),
            arb_database(control_database),
            arb_table(),
            arb_timestamp(),
            arb_timestamp(),
            arb_flag(),
        )
            .prop_map(|(row_type, database, table, started_at, completed_at, flag)| {
                let mut row = RowMap::new(row_type, database, table, test_clock().now());
                for (name, value) in [
                    ("started_at", started_at),
                    ("completed_at", completed_at),
                    ("is_complete", flag),
                ] {
                    if let Some(value) = value {
                        row = row.with_field(name, value);
                    }
                }
                row
            })
    }
}

/// Install a `tracing` subscriber for tests.
///
/// Honours `RUST_LOG`, defaulting to `warn`. Safe to call from every test;
/// only the first call installs the subscriber.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};
