//! # CDC Bootstrap Core
//!
//! Core traits and types for the bootstrap subsystem of a change-data-capture
//! pipeline.
//!
//! A *bootstrap* re-emits the full current contents of a table through the
//! pipeline's producer, interleaved with live replication. An operator requests
//! one by inserting a row into the reserved control table
//! `<control database>.bootstrap`; the replication loop sees that insert like any
//! other row and hands it to the [`Bootstrapper`](bootstrapper::Bootstrapper).
//!
//! ## Core Concepts
//!
//! - **Row**: a replicated or synthesised record ([`row::RowMap`])
//! - **Control row**: a bootstrap request and its lifecycle ([`control::ControlRow`])
//! - **Classifier**: total predicates telling control rows apart
//!   ([`control::ControlRowClassifier`])
//! - **Bootstrapper**: the lifecycle driver ([`bootstrapper::Bootstrapper`])
//! - **Boundaries**: [`producer::Producer`], [`control_store::ControlStore`],
//!   [`row_source::RowSource`], [`replication::PositionTracker`],
//!   [`replication::PositionStore`]
//!
//! ## Data Flow
//!
//! ```text
//! change log ──► RowMap ──► classify ──► not a control row ──► Producer (live)
//!                               │
//!                               └──► control row ──► Bootstrapper
//!                                                       │
//!                                      ControlStore ◄───┤ Pending → Running → Complete
//!                                      RowSource ───────┤ historical rows
//!                                                       ▼
//!                                                    Producer (bootstrap-*)
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod bootstrapper;
pub mod config;
pub mod control;
pub mod control_store;
pub mod producer;
pub mod replication;
pub mod row;
pub mod row_source;

/// Environment module - injected dependencies
///
/// All time-dependent behaviour goes through [`Clock`](environment::Clock) so
/// lifecycle timestamps are deterministic in tests.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
