//! Replication position tracking.
//!
//! The replication loop reads rows from the source's change log and remembers how
//! far it got. Two things are modelled here:
//!
//! - [`PositionTracker`]: the live, in-memory "last position read" handle that the
//!   loop advances for every row and that bootstrappers consult to stamp the rows
//!   they synthesise.
//! - [`PositionStore`]: durable storage for the committed position of a client,
//!   used to resume replication after a restart.
//!
//! # Checkpoints vs Live Position
//!
//! The live position moves with every row. The committed position only moves when
//! the loop decides it is safe: while a bootstrap is running the loop keeps the old
//! committed position so a crash mid-bootstrap replays the control row
//! (at-least-once).
//!
//! ```text
//! change log ──► rows ──► PositionTracker (live)
//!                            │
//!                            │ every N rows, unless bootstrapping
//!                            ▼
//!                        PositionStore (committed)
//! ```

use crate::row::RowMap;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

/// Errors raised by the replication boundary.
#[derive(Error, Debug, Clone)]
pub enum ReplicationError {
    /// The change-log stream failed to deliver a row.
    #[error("Replication stream error: {0}")]
    Stream(String),

    /// Saving or loading a committed position failed.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
}

/// Stream of replicated rows, in change-log order.
pub type RowStream = Pin<Box<dyn Stream<Item = Result<RowMap, ReplicationError>> + Send>>;

/// A point in the source's change log.
///
/// `log` names the log segment (binlog file, WAL timeline, ...) and `offset` is
/// the byte or sequence offset inside it. Positions order by segment name first
/// and offset second.
///
/// # Example
///
/// ```
/// use cdc_bootstrap_core::replication::Position;
///
/// let earlier = Position::new("binlog.000001", 900);
/// let later = Position::new("binlog.000002", 4);
/// assert!(earlier < later);
/// assert_eq!(later.to_string(), "binlog.000002:4");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Log segment name.
    pub log: String,
    /// Offset within the segment.
    pub offset: u64,
}

impl Position {
    /// Create a new position.
    #[must_use]
    pub fn new(log: impl Into<String>, offset: u64) -> Self {
        Self {
            log: log.into(),
            offset,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.log, self.offset)
    }
}

/// Handle onto the replication loop's live position.
pub trait PositionTracker: Send + Sync {
    /// The position of the last row read, `None` before the first row.
    fn current(&self) -> Option<Position>;
}

/// Thread-safe [`PositionTracker`] the replication loop advances row by row.
#[derive(Debug, Default)]
pub struct TrackedPosition {
    last: RwLock<Option<Position>>,
}

impl TrackedPosition {
    /// Create a tracker, optionally seeded with a committed position.
    #[must_use]
    pub const fn new(initial: Option<Position>) -> Self {
        Self {
            last: RwLock::new(initial),
        }
    }

    /// Record that a row at `position` has been read.
    pub fn advance(&self, position: Position) {
        *self.last.write().unwrap_or_else(PoisonError::into_inner) = Some(position);
    }
}

impl PositionTracker for TrackedPosition {
    fn current(&self) -> Option<Position> {
        self.last
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Durable storage for a client's committed replication position.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the pipeline can hold an
/// `Arc<dyn PositionStore>`.
pub trait PositionStore: Send + Sync {
    /// Persist the committed position for `client_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::Checkpoint`] if the save fails.
    fn save_position(
        &self,
        client_id: &str,
        position: Position,
    ) -> Pin<Box<dyn Future<Output = Result<(), ReplicationError>> + Send + '_>>;

    /// Load the committed position for `client_id`, `None` for a new client.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::Checkpoint`] if the load fails.
    fn load_position(
        &self,
        client_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Position>, ReplicationError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_order_by_log_then_offset() {
        let a = Position::new("binlog.000001", 10);
        let b = Position::new("binlog.000001", 20);
        let c = Position::new("binlog.000002", 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn tracker_reports_last_advanced_position() {
        let tracker = TrackedPosition::new(None);
        assert_eq!(tracker.current(), None);

        tracker.advance(Position::new("binlog.000001", 4));
        tracker.advance(Position::new("binlog.000001", 120));

        assert_eq!(tracker.current(), Some(Position::new("binlog.000001", 120)));
    }

    #[test]
    fn tracker_can_be_seeded() {
        let tracker = TrackedPosition::new(Some(Position::new("binlog.000009", 77)));
        assert_eq!(tracker.current().map(|p| p.offset), Some(77));
    }
}
