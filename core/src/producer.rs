//! Producer abstraction: the sink every emitted row is pushed to.
//!
//! The replication loop pushes live rows, bootstrappers push the rows they
//! synthesise. The producer does not care where a row came from; consumers tell
//! bootstrap-origin rows apart by their [`RowType`](crate::row::RowType).
//!
//! # Delivery Semantics
//!
//! - **At-least-once**: a row may be delivered more than once (historical rows are
//!   re-emitted when a bootstrap is resumed after a crash)
//! - **Ordered per table**: rows of one table keep their push order
//! - **Failures propagate**: a rejected push is reported to the caller, never
//!   dropped silently
//!
//! # Implementations
//!
//! - `RecordingProducer` (in `cdc-bootstrap-testing`): captures rows for assertions
//! - `RedpandaProducer` (in `cdc-bootstrap-redpanda`): Kafka-compatible production sink
//!
//! # Example
//!
//! ```rust,ignore
//! use cdc_bootstrap_core::producer::Producer;
//!
//! async fn forward(producer: &dyn Producer, row: &RowMap) -> Result<(), ProducerError> {
//!     producer.push(row).await
//! }
//! ```

use crate::row::RowMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur while pushing rows.
#[derive(Error, Debug, Clone)]
pub enum ProducerError {
    /// Failed to connect to the downstream system.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Downstream rejected the row.
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// The row could not be serialized.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Generic error for other failures.
    #[error("Producer error: {0}")]
    Other(String),
}

/// Sink for emitted rows.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so bootstrappers and the pipeline can share an `Arc<dyn Producer>`, including
/// across spawned tasks.
pub trait Producer: Send + Sync {
    /// Push a row downstream.
    ///
    /// # Errors
    ///
    /// Returns [`ProducerError`] if the row could not be delivered.
    fn push(&self, row: &RowMap) -> Pin<Box<dyn Future<Output = Result<(), ProducerError>> + Send + '_>>;
}
