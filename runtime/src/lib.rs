//! # CDC Bootstrap Runtime
//!
//! Bootstrap strategies and the reference replication loop.
//!
//! This crate provides the executable side of the bootstrap subsystem: the
//! strategies implementing [`Bootstrapper`](cdc_bootstrap_core::bootstrapper::Bootstrapper)
//! and a pipeline that drives a row stream through one of them.
//!
//! ## Core Components
//!
//! - **Strategies**: [`NoOpBootstrapper`], [`SynchronousBootstrapper`],
//!   [`AsynchronousBootstrapper`], selected at startup through [`AnyBootstrapper`]
//! - **Executor**: [`BootstrapContext`], the shared scan-and-emit routine
//! - **Pipeline**: [`ReplicationPipeline`], routing rows and committing positions
//! - **Metrics**: Prometheus exporter and recorders
//!
//! ## Example
//!
//! ```ignore
//! use cdc_bootstrap_runtime::{AnyBootstrapper, ReplicationPipeline};
//!
//! let bootstrapper = AnyBootstrapper::from_config(&config, store, source, Arc::new(SystemClock));
//! let (mut pipeline, shutdown) =
//!     ReplicationPipeline::new(bootstrapper, producer, positions, &pipeline_config);
//!
//! let from = pipeline.committed_position().await?;
//! pipeline.run(open_stream(from)).await?;
//! ```

/// Strategy selected from configuration
pub mod any;

/// Background emission strategy
pub mod asynchronous;

/// Shared scan-and-emit routine
pub mod executor;

mod lifecycle;

/// Prometheus metrics for observability
pub mod metrics;

/// Disabled strategy
pub mod noop;

/// Reference replication loop
pub mod pipeline;

/// Inline emission strategy
pub mod synchronous;

pub use any::AnyBootstrapper;
pub use asynchronous::AsynchronousBootstrapper;
pub use executor::BootstrapContext;
pub use noop::NoOpBootstrapper;
pub use pipeline::{PipelineError, ReplicationPipeline};
pub use synchronous::SynchronousBootstrapper;
