//! The strategy chosen at construction time.

use cdc_bootstrap_core::bootstrapper::{Bootstrapper, Result};
use cdc_bootstrap_core::config::{BootstrapConfig, BootstrapStrategy};
use cdc_bootstrap_core::control::ControlRowClassifier;
use cdc_bootstrap_core::control_store::ControlStore;
use cdc_bootstrap_core::environment::Clock;
use cdc_bootstrap_core::producer::Producer;
use cdc_bootstrap_core::replication::PositionTracker;
use cdc_bootstrap_core::row::RowMap;
use cdc_bootstrap_core::row_source::RowSource;
use std::sync::Arc;

use crate::asynchronous::AsynchronousBootstrapper;
use crate::executor::BootstrapContext;
use crate::noop::NoOpBootstrapper;
use crate::synchronous::SynchronousBootstrapper;

/// One of the bootstrap strategies.
///
/// # Example
///
/// ```ignore
/// let config = BootstrapConfig::from_env()?;
/// let bootstrapper = AnyBootstrapper::from_config(&config, store, source, Arc::new(SystemClock));
/// ```
pub enum AnyBootstrapper {
    /// Bootstrapping disabled.
    Disabled(NoOpBootstrapper),
    /// Inline emission.
    Synchronous(SynchronousBootstrapper),
    /// Emission on a worker task.
    Asynchronous(AsynchronousBootstrapper),
}

impl AnyBootstrapper {
    /// Build the strategy named by `config`.
    #[must_use]
    pub fn from_config(
        config: &BootstrapConfig,
        store: Arc<dyn ControlStore>,
        source: Arc<dyn RowSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let context =
            BootstrapContext::new(store, source, clock).with_progress_interval(config.progress_interval);
        let database = config.control_database.clone();

        tracing::info!(
            strategy = %config.strategy,
            control_database = %database,
            "Bootstrapper configured"
        );
        match config.strategy {
            BootstrapStrategy::Disabled => Self::Disabled(NoOpBootstrapper::new(database)),
            BootstrapStrategy::Synchronous => {
                Self::Synchronous(SynchronousBootstrapper::new(database, context))
            }
            BootstrapStrategy::Asynchronous => {
                Self::Asynchronous(AsynchronousBootstrapper::new(database, context))
            }
        }
    }

    /// The active strategy.
    #[must_use]
    pub const fn strategy(&self) -> BootstrapStrategy {
        match self {
            Self::Disabled(_) => BootstrapStrategy::Disabled,
            Self::Synchronous(_) => BootstrapStrategy::Synchronous,
            Self::Asynchronous(_) => BootstrapStrategy::Asynchronous,
        }
    }
}

impl Bootstrapper for AnyBootstrapper {
    fn classifier(&self) -> &ControlRowClassifier {
        match self {
            Self::Disabled(b) => b.classifier(),
            Self::Synchronous(b) => b.classifier(),
            Self::Asynchronous(b) => b.classifier(),
        }
    }

    async fn should_skip(&self, row: &RowMap) -> Result<bool> {
        match self {
            Self::Disabled(b) => b.should_skip(row).await,
            Self::Synchronous(b) => b.should_skip(row).await,
            Self::Asynchronous(b) => b.should_skip(row).await,
        }
    }

    async fn start_bootstrap(
        &self,
        row: &RowMap,
        producer: &Arc<dyn Producer>,
        position: &dyn PositionTracker,
    ) -> Result<()> {
        match self {
            Self::Disabled(b) => b.start_bootstrap(row, producer, position).await,
            Self::Synchronous(b) => b.start_bootstrap(row, producer, position).await,
            Self::Asynchronous(b) => b.start_bootstrap(row, producer, position).await,
        }
    }

    async fn complete_bootstrap(
        &self,
        row: &RowMap,
        producer: &Arc<dyn Producer>,
        position: &dyn PositionTracker,
    ) -> Result<()> {
        match self {
            Self::Disabled(b) => b.complete_bootstrap(row, producer, position).await,
            Self::Synchronous(b) => b.complete_bootstrap(row, producer, position).await,
            Self::Asynchronous(b) => b.complete_bootstrap(row, producer, position).await,
        }
    }

    async fn resume(&self, producer: &Arc<dyn Producer>, position: &dyn PositionTracker) -> Result<()> {
        match self {
            Self::Disabled(b) => b.resume(producer, position).await,
            Self::Synchronous(b) => b.resume(producer, position).await,
            Self::Asynchronous(b) => b.resume(producer, position).await,
        }
    }

    fn is_running(&self) -> bool {
        match self {
            Self::Disabled(b) => b.is_running(),
            Self::Synchronous(b) => b.is_running(),
            Self::Asynchronous(b) => b.is_running(),
        }
    }

    async fn work(
        &self,
        row: &RowMap,
        producer: &Arc<dyn Producer>,
        position: &dyn PositionTracker,
    ) -> Result<()> {
        match self {
            Self::Disabled(b) => b.work(row, producer, position).await,
            Self::Synchronous(b) => b.work(row, producer, position).await,
            Self::Asynchronous(b) => b.work(row, producer, position).await,
        }
    }
}
