//! Strategy for processes with bootstrapping disabled.

use cdc_bootstrap_core::bootstrapper::{Bootstrapper, Result};
use cdc_bootstrap_core::control::ControlRowClassifier;
use cdc_bootstrap_core::producer::Producer;
use cdc_bootstrap_core::replication::PositionTracker;
use cdc_bootstrap_core::row::RowMap;
use std::sync::Arc;

/// Recognises control rows but never acts on them.
///
/// Control rows are still classified (so the pipeline keeps them away from the
/// producer); start and complete requests are logged and dropped, and nothing is
/// ever running.
#[derive(Clone, Debug)]
pub struct NoOpBootstrapper {
    classifier: ControlRowClassifier,
}

impl NoOpBootstrapper {
    /// Create a disabled bootstrapper for `control_database`.
    #[must_use]
    pub fn new(control_database: impl Into<String>) -> Self {
        Self {
            classifier: ControlRowClassifier::new(control_database),
        }
    }
}

impl Bootstrapper for NoOpBootstrapper {
    fn classifier(&self) -> &ControlRowClassifier {
        &self.classifier
    }

    async fn should_skip(&self, _row: &RowMap) -> Result<bool> {
        Ok(false)
    }

    async fn start_bootstrap(
        &self,
        row: &RowMap,
        _producer: &Arc<dyn Producer>,
        _position: &dyn PositionTracker,
    ) -> Result<()> {
        tracing::warn!(row = %row, "Bootstrapping is disabled, ignoring request");
        Ok(())
    }

    async fn complete_bootstrap(
        &self,
        row: &RowMap,
        _producer: &Arc<dyn Producer>,
        _position: &dyn PositionTracker,
    ) -> Result<()> {
        tracing::debug!(row = %row, "Bootstrapping is disabled, ignoring completion");
        Ok(())
    }

    async fn resume(&self, _producer: &Arc<dyn Producer>, _position: &dyn PositionTracker) -> Result<()> {
        Ok(())
    }

    fn is_running(&self) -> bool {
        false
    }
}
