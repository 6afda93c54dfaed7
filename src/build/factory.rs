//! Turning phase configuration into runnable phases.

use std::sync::Arc;

use tracing::debug;

use crate::build::config_provider::{with_binds, with_lifecycle, PhaseConfigProvider};
use crate::build::phase::{Phase, RunnerCleaner};
use crate::build::phases::{APP_DIR, LAYERS_DIR};
use crate::build::Lifecycle;
use crate::error::PhaseError;

/// Materializes a phase from its configuration.
pub trait PhaseFactory: Send + Sync {
    fn new_phase(
        &self,
        name: &str,
        provider: PhaseConfigProvider,
    ) -> Result<Box<dyn RunnerCleaner>, PhaseError>;
}

/// Factory producing container-backed [`Phase`]s for a lifecycle.
pub struct DefaultPhaseFactory<'a> {
    lifecycle: &'a Lifecycle,
}

impl<'a> DefaultPhaseFactory<'a> {
    pub fn new(lifecycle: &'a Lifecycle) -> Self {
        Self { lifecycle }
    }

    /// Applies lifecycle-wide defaults and snapshots the result.
    pub fn new_container_phase(
        &self,
        name: &str,
        mut provider: PhaseConfigProvider,
    ) -> Result<Phase, PhaseError> {
        let lifecycle = self.lifecycle;
        provider.update(vec![
            with_lifecycle(lifecycle),
            with_binds([
                format!("{}:{}", lifecycle.layers_volume(), LAYERS_DIR),
                format!("{}:{}", lifecycle.app_volume(), APP_DIR),
            ]),
        ])?;

        let (ctr_conf, host_conf) = provider.into_parts();
        debug!("Created phase {} from {:?}", name, ctr_conf.image);

        Ok(Phase {
            name: name.to_string(),
            ctr_conf,
            host_conf,
            runtime: Arc::clone(lifecycle.runtime()),
            logger: Arc::clone(lifecycle.logger()),
            uid: lifecycle.builder().uid(),
            gid: lifecycle.builder().gid(),
            app_path: lifecycle.app_path().to_path_buf(),
            app_once: Arc::clone(lifecycle.app_once()),
            container_id: None,
        })
    }
}

impl PhaseFactory for DefaultPhaseFactory<'_> {
    fn new_phase(
        &self,
        name: &str,
        provider: PhaseConfigProvider,
    ) -> Result<Box<dyn RunnerCleaner>, PhaseError> {
        Ok(Box::new(self.new_container_phase(name, provider)?))
    }
}
