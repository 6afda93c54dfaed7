//! The five lifecycle phase operations.
//!
//! Each operation composes a [`PhaseConfigProvider`], asks the factory for a
//! phase, runs it and cleans it up. Cleanup happens after every run, failed
//! or not; a cleanup failure is logged and the run result is returned.
//!
//! `-log-level debug` is not applied uniformly: Build and the publishing
//! Analyze pass their arguments through ungated.

use semver::{BuildMetadata, Version};
use tracing::warn;

use crate::build::config_provider::{
    with_args, with_binds, with_daemon_access, with_network, with_registry_access, with_root,
    PhaseConfigProvider,
};
use crate::build::context::RunContext;
use crate::build::factory::PhaseFactory;
use crate::build::phase::RunnerCleaner;
use crate::build::Lifecycle;
use crate::error::PhaseError;

pub const LAYERS_DIR: &str = "/layers";
pub const APP_DIR: &str = "/workspace";
pub const CACHE_DIR: &str = "/cache";
pub const LAUNCH_CACHE_DIR: &str = "/launch-cache";
pub const PLATFORM_DIR: &str = "/platform";

/// Lifecycle versions above this accept `-log-level`.
const LOG_LEVEL_MIN_VERSION: Version = Version::new(0, 4, 0);

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn prepend_arg(arg: &str, mut args: Vec<String>) -> Vec<String> {
    args.insert(0, arg.to_string());
    args
}

/// Runs the phase, then cleans it up regardless of the run result.
async fn run_and_cleanup(
    name: &str,
    mut phase: Box<dyn RunnerCleaner>,
    ctx: &RunContext,
) -> Result<(), PhaseError> {
    let result = phase.run(ctx).await;

    if let Err(e) = phase.cleanup().await {
        warn!("Failed to clean up phase {}: {}", name, e);
    }

    result
}

impl Lifecycle {
    pub async fn detect(
        &self,
        ctx: &RunContext,
        network_mode: &str,
        volumes: &[String],
        phase_factory: &dyn PhaseFactory,
    ) -> Result<(), PhaseError> {
        let phase_name = "detector";

        let config_provider = PhaseConfigProvider::new(
            phase_name,
            vec![
                with_args(self.with_log_level(args(&["-app", APP_DIR, "-platform", PLATFORM_DIR]))),
                with_network(network_mode),
                with_binds(volumes.iter().cloned()),
            ],
        )?;

        let detect = phase_factory.new_phase(phase_name, config_provider)?;
        run_and_cleanup(phase_name, detect, ctx).await
    }

    pub async fn restore(
        &self,
        ctx: &RunContext,
        cache_name: &str,
        phase_factory: &dyn PhaseFactory,
    ) -> Result<(), PhaseError> {
        let phase_name = "restorer";

        let config_provider = PhaseConfigProvider::new(
            phase_name,
            vec![
                with_daemon_access(),
                with_args(self.with_log_level(args(&["-cache-dir", CACHE_DIR, "-layers", LAYERS_DIR]))),
                with_binds([format!("{cache_name}:{CACHE_DIR}")]),
            ],
        )?;

        let restore = phase_factory.new_phase(phase_name, config_provider)?;
        run_and_cleanup(phase_name, restore, ctx).await
    }

    pub async fn analyze(
        &self,
        ctx: &RunContext,
        repo_name: &str,
        cache_name: &str,
        publish: bool,
        clear_cache: bool,
        phase_factory: &dyn PhaseFactory,
    ) -> Result<(), PhaseError> {
        let analyze = self.new_analyze(repo_name, cache_name, publish, clear_cache, phase_factory)?;
        run_and_cleanup("analyzer", analyze, ctx).await
    }

    fn new_analyze(
        &self,
        repo_name: &str,
        cache_name: &str,
        publish: bool,
        clear_cache: bool,
        phase_factory: &dyn PhaseFactory,
    ) -> Result<Box<dyn RunnerCleaner>, PhaseError> {
        let mut analyze_args = args(&["-layers", LAYERS_DIR, repo_name]);
        if clear_cache {
            analyze_args = prepend_arg("-skip-layers", analyze_args);
        } else {
            analyze_args.splice(0..0, args(&["-cache-dir", CACHE_DIR]));
        }

        let phase_name = "analyzer";
        let cache_bind = format!("{cache_name}:{CACHE_DIR}");

        let config_provider = if publish {
            PhaseConfigProvider::new(
                phase_name,
                vec![
                    with_registry_access(self.keychain(), &[repo_name]),
                    with_root(),
                    with_args(analyze_args),
                    with_binds([cache_bind]),
                ],
            )?
        } else {
            PhaseConfigProvider::new(
                phase_name,
                vec![
                    with_daemon_access(),
                    with_args(self.with_log_level(prepend_arg("-daemon", analyze_args))),
                    with_binds([cache_bind]),
                ],
            )?
        };

        phase_factory.new_phase(phase_name, config_provider)
    }

    pub async fn build(
        &self,
        ctx: &RunContext,
        network_mode: &str,
        volumes: &[String],
        phase_factory: &dyn PhaseFactory,
    ) -> Result<(), PhaseError> {
        let phase_name = "builder";

        let config_provider = PhaseConfigProvider::new(
            phase_name,
            vec![
                with_args([
                    "-layers",
                    LAYERS_DIR,
                    "-app",
                    APP_DIR,
                    "-platform",
                    PLATFORM_DIR,
                ]),
                with_network(network_mode),
                with_binds(volumes.iter().cloned()),
            ],
        )?;

        let build = phase_factory.new_phase(phase_name, config_provider)?;
        run_and_cleanup(phase_name, build, ctx).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn export(
        &self,
        ctx: &RunContext,
        repo_name: &str,
        run_image: &str,
        publish: bool,
        launch_cache_name: &str,
        cache_name: &str,
        phase_factory: &dyn PhaseFactory,
    ) -> Result<(), PhaseError> {
        let export = self.new_export(
            repo_name,
            run_image,
            publish,
            launch_cache_name,
            cache_name,
            phase_factory,
        )?;
        run_and_cleanup("exporter", export, ctx).await
    }

    fn new_export(
        &self,
        repo_name: &str,
        run_image: &str,
        publish: bool,
        launch_cache_name: &str,
        cache_name: &str,
        phase_factory: &dyn PhaseFactory,
    ) -> Result<Box<dyn RunnerCleaner>, PhaseError> {
        let mut export_args = args(&[
            "-image",
            run_image,
            "-cache-dir",
            CACHE_DIR,
            "-layers",
            LAYERS_DIR,
            "-app",
            APP_DIR,
            repo_name,
        ]);
        let mut binds = vec![format!("{cache_name}:{CACHE_DIR}")];

        let phase_name = "exporter";

        if publish {
            let config_provider = PhaseConfigProvider::new(
                phase_name,
                vec![
                    with_registry_access(self.keychain(), &[repo_name, run_image]),
                    with_args(self.with_log_level(export_args)),
                    with_root(),
                    with_binds(binds),
                ],
            )?;

            return phase_factory.new_phase(phase_name, config_provider);
        }

        export_args.splice(0..0, args(&["-daemon", "-launch-cache", LAUNCH_CACHE_DIR]));
        binds.push(format!("{launch_cache_name}:{LAUNCH_CACHE_DIR}"));

        let config_provider = PhaseConfigProvider::new(
            phase_name,
            vec![
                with_daemon_access(),
                with_args(self.with_log_level(export_args)),
                with_binds(binds),
            ],
        )?;

        phase_factory.new_phase(phase_name, config_provider)
    }

    /// Prepends `-log-level debug` for verbose builds on lifecycles newer
    /// than 0.4.0.
    pub(crate) fn with_log_level(&self, args: Vec<String>) -> Vec<String> {
        let version = Version {
            build: BuildMetadata::EMPTY,
            ..self.version().clone()
        };

        if version > LOG_LEVEL_MIN_VERSION && self.logger().is_verbose() {
            let mut gated = vec!["-log-level".to_string(), "debug".to_string()];
            gated.extend(args);
            return gated;
        }
        args
    }
}
