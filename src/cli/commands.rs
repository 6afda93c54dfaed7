//! CLI command definitions for buildpack-lifecycle.
//!
//! The CLI is a thin wrapper: it turns flags and environment into a
//! [`LifecycleConfig`] and [`BuildOptions`] and runs the full pipeline
//! against the local docker daemon.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use crate::auth::DockerConfigKeychain;
use crate::build::{BuildOptions, CancelHandle, DefaultPhaseFactory, Lifecycle, RunContext};
use crate::config::{LifecycleConfig, DEFAULT_LIFECYCLE_VERSION};
use crate::execution::DockerClient;
use crate::logging::TracingLogger;

/// Network mode used by detect and build when none is given.
const DEFAULT_NETWORK: &str = "bridge";

/// 128 + SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Build application images by running lifecycle phases in containers.
#[derive(Parser, Debug)]
#[command(name = "buildpack-lifecycle")]
#[command(about = "Run buildpack lifecycle phases against a docker daemon")]
#[command(version)]
#[command(
    long_about = "buildpack-lifecycle turns application source into a runnable image by running the detector, restorer, analyzer, builder and exporter of a builder image as containers.\n\nExample usage:\n  buildpack-lifecycle build my/app --builder cnbs/sample-builder:bionic --run-image cnbs/sample-stack-run:bionic"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Build an application image.
    Build(BuildArgs),
}

/// Arguments for `buildpack-lifecycle build`.
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Name of the image to build.
    pub image: String,

    /// Builder image providing the lifecycle and buildpacks.
    #[arg(short = 'B', long, env = "LIFECYCLE_BUILDER_IMAGE")]
    pub builder: String,

    /// Run image the application image is based on.
    #[arg(long)]
    pub run_image: String,

    /// Application source directory.
    #[arg(short = 'p', long, env = "LIFECYCLE_APP_PATH", default_value = ".")]
    pub path: PathBuf,

    /// Publish to the image's registry instead of the local daemon.
    #[arg(long)]
    pub publish: bool,

    /// Clear the build cache before building.
    #[arg(long)]
    pub clear_cache: bool,

    /// Network mode for detect and build.
    #[arg(long, default_value = DEFAULT_NETWORK)]
    pub network: String,

    /// Extra bind mount for detect and build (`source:target[:mode]`).
    /// Repeatable.
    #[arg(long = "volume")]
    pub volumes: Vec<String>,

    /// Version of the lifecycle shipped in the builder.
    #[arg(long, env = "LIFECYCLE_VERSION", default_value = DEFAULT_LIFECYCLE_VERSION)]
    pub lifecycle_version: String,

    /// Builder user id.
    #[arg(long, env = "LIFECYCLE_UID", default_value = "1000")]
    pub uid: u32,

    /// Builder group id.
    #[arg(long, env = "LIFECYCLE_GID", default_value = "1000")]
    pub gid: u32,
}

impl BuildArgs {
    fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig::new(&self.builder)
            .with_lifecycle_version(&self.lifecycle_version)
            .with_user(self.uid, self.gid)
            .with_app_path(&self.path)
            .with_proxies_from_env()
    }

    fn build_options(&self) -> BuildOptions {
        BuildOptions {
            image: self.image.clone(),
            run_image: self.run_image.clone(),
            publish: self.publish,
            clear_cache: self.clear_cache,
            network: self.network.clone(),
            volumes: self.volumes.clone(),
        }
    }
}

/// Parse CLI arguments without running any command.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
///
/// Expects logging to be initialized already; verbosity is read from the
/// installed subscriber.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Build(args) => run_build_command(args).await,
    }
}

async fn run_build_command(args: BuildArgs) -> anyhow::Result<()> {
    let runtime = DockerClient::new().context("Failed to connect to docker")?;
    let keychain = DockerConfigKeychain::from_env();
    info!("Using registry credentials from {}", keychain.path().display());

    let lifecycle = Lifecycle::new(
        args.lifecycle_config(),
        Arc::new(runtime),
        Arc::new(TracingLogger::from_subscriber()),
        Arc::new(keychain),
    )?;

    let (ctx, cancel) = RunContext::with_cancel();
    tokio::spawn(async move {
        if watch_interrupts(tokio::signal::ctrl_c, cancel).await {
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    });

    let phase_factory = DefaultPhaseFactory::new(&lifecycle);
    lifecycle
        .execute(&ctx, &args.build_options(), &phase_factory)
        .await
        .with_context(|| format!("Failed to build {}", args.image))?;

    info!("Successfully built image {}", args.image);
    Ok(())
}

/// Cancels the build on the first interrupt.
///
/// Returns `true` once a second interrupt arrives, meaning the caller should
/// exit without waiting for cleanup. Returns `false` if signals cannot be
/// received.
async fn watch_interrupts<F, Fut>(mut next_signal: F, cancel: CancelHandle) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = next_signal().await {
        warn!("Failed to listen for interrupts: {}", e);
        return false;
    }
    warn!("Interrupted, stopping the running phase (interrupt again to exit now)");
    cancel.cancel();

    if next_signal().await.is_err() {
        return false;
    }
    warn!("Interrupted again, exiting");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_parse_build_command() {
        let cli = Cli::try_parse_from([
            "buildpack-lifecycle",
            "build",
            "some/app",
            "--builder",
            "some/builder",
            "--run-image",
            "some/run",
            "--publish",
            "--volume",
            "a:/a",
            "--volume",
            "b:/b:ro",
            "--lifecycle-version",
            "0.5.0",
        ])
        .expect("arguments should parse");

        let Commands::Build(args) = cli.command;
        assert_eq!(cli.log_level, "info");
        assert_eq!(args.image, "some/app");
        assert!(args.publish);
        assert!(!args.clear_cache);
        assert_eq!(args.network, "bridge");

        let options = args.build_options();
        assert_eq!(options.run_image, "some/run");
        assert_eq!(options.volumes, vec!["a:/a", "b:/b:ro"]);

        let config = args.lifecycle_config();
        assert_eq!(config.builder_image, "some/builder");
        assert_eq!(config.lifecycle_version, "0.5.0");
    }

    #[tokio::test]
    async fn test_second_interrupt_requests_exit() {
        let (ctx, cancel) = RunContext::with_cancel();
        let signals = AtomicUsize::new(0);

        let exit = watch_interrupts(
            || {
                signals.fetch_add(1, Ordering::SeqCst);
                async { Ok::<(), std::io::Error>(()) }
            },
            cancel,
        )
        .await;

        assert!(exit);
        assert!(ctx.is_cancelled());
        assert_eq!(signals.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_interrupt_only_cancels() {
        let (ctx, cancel) = RunContext::with_cancel();
        let signals = AtomicUsize::new(0);

        let exit = watch_interrupts(
            || {
                let n = signals.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Ok(())
                    } else {
                        Err(std::io::Error::other("signal stream closed"))
                    }
                }
            },
            cancel,
        )
        .await;

        assert!(!exit);
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_unavailable_signals_leave_build_running() {
        let (ctx, cancel) = RunContext::with_cancel();

        let exit = watch_interrupts(
            || async { Err::<(), _>(std::io::Error::other("no signal handler")) },
            cancel,
        )
        .await;

        assert!(!exit);
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn test_build_requires_run_image() {
        let result = Cli::try_parse_from([
            "buildpack-lifecycle",
            "build",
            "some/app",
            "--builder",
            "some/builder",
        ]);
        assert!(result.is_err());
    }
}
