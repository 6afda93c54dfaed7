//! buildpack-lifecycle CLI entry point.
//!
//! Initializes logging and delegates to the CLI module for command handling.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments first to get log_level
    let cli = buildpack_lifecycle::cli::parse_cli();

    // Priority: RUST_LOG env var > --log-level CLI arg > default "info"
    buildpack_lifecycle::logging::init(&cli.log_level);

    buildpack_lifecycle::cli::run_with_cli(cli).await
}
