//! Command-line interface for buildpack-lifecycle.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, BuildArgs, Cli, Commands};
