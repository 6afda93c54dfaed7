//! buildpack-lifecycle: run Cloud Native Buildpacks lifecycle phases as
//! containers.
//!
//! This library configures, runs and cleans up the detect, restore, analyze,
//! build and export phases of a builder image against a docker daemon.

// Core modules
pub mod auth;
pub mod build;
pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod reference;

// Re-export commonly used error types
pub use error::{AuthError, ConfigOpError, DockerError, LifecycleError, PhaseError};
