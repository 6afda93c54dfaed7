//! Lifecycle phase orchestration.
//!
//! A build runs the lifecycle binaries of a builder image (detector,
//! restorer, analyzer, builder, exporter) as separate containers sharing
//! layers and app volumes. Each phase is described by a
//! [`PhaseConfigProvider`], materialized by a [`PhaseFactory`] and run to
//! completion before being cleaned up.

pub mod cache;
pub mod config_provider;
pub mod context;
pub mod factory;
pub mod fakes;
pub mod lifecycle;
pub mod once;
pub mod phase;
pub mod phases;

pub use cache::VolumeCache;
pub use config_provider::{
    with_args, with_binds, with_daemon_access, with_lifecycle, with_network,
    with_registry_access, with_root, PhaseConfigProvider, PhaseConfigProviderOperation,
};
pub use context::{CancelHandle, RunContext};
pub use factory::{DefaultPhaseFactory, PhaseFactory};
pub use lifecycle::{BuildOptions, BuilderImage, Lifecycle};
pub use once::SharedOnce;
pub use phase::{Phase, RunnerCleaner};
