//! Container runtime capability consumed by lifecycle phases.
//!
//! Phases never talk to a transport directly; everything goes through
//! [`ContainerRuntime`], which the bollard-backed [`DockerClient`] implements
//! for real builds and an in-memory double implements for tests.
//!
//! [`DockerClient`]: crate::execution::DockerClient

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::DockerError;

/// Container-level launch configuration accumulated for one phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Argument vector; the first element is the phase binary.
    pub cmd: Vec<String>,
    /// Labels attached to the container.
    pub labels: HashMap<String, String>,
    /// Image the container is created from.
    pub image: Option<String>,
    /// User to run as. Empty means the image's default user.
    pub user: String,
    /// Environment assignments in `KEY=value` form, in insertion order.
    pub env: Vec<String>,
}

/// Host-level launch configuration accumulated for one phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostConfig {
    /// Bind mounts in `source:target` form, in insertion order.
    pub binds: Vec<String>,
    /// Network mode. Empty means the runtime default.
    pub network_mode: String,
}

/// Narrow interface over a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates (but does not start) a container and returns its id.
    async fn create_container(
        &self,
        config: &ContainerConfig,
        host_config: &HostConfig,
    ) -> Result<String, DockerError>;

    /// Extracts a tar archive into the container filesystem at `path`.
    async fn copy_to_container(
        &self,
        id: &str,
        path: &str,
        archive: Vec<u8>,
    ) -> Result<(), DockerError>;

    async fn start_container(&self, id: &str) -> Result<(), DockerError>;

    /// Follows the container's combined output until it exits.
    fn follow_logs<'a>(&'a self, id: &'a str) -> BoxStream<'a, Result<String, DockerError>>;

    /// Blocks until the container stops and returns its exit code.
    async fn wait_container(&self, id: &str) -> Result<i64, DockerError>;

    async fn kill_container(&self, id: &str) -> Result<(), DockerError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), DockerError>;

    async fn remove_volume(&self, name: &str, force: bool) -> Result<(), DockerError>;
}
