//! Container execution layer for lifecycle phases.
//!
//! This module defines the runtime capability phases run against and the
//! bollard-backed implementation used for real builds.
//!
//! # Example
//!
//! ```ignore
//! use buildpack_lifecycle::execution::{ContainerConfig, ContainerRuntime, DockerClient, HostConfig};
//!
//! let client = DockerClient::new()?;
//! let id = client.create_container(&ContainerConfig::default(), &HostConfig::default()).await?;
//! client.start_container(&id).await?;
//! let code = client.wait_container(&id).await?;
//! client.remove_container(&id, true).await?;
//! ```

pub mod docker_client;
pub mod runtime;

pub use docker_client::DockerClient;
pub use runtime::{ContainerConfig, ContainerRuntime, HostConfig};
