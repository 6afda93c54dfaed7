//! Docker API wrapper using the bollard crate.
//!
//! This module provides the production [`ContainerRuntime`] used by lifecycle
//! phases.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, UploadToContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::HostConfig as BollardHostConfig;
use bollard::volume::RemoveVolumeOptions;
use bollard::Docker;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::debug;

use crate::error::DockerError;
use crate::execution::runtime::{ContainerConfig, ContainerRuntime, HostConfig};

/// Docker client wrapper for container operations.
#[derive(Clone)]
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Creates a new Docker client connecting to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns `DockerError::DaemonUnavailable` if the Docker daemon is not accessible.
    pub fn new() -> Result<Self, DockerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DockerError::DaemonUnavailable(format!("Failed to connect: {e}")))?;

        Ok(Self { docker })
    }

    /// Creates a new Docker client from an existing bollard Docker instance.
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }
}

/// Translates the phase launch configuration into bollard's create payload.
fn to_bollard_config(config: &ContainerConfig, host_config: &HostConfig) -> Config<String> {
    let host_config = BollardHostConfig {
        binds: if host_config.binds.is_empty() {
            None
        } else {
            Some(host_config.binds.clone())
        },
        network_mode: if host_config.network_mode.is_empty() {
            None
        } else {
            Some(host_config.network_mode.clone())
        },
        ..Default::default()
    };

    Config {
        image: config.image.clone(),
        cmd: Some(config.cmd.clone()),
        env: if config.env.is_empty() {
            None
        } else {
            Some(config.env.clone())
        },
        user: if config.user.is_empty() {
            None
        } else {
            Some(config.user.clone())
        },
        labels: Some(config.labels.clone()),
        host_config: Some(host_config),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        ..Default::default()
    }
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Raw chunk text; a chunk may end mid-line.
fn log_message(output: LogOutput) -> String {
    let bytes = match output {
        LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::Console { message }
        | LogOutput::StdIn { message } => message,
    };
    String::from_utf8_lossy(&bytes).into_owned()
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn create_container(
        &self,
        config: &ContainerConfig,
        host_config: &HostConfig,
    ) -> Result<String, DockerError> {
        let response = self
            .docker
            .create_container(
                None::<CreateContainerOptions<String>>,
                to_bollard_config(config, host_config),
            )
            .await
            .map_err(|e| DockerError::CreateFailed(e.to_string()))?;

        for warning in &response.warnings {
            debug!("Docker warning while creating {}: {}", response.id, warning);
        }

        Ok(response.id)
    }

    async fn copy_to_container(
        &self,
        id: &str,
        path: &str,
        archive: Vec<u8>,
    ) -> Result<(), DockerError> {
        let options = UploadToContainerOptions {
            path: path.to_string(),
            ..Default::default()
        };

        self.docker
            .upload_to_container(id, Some(options), archive.into())
            .await
            .map_err(|e| DockerError::CopyFailed(e.to_string()))
    }

    async fn start_container(&self, id: &str) -> Result<(), DockerError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| DockerError::RunFailed(format!("Failed to start container: {e}")))
    }

    fn follow_logs<'a>(&'a self, id: &'a str) -> BoxStream<'a, Result<String, DockerError>> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        self.docker
            .logs(id, Some(options))
            .map(|chunk| {
                chunk
                    .map(log_message)
                    .map_err(|e| DockerError::RunFailed(format!("Error reading logs: {e}")))
            })
            .boxed()
    }

    async fn wait_container(&self, id: &str) -> Result<i64, DockerError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(id, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero status as an error; callers want the code
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(DockerError::RunFailed(format!(
                "Error waiting for container: {e}"
            ))),
            None => Err(DockerError::RunFailed(
                "Container wait stream ended without a status".to_string(),
            )),
        }
    }

    async fn kill_container(&self, id: &str) -> Result<(), DockerError> {
        self.docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await
            .map_err(|e| DockerError::RunFailed(format!("Failed to kill container: {e}")))
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), DockerError> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };

        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    DockerError::ContainerNotFound { id: id.to_string() }
                } else {
                    DockerError::RemoveFailed {
                        name: id.to_string(),
                        reason: e.to_string(),
                    }
                }
            })
    }

    async fn remove_volume(&self, name: &str, force: bool) -> Result<(), DockerError> {
        self.docker
            .remove_volume(name, Some(RemoveVolumeOptions { force }))
            .await
            .map_err(|e| DockerError::RemoveFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })
    }
}
