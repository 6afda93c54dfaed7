//! Runnable lifecycle phases.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tar::{EntryType, Header};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::build::context::RunContext;
use crate::build::once::SharedOnce;
use crate::build::phases::APP_DIR;
use crate::error::{DockerError, PhaseError};
use crate::execution::{ContainerConfig, ContainerRuntime, HostConfig};
use crate::logging::Logger;

/// A unit of work that runs once and must be cleaned up afterwards.
///
/// Callers invoke `cleanup` exactly once per created value, whether or not
/// `run` succeeded.
#[async_trait]
pub trait RunnerCleaner: Send {
    async fn run(&mut self, ctx: &RunContext) -> Result<(), PhaseError>;
    async fn cleanup(&mut self) -> Result<(), PhaseError>;
}

/// A phase bound to a container runtime.
///
/// Holds a snapshot of the configuration taken when the phase was created.
pub struct Phase {
    pub(crate) name: String,
    pub(crate) ctr_conf: ContainerConfig,
    pub(crate) host_conf: HostConfig,
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    pub(crate) logger: Arc<dyn Logger>,
    pub(crate) uid: u32,
    pub(crate) gid: u32,
    pub(crate) app_path: PathBuf,
    pub(crate) app_once: Arc<SharedOnce>,
    pub(crate) container_id: Option<String>,
}

impl Phase {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn container_config(&self) -> &ContainerConfig {
        &self.ctr_conf
    }

    pub fn host_config(&self) -> &HostConfig {
        &self.host_conf
    }

    /// Id of the container created by `run`, until `cleanup` removes it.
    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    async fn copy_app(&self, id: &str) -> Result<(), PhaseError> {
        let runtime = Arc::clone(&self.runtime);
        let app_path = self.app_path.clone();
        let (uid, gid) = (self.uid, self.gid);
        let id = id.to_string();

        self.app_once
            .call(|| async move {
                let archive =
                    tokio::task::spawn_blocking(move || app_archive(&app_path, uid, gid))
                        .await
                        .map_err(|e| DockerError::CopyFailed(format!("archive task failed: {e}")))??;
                runtime.copy_to_container(&id, "/", archive).await?;
                Ok::<(), PhaseError>(())
            })
            .await
    }

    async fn stream_until_exit(&self, id: &str) -> Result<i64, DockerError> {
        let mut logs = self.runtime.follow_logs(id);
        let mut lines = LineBuffer::default();
        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(chunk) => {
                    for line in lines.push(&chunk) {
                        self.logger.phase_output(&self.name, &line);
                    }
                }
                Err(e) => {
                    warn!("Stopped following output of {}: {}", self.name, e);
                    break;
                }
            }
        }
        if let Some(rest) = lines.finish() {
            self.logger.phase_output(&self.name, &rest);
        }

        self.runtime.wait_container(id).await
    }

    /// Awaits a setup step, abandoning it if the run is cancelled first.
    async fn unless_cancelled<T, F>(&self, ctx: &RunContext, step: F) -> Result<T, PhaseError>
    where
        F: Future<Output = Result<T, PhaseError>>,
    {
        tokio::select! {
            result = step => result,
            _ = ctx.cancelled() => {
                warn!("Cancelling phase {} before its container started", self.name);
                Err(PhaseError::Cancelled { phase: self.name.clone() })
            }
        }
    }
}

/// Reassembles container output into whole lines across chunk boundaries.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    /// Appends `chunk` and drains every line it completes.
    fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);

        let mut lines = Vec::new();
        while let Some(end) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=end).collect();
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }

    /// Returns the unterminated tail, if any.
    fn finish(self) -> Option<String> {
        Some(self.pending).filter(|rest| !rest.is_empty())
    }
}

#[async_trait]
impl RunnerCleaner for Phase {
    async fn run(&mut self, ctx: &RunContext) -> Result<(), PhaseError> {
        if ctx.is_cancelled() {
            return Err(PhaseError::Cancelled {
                phase: self.name.clone(),
            });
        }

        let id = self
            .unless_cancelled(ctx, async {
                self.runtime
                    .create_container(&self.ctr_conf, &self.host_conf)
                    .await
                    .map_err(PhaseError::from)
            })
            .await?;
        debug!("Created container {} for phase {}", id, self.name);
        self.container_id = Some(id.clone());

        self.unless_cancelled(ctx, self.copy_app(&id)).await?;
        self.unless_cancelled(ctx, async {
            self.runtime
                .start_container(&id)
                .await
                .map_err(PhaseError::from)
        })
        .await?;

        let exit_code = tokio::select! {
            code = self.stream_until_exit(&id) => code?,
            _ = ctx.cancelled() => {
                warn!("Cancelling phase {}", self.name);
                if let Err(e) = self.runtime.kill_container(&id).await {
                    warn!("Failed to kill container {}: {}", id, e);
                }
                return Err(PhaseError::Cancelled { phase: self.name.clone() });
            }
        };

        if exit_code != 0 {
            return Err(DockerError::NonZeroExit { code: exit_code }.into());
        }
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<(), PhaseError> {
        if let Some(id) = self.container_id.take() {
            self.runtime.remove_container(&id, true).await?;
            debug!("Removed container {} of phase {}", id, self.name);
        }
        Ok(())
    }
}

/// Tars the application directory under the app dir, owned by `uid:gid`.
pub(crate) fn app_archive(app_path: &Path, uid: u32, gid: u32) -> Result<Vec<u8>, DockerError> {
    if !app_path.is_dir() {
        return Err(DockerError::CopyFailed(format!(
            "app path '{}' is not a directory",
            app_path.display()
        )));
    }

    let root = Path::new(APP_DIR.trim_start_matches('/'));
    let mut builder = tar::Builder::new(Vec::new());

    for entry in WalkDir::new(app_path).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(app_path)
            .map_err(|e| DockerError::CopyFailed(e.to_string()))?;
        let target = root.join(relative);
        let metadata = entry.metadata().map_err(std::io::Error::from)?;

        let mut header = Header::new_gnu();
        header.set_metadata(&metadata);
        header.set_uid(u64::from(uid));
        header.set_gid(u64::from(gid));

        if metadata.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            builder.append_data(&mut header, &target, std::io::empty())?;
        } else if metadata.file_type().is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            builder.append_link(&mut header, &target, &link)?;
        } else {
            let file = std::fs::File::open(entry.path())?;
            builder.append_data(&mut header, &target, file)?;
        }
    }

    Ok(builder.into_inner()?)
}
