//! Test doubles for exercising phase orchestration without a docker daemon.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;

use crate::auth::{Credential, Keychain};
use crate::build::config_provider::PhaseConfigProvider;
use crate::build::context::RunContext;
use crate::build::factory::PhaseFactory;
use crate::build::phase::RunnerCleaner;
use crate::error::{AuthError, DockerError, PhaseError};
use crate::execution::{ContainerConfig, ContainerRuntime, HostConfig};

/// Phase double counting its calls.
///
/// Clones share their counters, so a test can keep one handle while the
/// orchestrator consumes another.
#[derive(Debug, Clone, Default)]
pub struct FakePhase {
    run_calls: Arc<AtomicUsize>,
    cleanup_calls: Arc<AtomicUsize>,
    run_exit_code: Option<i64>,
    fail_cleanup: bool,
}

impl FakePhase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `run` fail as if the container exited with `code`.
    pub fn which_fails_run_with_exit_code(mut self, code: i64) -> Self {
        self.run_exit_code = Some(code);
        self
    }

    pub fn which_fails_cleanup(mut self) -> Self {
        self.fail_cleanup = true;
        self
    }

    pub fn run_call_count(&self) -> usize {
        self.run_calls.load(Ordering::SeqCst)
    }

    pub fn cleanup_call_count(&self) -> usize {
        self.cleanup_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RunnerCleaner for FakePhase {
    async fn run(&mut self, _ctx: &RunContext) -> Result<(), PhaseError> {
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        match self.run_exit_code {
            Some(code) => Err(DockerError::NonZeroExit { code }.into()),
            None => Ok(()),
        }
    }

    async fn cleanup(&mut self) -> Result<(), PhaseError> {
        self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_cleanup {
            return Err(DockerError::RemoveFailed {
                name: "fake-container".to_string(),
                reason: "injected cleanup failure".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Factory double recording what it was asked to build.
#[derive(Debug, Default)]
pub struct FakePhaseFactory {
    new_calls: AtomicUsize,
    return_for_new: FakePhase,
    new_error: Option<String>,
    names: Mutex<Vec<String>>,
    provider: Mutex<Option<PhaseConfigProvider>>,
}

impl FakePhaseFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out clones of `phase` from every `new_phase` call.
    pub fn which_returns_for_new(mut self, phase: FakePhase) -> Self {
        self.return_for_new = phase;
        self
    }

    /// Makes every `new_phase` call fail with `reason`.
    pub fn which_fails_with(mut self, reason: impl Into<String>) -> Self {
        self.new_error = Some(reason.into());
        self
    }

    pub fn new_call_count(&self) -> usize {
        self.new_calls.load(Ordering::SeqCst)
    }

    /// Name passed to the most recent call.
    pub fn new_called_with_name(&self) -> Option<String> {
        self.names.lock().expect("lock not poisoned").last().cloned()
    }

    /// Names passed to every call, in order.
    pub fn new_called_with_names(&self) -> Vec<String> {
        self.names.lock().expect("lock not poisoned").clone()
    }

    /// Provider passed to the most recent call.
    pub fn new_called_with_provider(&self) -> Option<PhaseConfigProvider> {
        self.provider.lock().expect("lock not poisoned").clone()
    }
}

impl PhaseFactory for FakePhaseFactory {
    fn new_phase(
        &self,
        name: &str,
        provider: PhaseConfigProvider,
    ) -> Result<Box<dyn RunnerCleaner>, PhaseError> {
        self.new_calls.fetch_add(1, Ordering::SeqCst);
        self.names
            .lock()
            .expect("lock not poisoned")
            .push(name.to_string());
        *self.provider.lock().expect("lock not poisoned") = Some(provider);

        if let Some(reason) = &self.new_error {
            return Err(PhaseError::Factory {
                phase: name.to_string(),
                reason: reason.clone(),
            });
        }

        Ok(Box::new(self.return_for_new.clone()))
    }
}

/// Keychain double with fixed credentials, or failing on every lookup.
#[derive(Debug, Default)]
pub struct FakeKeychain {
    credentials: HashMap<String, Credential>,
    fail: bool,
    resolved: Mutex<Vec<String>>,
}

impl FakeKeychain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every lookup with `AuthError::MalformedAuth`.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_credential(mut self, registry: impl Into<String>, credential: Credential) -> Self {
        self.credentials.insert(registry.into(), credential);
        self
    }

    /// Registries looked up so far, in order.
    pub fn resolved_registries(&self) -> Vec<String> {
        self.resolved.lock().expect("lock not poisoned").clone()
    }
}

impl Keychain for FakeKeychain {
    fn resolve(&self, registry: &str) -> Result<Option<Credential>, AuthError> {
        self.resolved
            .lock()
            .expect("lock not poisoned")
            .push(registry.to_string());

        if self.fail {
            return Err(AuthError::MalformedAuth(registry.to_string()));
        }
        Ok(self.credentials.get(registry).cloned())
    }
}

/// A call received by [`FakeRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Create { cmd: Vec<String> },
    Copy { id: String, path: String },
    Start { id: String },
    Wait { id: String },
    Kill { id: String },
    Remove { id: String, force: bool },
    RemoveVolume { name: String, force: bool },
}

/// In-memory container runtime recording every call.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    calls: Mutex<Vec<RuntimeCall>>,
    created: AtomicUsize,
    logs: Vec<String>,
    exit_code: i64,
    copy_delay: Option<Duration>,
    never_exits: bool,
    fail_volume_removal: bool,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output chunks every container produces, passed through unsplit.
    pub fn with_logs(mut self, lines: Vec<&str>) -> Self {
        self.logs = lines.into_iter().map(String::from).collect();
        self
    }

    pub fn with_exit_code(mut self, code: i64) -> Self {
        self.exit_code = code;
        self
    }

    /// Makes every upload take `delay`.
    pub fn with_slow_copy(mut self, delay: Duration) -> Self {
        self.copy_delay = Some(delay);
        self
    }

    /// Makes `wait_container` block forever.
    pub fn which_never_exits(mut self) -> Self {
        self.never_exits = true;
        self
    }

    pub fn which_fails_volume_removal(mut self) -> Self {
        self.fail_volume_removal = true;
        self
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().expect("lock not poisoned").clone()
    }

    fn record(&self, call: RuntimeCall) {
        self.calls.lock().expect("lock not poisoned").push(call);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_container(
        &self,
        config: &ContainerConfig,
        _host_config: &HostConfig,
    ) -> Result<String, DockerError> {
        self.record(RuntimeCall::Create {
            cmd: config.cmd.clone(),
        });
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("container-{n}"))
    }

    async fn copy_to_container(
        &self,
        id: &str,
        path: &str,
        _archive: Vec<u8>,
    ) -> Result<(), DockerError> {
        self.record(RuntimeCall::Copy {
            id: id.to_string(),
            path: path.to_string(),
        });
        if let Some(delay) = self.copy_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn start_container(&self, id: &str) -> Result<(), DockerError> {
        self.record(RuntimeCall::Start { id: id.to_string() });
        Ok(())
    }

    fn follow_logs<'a>(&'a self, _id: &'a str) -> BoxStream<'a, Result<String, DockerError>> {
        stream::iter(self.logs.clone().into_iter().map(Ok)).boxed()
    }

    async fn wait_container(&self, id: &str) -> Result<i64, DockerError> {
        if self.never_exits {
            std::future::pending::<()>().await;
        }
        self.record(RuntimeCall::Wait { id: id.to_string() });
        Ok(self.exit_code)
    }

    async fn kill_container(&self, id: &str) -> Result<(), DockerError> {
        self.record(RuntimeCall::Kill { id: id.to_string() });
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), DockerError> {
        self.record(RuntimeCall::Remove {
            id: id.to_string(),
            force,
        });
        Ok(())
    }

    async fn remove_volume(&self, name: &str, force: bool) -> Result<(), DockerError> {
        self.record(RuntimeCall::RemoveVolume {
            name: name.to_string(),
            force,
        });
        if self.fail_volume_removal {
            return Err(DockerError::RemoveFailed {
                name: name.to_string(),
                reason: "volume is in use".to_string(),
            });
        }
        Ok(())
    }
}
