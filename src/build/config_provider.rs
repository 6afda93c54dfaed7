//! Phase container configuration and the operations that compose it.
//!
//! A [`PhaseConfigProvider`] starts as `[<lifecycle binary>]` with an
//! `author` label and is shaped by an ordered list of operations. Operations
//! either append (arguments, environment, binds) or overwrite a scalar (user,
//! image, network mode), so a later operation always wins for scalars.

use tracing::debug;

use crate::auth::{build_env_var, Keychain};
use crate::build::Lifecycle;
use crate::error::{ConfigOpError, PhaseError};
use crate::execution::{ContainerConfig, HostConfig};

/// Directory holding the lifecycle binaries inside the builder image.
pub const LIFECYCLE_BIN_DIR: &str = "/cnb/lifecycle";

/// Bind giving a phase access to the host's docker daemon.
pub const DOCKER_SOCKET_BIND: &str = "/var/run/docker.sock:/var/run/docker.sock";

pub const AUTHOR_LABEL: &str = "author";
pub const AUTHOR: &str = "pack";

const ROOT_USER: &str = "root";
const HOST_NETWORK: &str = "host";

/// A single, possibly failing, mutation of a provider.
pub type PhaseConfigProviderOperation<'a> =
    Box<dyn FnOnce(&mut PhaseConfigProvider) -> Result<(), ConfigOpError> + Send + 'a>;

/// Accumulated container and host configuration for one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseConfigProvider {
    name: String,
    ctr_conf: ContainerConfig,
    host_conf: HostConfig,
}

impl PhaseConfigProvider {
    /// Creates the provider for phase `name` and applies `ops` in order.
    ///
    /// # Errors
    ///
    /// The first failing operation aborts construction with
    /// [`PhaseError::CreateConfig`].
    pub fn new<'a, I>(name: &str, ops: I) -> Result<Self, PhaseError>
    where
        I: IntoIterator<Item = PhaseConfigProviderOperation<'a>>,
    {
        let mut provider = Self {
            name: name.to_string(),
            ctr_conf: ContainerConfig {
                cmd: vec![format!("{LIFECYCLE_BIN_DIR}/{name}")],
                labels: [(AUTHOR_LABEL.to_string(), AUTHOR.to_string())]
                    .into_iter()
                    .collect(),
                ..Default::default()
            },
            host_conf: HostConfig::default(),
        };

        for op in ops {
            op(&mut provider).map_err(PhaseError::CreateConfig)?;
        }

        debug!("Configured phase {}: {:?}", name, provider.ctr_conf.cmd);
        Ok(provider)
    }

    /// Applies further operations, e.g. lifecycle-wide defaults.
    ///
    /// # Errors
    ///
    /// The first failing operation aborts with [`PhaseError::UpdateConfig`];
    /// operations applied before it stay applied.
    pub fn update<'a, I>(&mut self, ops: I) -> Result<(), PhaseError>
    where
        I: IntoIterator<Item = PhaseConfigProviderOperation<'a>>,
    {
        for op in ops {
            op(self).map_err(PhaseError::UpdateConfig)?;
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn container_config(&self) -> &ContainerConfig {
        &self.ctr_conf
    }

    pub fn host_config(&self) -> &HostConfig {
        &self.host_conf
    }

    pub(crate) fn into_parts(self) -> (ContainerConfig, HostConfig) {
        (self.ctr_conf, self.host_conf)
    }
}

/// Appends `args` to the argument vector.
pub fn with_args<I, S>(args: I) -> PhaseConfigProviderOperation<'static>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let args: Vec<String> = args.into_iter().map(Into::into).collect();
    Box::new(move |provider| {
        provider.ctr_conf.cmd.extend(args);
        Ok(())
    })
}

/// Appends bind mounts in `source:target` form.
pub fn with_binds<I, S>(binds: I) -> PhaseConfigProviderOperation<'static>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let binds: Vec<String> = binds.into_iter().map(Into::into).collect();
    Box::new(move |provider| {
        provider.host_conf.binds.extend(binds);
        Ok(())
    })
}

/// Runs as root with the docker socket mounted.
pub fn with_daemon_access() -> PhaseConfigProviderOperation<'static> {
    Box::new(|provider| {
        provider.ctr_conf.user = ROOT_USER.to_string();
        provider.host_conf.binds.push(DOCKER_SOCKET_BIND.to_string());
        Ok(())
    })
}

pub fn with_network(network_mode: impl Into<String>) -> PhaseConfigProviderOperation<'static> {
    let network_mode = network_mode.into();
    Box::new(move |provider| {
        provider.host_conf.network_mode = network_mode;
        Ok(())
    })
}

/// Injects `CNB_REGISTRY_AUTH` for `repos` and switches to host networking.
///
/// Fails when the keychain cannot resolve credentials.
pub fn with_registry_access<'a, S>(
    keychain: &'a dyn Keychain,
    repos: &[S],
) -> PhaseConfigProviderOperation<'a>
where
    S: AsRef<str>,
{
    let repos: Vec<String> = repos.iter().map(|r| r.as_ref().to_string()).collect();
    Box::new(move |provider| {
        let auth_config = build_env_var(keychain, &repos)?;
        provider
            .ctr_conf
            .env
            .push(format!("CNB_REGISTRY_AUTH={auth_config}"));
        provider.host_conf.network_mode = HOST_NETWORK.to_string();
        Ok(())
    })
}

pub fn with_root() -> PhaseConfigProviderOperation<'static> {
    Box::new(|provider| {
        provider.ctr_conf.user = ROOT_USER.to_string();
        Ok(())
    })
}

/// Sets the builder image and the proxy environment of the lifecycle.
pub fn with_lifecycle(lifecycle: &Lifecycle) -> PhaseConfigProviderOperation<'_> {
    Box::new(move |provider| {
        provider.ctr_conf.image = Some(lifecycle.builder().name().to_string());

        let proxies = [
            ("HTTP_PROXY", "http_proxy", lifecycle.http_proxy()),
            ("HTTPS_PROXY", "https_proxy", lifecycle.https_proxy()),
            ("NO_PROXY", "no_proxy", lifecycle.no_proxy()),
        ];
        for (upper, lower, value) in proxies {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                provider.ctr_conf.env.push(format!("{upper}={value}"));
                provider.ctr_conf.env.push(format!("{lower}={value}"));
            }
        }

        Ok(())
    })
}
