//! Lifecycle configuration.
//!
//! This module provides the settings a build's [`Lifecycle`] is constructed
//! from: lifecycle version, builder image, in-container user, application
//! path, shared volume names and proxy settings.
//!
//! [`Lifecycle`]: crate::build::Lifecycle

use std::path::PathBuf;
use thiserror::Error;

/// Lifecycle version assumed when none is configured.
pub const DEFAULT_LIFECYCLE_VERSION: &str = "0.4.1";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for one build's lifecycle.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Semantic version of the lifecycle shipped in the builder.
    pub lifecycle_version: String,
    /// Builder image the phases run in.
    pub builder_image: String,
    /// Builder user id.
    pub uid: u32,
    /// Builder group id.
    pub gid: u32,
    /// Application source directory on the host.
    pub app_path: PathBuf,
    /// Volume holding `/layers`. Generated when unset.
    pub layers_volume: Option<String>,
    /// Volume holding `/workspace`. Generated when unset.
    pub app_volume: Option<String>,
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            lifecycle_version: DEFAULT_LIFECYCLE_VERSION.to_string(),
            builder_image: String::new(),
            uid: 1000,
            gid: 1000,
            app_path: PathBuf::from("."),
            layers_volume: None,
            app_volume: None,
            http_proxy: None,
            https_proxy: None,
            no_proxy: None,
        }
    }
}

impl LifecycleConfig {
    /// Creates a configuration for the given builder image.
    pub fn new(builder_image: impl Into<String>) -> Self {
        Self {
            builder_image: builder_image.into(),
            ..Self::default()
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `LIFECYCLE_VERSION`: Lifecycle version (default: 0.4.1)
    /// - `LIFECYCLE_BUILDER_IMAGE`: Builder image
    /// - `LIFECYCLE_UID` / `LIFECYCLE_GID`: Builder user and group (default: 1000)
    /// - `LIFECYCLE_APP_PATH`: Application directory (default: .)
    /// - `HTTP_PROXY`, `HTTPS_PROXY`, `NO_PROXY`: Proxy settings; the lower-case
    ///   spellings are used when the upper-case ones are unset
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the result
    /// fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(val) = env_value("LIFECYCLE_VERSION") {
            config.lifecycle_version = val;
        }

        if let Some(val) = env_value("LIFECYCLE_BUILDER_IMAGE") {
            config.builder_image = val;
        }

        if let Some(val) = env_value("LIFECYCLE_UID") {
            config.uid = parse_env_value(&val, "LIFECYCLE_UID")?;
        }

        if let Some(val) = env_value("LIFECYCLE_GID") {
            config.gid = parse_env_value(&val, "LIFECYCLE_GID")?;
        }

        if let Some(val) = env_value("LIFECYCLE_APP_PATH") {
            config.app_path = PathBuf::from(val);
        }

        let config = config.with_proxies_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.builder_image.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "builder_image cannot be empty".to_string(),
            ));
        }

        if self.app_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "app_path cannot be empty".to_string(),
            ));
        }

        if let Err(e) = parse_lifecycle_version(&self.lifecycle_version) {
            return Err(ConfigError::ValidationFailed(format!(
                "lifecycle_version '{}' is not a semantic version: {e}",
                self.lifecycle_version
            )));
        }

        Ok(())
    }

    /// Builder method to set the lifecycle version.
    pub fn with_lifecycle_version(mut self, version: impl Into<String>) -> Self {
        self.lifecycle_version = version.into();
        self
    }

    /// Builder method to set the builder user and group.
    pub fn with_user(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    /// Builder method to set the application path.
    pub fn with_app_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.app_path = path.into();
        self
    }

    /// Builder method to name the shared layers and app volumes.
    pub fn with_volumes(
        mut self,
        layers_volume: impl Into<String>,
        app_volume: impl Into<String>,
    ) -> Self {
        self.layers_volume = Some(layers_volume.into());
        self.app_volume = Some(app_volume.into());
        self
    }

    /// Builder method to set proxy settings. Empty values are treated as unset.
    pub fn with_proxies(
        mut self,
        http_proxy: Option<String>,
        https_proxy: Option<String>,
        no_proxy: Option<String>,
    ) -> Self {
        self.http_proxy = http_proxy.filter(|v| !v.is_empty());
        self.https_proxy = https_proxy.filter(|v| !v.is_empty());
        self.no_proxy = no_proxy.filter(|v| !v.is_empty());
        self
    }

    /// Takes proxy settings from `HTTP_PROXY`, `HTTPS_PROXY` and `NO_PROXY`,
    /// falling back to their lower-case spellings.
    pub fn with_proxies_from_env(self) -> Self {
        self.with_proxies(
            proxy_from_env("HTTP_PROXY"),
            proxy_from_env("HTTPS_PROXY"),
            proxy_from_env("NO_PROXY"),
        )
    }
}

/// Parses a lifecycle version, accepting a leading `v` and a missing minor
/// or patch component (`v0.4.1`, `0.5`, `1`).
///
/// # Errors
///
/// Returns the `semver` error for anything else that is not a semantic
/// version.
pub fn parse_lifecycle_version(version: &str) -> Result<semver::Version, semver::Error> {
    let version = version.trim();
    let version = version
        .strip_prefix(['v', 'V'])
        .unwrap_or(version);

    let core_end = version.find(['-', '+']).unwrap_or(version.len());
    let (core, suffix) = version.split_at(core_end);
    let padding = match core.split('.').count() {
        1 => ".0.0",
        2 => ".0",
        _ => "",
    };

    semver::Version::parse(&format!("{core}{padding}{suffix}"))
}

/// Reads a variable, treating empty values as unset.
fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn proxy_from_env(key: &str) -> Option<String> {
    env_value(key).or_else(|| env_value(&key.to_lowercase()))
}

/// Parses an environment variable value into the specified type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}
