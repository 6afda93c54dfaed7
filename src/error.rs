//! Error types for lifecycle phase orchestration.
//!
//! Defines error types for each layer of the engine:
//! - Container runtime operations
//! - Registry credential resolution
//! - Phase configuration, materialization and execution
//! - Whole-build lifecycle operations

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur during Docker operations.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("Docker daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("Failed to create container: {0}")]
    CreateFailed(String),

    #[error("Docker run failed: {0}")]
    RunFailed(String),

    #[error("Failed to copy files to container: {0}")]
    CopyFailed(String),

    #[error("Failed to remove '{name}': {reason}")]
    RemoveFailed { name: String, reason: String },

    #[error("Container '{id}' not found")]
    ContainerNotFound { id: String },

    #[error("Container exited with non-zero code {code}")]
    NonZeroExit { code: i64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while resolving registry credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid image reference '{0}'")]
    InvalidReference(String),

    #[error("Failed to read docker config '{path}': {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse docker config '{path}': {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Malformed auth entry for registry '{0}'")]
    MalformedAuth(String),

    #[error("Failed to serialize registry auth: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure of a single configuration operation applied to a phase provider.
#[derive(Debug, Error)]
pub enum ConfigOpError {
    #[error("registry access: {0}")]
    Auth(#[from] AuthError),
}

/// Errors produced while configuring, materializing or running a phase.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("create phase config: {0}")]
    CreateConfig(#[source] ConfigOpError),

    #[error("update phase config: {0}")]
    UpdateConfig(#[source] ConfigOpError),

    #[error("Failed to create phase '{phase}': {reason}")]
    Factory { phase: String, reason: String },

    #[error("Docker error: {0}")]
    Runtime(#[from] DockerError),

    #[error("Phase '{phase}' was cancelled")]
    Cancelled { phase: String },

    #[error("Failed to prepare app: {0}")]
    AppPreparation(String),
}

/// Errors that can occur across a whole build.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Invalid lifecycle version '{version}': {source}")]
    InvalidVersion {
        version: String,
        #[source]
        source: semver::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid image reference: {0}")]
    Reference(#[source] AuthError),

    #[error("Phase error: {0}")]
    Phase(#[from] PhaseError),

    #[error("Failed to clear cache volume '{volume}': {source}")]
    CacheClear {
        volume: String,
        #[source]
        source: DockerError,
    },

    #[error("Failed to clean up volume '{volume}': {source}")]
    VolumeCleanup {
        volume: String,
        #[source]
        source: DockerError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_carry_stage_label() {
        let create = PhaseError::CreateConfig(ConfigOpError::Auth(AuthError::InvalidReference(
            "Bad Ref".to_string(),
        )));
        let update = PhaseError::UpdateConfig(ConfigOpError::Auth(AuthError::MalformedAuth(
            "index.docker.io".to_string(),
        )));

        assert!(create.to_string().starts_with("create phase config: "));
        assert!(create.to_string().contains("Bad Ref"));
        assert!(update.to_string().starts_with("update phase config: "));
    }

    #[test]
    fn test_runtime_error_conversion() {
        let err: PhaseError = DockerError::NonZeroExit { code: 3 }.into();
        assert!(matches!(
            err,
            PhaseError::Runtime(DockerError::NonZeroExit { code: 3 })
        ));
        assert_eq!(
            err.to_string(),
            "Docker error: Container exited with non-zero code 3"
        );
    }
}
