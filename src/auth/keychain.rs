//! Registry credential lookup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use tracing::debug;

use crate::error::AuthError;
use crate::reference::DEFAULT_REGISTRY;

/// A credential usable against one registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Basic { username: String, password: String },
    Bearer(String),
}

impl Credential {
    /// Value of the `Authorization` header for this credential.
    pub fn authorization(&self) -> String {
        match self {
            Credential::Basic { username, password } => {
                format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
            }
            Credential::Bearer(token) => format!("Bearer {token}"),
        }
    }
}

/// Resolves credentials for a registry host.
pub trait Keychain: Send + Sync {
    /// Returns `Ok(None)` when the registry should be accessed anonymously.
    fn resolve(&self, registry: &str) -> Result<Option<Credential>, AuthError>;
}

/// Keychain that never has credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousKeychain;

impl Keychain for AnonymousKeychain {
    fn resolve(&self, _registry: &str) -> Result<Option<Credential>, AuthError> {
        Ok(None)
    }
}

#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default, rename = "identitytoken")]
    identity_token: Option<String>,
}

/// Keychain backed by the docker CLI's `config.json`.
///
/// Only inline `auths` entries are read; credential helpers are ignored.
#[derive(Debug, Clone)]
pub struct DockerConfigKeychain {
    path: PathBuf,
}

impl DockerConfigKeychain {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Uses `$DOCKER_CONFIG/config.json`, falling back to `~/.docker/config.json`.
    pub fn from_env() -> Self {
        let dir = std::env::var_os("DOCKER_CONFIG")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| Path::new(&home).join(".docker")))
            .unwrap_or_else(|| PathBuf::from(".docker"));
        Self::new(dir.join("config.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<DockerConfigFile, AuthError> {
        let path = self.path.display().to_string();
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No docker config at {}, using anonymous access", path);
                return Ok(DockerConfigFile::default());
            }
            Err(source) => return Err(AuthError::ConfigRead { path, source }),
        };

        serde_json::from_str(&content).map_err(|source| AuthError::ConfigParse { path, source })
    }
}

/// Keys under which docker may have stored credentials for `registry`.
fn candidate_keys(registry: &str) -> Vec<String> {
    let mut keys = vec![
        registry.to_string(),
        format!("https://{registry}"),
        format!("http://{registry}"),
    ];
    if registry == DEFAULT_REGISTRY {
        keys.push("https://index.docker.io/v1/".to_string());
        keys.push("docker.io".to_string());
    }
    keys
}

fn entry_credential(registry: &str, entry: &AuthEntry) -> Result<Option<Credential>, AuthError> {
    if let Some(token) = entry.identity_token.as_deref().filter(|t| !t.is_empty()) {
        return Ok(Some(Credential::Bearer(token.to_string())));
    }

    if let Some(encoded) = entry.auth.as_deref().filter(|a| !a.is_empty()) {
        let decoded = STANDARD
            .decode(encoded)
            .map_err(|_| AuthError::MalformedAuth(registry.to_string()))?;
        let decoded =
            String::from_utf8(decoded).map_err(|_| AuthError::MalformedAuth(registry.to_string()))?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| AuthError::MalformedAuth(registry.to_string()))?;
        return Ok(Some(Credential::Basic {
            username: username.to_string(),
            password: password.to_string(),
        }));
    }

    match (&entry.username, &entry.password) {
        (Some(username), Some(password)) if !username.is_empty() => Ok(Some(Credential::Basic {
            username: username.clone(),
            password: password.clone(),
        })),
        _ => Ok(None),
    }
}

impl Keychain for DockerConfigKeychain {
    fn resolve(&self, registry: &str) -> Result<Option<Credential>, AuthError> {
        let config = self.load()?;

        for key in candidate_keys(registry) {
            if let Some(entry) = config.auths.get(&key) {
                return entry_credential(registry, entry);
            }
        }

        Ok(None)
    }
}
