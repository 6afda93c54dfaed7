//! Registry credentials for phases that talk to a registry directly.
//!
//! [`build_env_var`] produces the value of `CNB_REGISTRY_AUTH`: a JSON object
//! mapping registry hosts to `Authorization` header values.

pub mod keychain;

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::AuthError;
use crate::reference::registry_of;

pub use keychain::{AnonymousKeychain, Credential, DockerConfigKeychain, Keychain};

/// Serializes the credentials for every registry referenced by `repos`.
///
/// Registries the keychain has no credential for are left out, so a fully
/// anonymous build yields `{}`.
pub fn build_env_var<S: AsRef<str>>(
    keychain: &dyn Keychain,
    repos: &[S],
) -> Result<String, AuthError> {
    let mut headers = BTreeMap::new();

    for repo in repos {
        let registry = registry_of(repo.as_ref())?;
        if headers.contains_key(&registry) {
            continue;
        }
        match keychain.resolve(&registry)? {
            Some(credential) => {
                headers.insert(registry, credential.authorization());
            }
            None => debug!("No credentials for registry {}", registry),
        }
    }

    Ok(serde_json::to_string(&headers)?)
}
