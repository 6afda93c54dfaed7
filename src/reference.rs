//! Image reference parsing.
//!
//! Only what the engine needs: the registry a reference points at (for
//! credential lookup) and a normalized repository name (for cache volume
//! naming). Tags and digests are parsed so they can be stripped.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::AuthError;

/// Registry host that unqualified references resolve to.
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

static PATH_COMPONENT: OnceLock<Regex> = OnceLock::new();
static DOMAIN: OnceLock<Regex> = OnceLock::new();
static TAG: OnceLock<Regex> = OnceLock::new();
static DIGEST: OnceLock<Regex> = OnceLock::new();

fn pattern(cell: &'static OnceLock<Regex>, source: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(source).expect("reference pattern is a valid regex"))
}

fn path_component() -> &'static Regex {
    pattern(&PATH_COMPONENT, r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$")
}

fn domain() -> &'static Regex {
    pattern(
        &DOMAIN,
        r"^(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])(?:\.(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]))*(?::[0-9]+)?$",
    )
}

fn tag() -> &'static Regex {
    pattern(&TAG, r"^[\w][\w.-]{0,127}$")
}

fn digest() -> &'static Regex {
    pattern(
        &DIGEST,
        r"^[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}$",
    )
}

/// A parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    registry: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl Reference {
    /// Parses `[registry/]repository[:tag][@digest]`.
    pub fn parse(input: &str) -> Result<Self, AuthError> {
        let invalid = || AuthError::InvalidReference(input.to_string());

        let (rest, digest_part) = match input.split_once('@') {
            Some((name, d)) => {
                if !digest().is_match(d) {
                    return Err(invalid());
                }
                (name, Some(d.to_string()))
            }
            None => (input, None),
        };

        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag_part) = match rest[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                let t = &rest[split + 1..];
                if !tag().is_match(t) {
                    return Err(invalid());
                }
                (&rest[..split], Some(t.to_string()))
            }
            None => (rest, None),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, remainder))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                if !domain().is_match(first) {
                    return Err(invalid());
                }
                (first.to_string(), remainder.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        };

        if repository.is_empty() || !repository.split('/').all(|c| path_component().is_match(c)) {
            return Err(invalid());
        }

        let registry = if registry == "docker.io" {
            DEFAULT_REGISTRY.to_string()
        } else {
            registry
        };
        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{repository}")
        } else {
            repository
        };

        Ok(Self {
            registry,
            repository,
            tag: tag_part,
            digest: digest_part,
        })
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Fully qualified repository name without tag or digest.
    pub fn context_name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.context_name())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

/// Returns the registry host a reference resolves to.
pub fn registry_of(reference: &str) -> Result<String, AuthError> {
    Reference::parse(reference).map(|r| r.registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unqualified_reference_defaults_to_docker_hub() {
        let reference = Reference::parse("busybox").unwrap();
        assert_eq!(reference.registry(), "index.docker.io");
        assert_eq!(reference.repository(), "library/busybox");
        assert_eq!(reference.tag(), None);
    }

    #[test]
    fn test_registry_with_port_and_tag() {
        let reference = Reference::parse("localhost:5000/team/app:v1.2").unwrap();
        assert_eq!(reference.registry(), "localhost:5000");
        assert_eq!(reference.repository(), "team/app");
        assert_eq!(reference.tag(), Some("v1.2"));
        assert_eq!(reference.context_name(), "localhost:5000/team/app");
    }

    #[test]
    fn test_docker_io_alias_and_user_repo() {
        let reference = Reference::parse("docker.io/cnbs/sample-builder:bionic").unwrap();
        assert_eq!(reference.registry(), "index.docker.io");
        assert_eq!(reference.repository(), "cnbs/sample-builder");
        assert_eq!(
            reference.to_string(),
            "index.docker.io/cnbs/sample-builder:bionic"
        );
    }

    #[test]
    fn test_digest_reference() {
        let digest = format!("sha256:{}", "a".repeat(64));
        let reference = Reference::parse(&format!("gcr.io/proj/img@{digest}")).unwrap();
        assert_eq!(reference.registry(), "gcr.io");
        assert_eq!(reference.digest(), Some(digest.as_str()));
    }

    #[test]
    fn test_invalid_references_are_rejected() {
        for input in ["", "Upper/Case", "some repo", "repo:", "repo@sha256:zz", "/leading"] {
            assert!(
                matches!(Reference::parse(input), Err(AuthError::InvalidReference(_))),
                "expected '{input}' to be rejected"
            );
        }
    }

    #[test]
    fn test_registry_of() {
        assert_eq!(registry_of("some-repo-name").unwrap(), "index.docker.io");
        assert_eq!(registry_of("registry.example.com/a/b").unwrap(), "registry.example.com");
    }
}
