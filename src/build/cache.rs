//! Named volumes that persist build and launch caches between builds.

use sha2::{Digest, Sha256};

use crate::error::DockerError;
use crate::execution::ContainerRuntime;
use crate::reference::Reference;

/// A cache volume derived from the image being built.
///
/// The name depends only on the fully qualified repository, so every build
/// of the same repository reuses the same volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeCache {
    name: String,
}

impl VolumeCache {
    pub fn new(image: &Reference, suffix: &str) -> Self {
        let sum = Sha256::digest(image.context_name().as_bytes());
        Self {
            name: format!("pack-cache-{}.{}", hex::encode(&sum[..6]), suffix),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn clear(&self, runtime: &dyn ContainerRuntime) -> Result<(), DockerError> {
        runtime.remove_volume(&self.name, true).await
    }
}
