//! Build-wide lifecycle context and the full pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use semver::Version;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::Keychain;
use crate::build::cache::VolumeCache;
use crate::build::context::RunContext;
use crate::build::factory::PhaseFactory;
use crate::build::once::SharedOnce;
use crate::config::{parse_lifecycle_version, LifecycleConfig};
use crate::error::LifecycleError;
use crate::execution::ContainerRuntime;
use crate::logging::Logger;
use crate::reference::Reference;

/// The builder image phases run in, and the user they run as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderImage {
    name: String,
    uid: u32,
    gid: u32,
}

impl BuilderImage {
    pub fn new(name: impl Into<String>, uid: u32, gid: u32) -> Self {
        Self {
            name: name.into(),
            uid,
            gid,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }
}

/// Options for one [`Lifecycle::execute`] run.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Image to produce.
    pub image: String,
    /// Run image the app image is based on.
    pub run_image: String,
    /// Write the image to its registry instead of the local daemon.
    pub publish: bool,
    /// Start from an empty build cache.
    pub clear_cache: bool,
    /// Network mode for detect and build.
    pub network: String,
    /// Extra binds for detect and build.
    pub volumes: Vec<String>,
}

/// Immutable context shared by every phase of one build.
pub struct Lifecycle {
    version: Version,
    builder: BuilderImage,
    app_path: PathBuf,
    layers_volume: String,
    app_volume: String,
    http_proxy: Option<String>,
    https_proxy: Option<String>,
    no_proxy: Option<String>,
    runtime: Arc<dyn ContainerRuntime>,
    logger: Arc<dyn Logger>,
    keychain: Arc<dyn Keychain>,
    app_once: Arc<SharedOnce>,
}

fn volume_name(kind: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("pack-{kind}-{}", &id[..10])
}

impl Lifecycle {
    /// Builds the context for one build.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::InvalidVersion` if the lifecycle version is not
    /// a semantic version, and `LifecycleError::Config` for any other invalid
    /// setting.
    pub fn new(
        config: LifecycleConfig,
        runtime: Arc<dyn ContainerRuntime>,
        logger: Arc<dyn Logger>,
        keychain: Arc<dyn Keychain>,
    ) -> Result<Self, LifecycleError> {
        let version = parse_lifecycle_version(&config.lifecycle_version).map_err(|source| {
            LifecycleError::InvalidVersion {
                version: config.lifecycle_version.clone(),
                source,
            }
        })?;
        config.validate()?;

        let layers_volume = config
            .layers_volume
            .unwrap_or_else(|| volume_name("layers"));
        let app_volume = config.app_volume.unwrap_or_else(|| volume_name("app"));
        debug!(
            "Lifecycle {} using volumes {} and {}",
            version, layers_volume, app_volume
        );

        Ok(Self {
            version,
            builder: BuilderImage::new(config.builder_image, config.uid, config.gid),
            app_path: config.app_path,
            layers_volume,
            app_volume,
            http_proxy: config.http_proxy.filter(|v| !v.is_empty()),
            https_proxy: config.https_proxy.filter(|v| !v.is_empty()),
            no_proxy: config.no_proxy.filter(|v| !v.is_empty()),
            runtime,
            logger,
            keychain,
            app_once: Arc::new(SharedOnce::new()),
        })
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn builder(&self) -> &BuilderImage {
        &self.builder
    }

    pub fn app_path(&self) -> &Path {
        &self.app_path
    }

    pub fn layers_volume(&self) -> &str {
        &self.layers_volume
    }

    pub fn app_volume(&self) -> &str {
        &self.app_volume
    }

    pub fn http_proxy(&self) -> Option<&str> {
        self.http_proxy.as_deref()
    }

    pub fn https_proxy(&self) -> Option<&str> {
        self.https_proxy.as_deref()
    }

    pub fn no_proxy(&self) -> Option<&str> {
        self.no_proxy.as_deref()
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    pub fn keychain(&self) -> &dyn Keychain {
        self.keychain.as_ref()
    }

    pub(crate) fn app_once(&self) -> &Arc<SharedOnce> {
        &self.app_once
    }

    /// Runs detect, restore, analyze, build and export, then releases the
    /// lifecycle volumes whatever the outcome.
    pub async fn execute(
        &self,
        ctx: &RunContext,
        opts: &BuildOptions,
        phase_factory: &dyn PhaseFactory,
    ) -> Result<(), LifecycleError> {
        let result = self.run_pipeline(ctx, opts, phase_factory).await;

        if let Err(e) = self.cleanup().await {
            warn!("{}", e);
        }

        result
    }

    async fn run_pipeline(
        &self,
        ctx: &RunContext,
        opts: &BuildOptions,
        phase_factory: &dyn PhaseFactory,
    ) -> Result<(), LifecycleError> {
        let image = Reference::parse(&opts.image).map_err(LifecycleError::Reference)?;

        let build_cache = VolumeCache::new(&image, "build");
        debug!("Using build cache volume {}", build_cache.name());
        if opts.clear_cache {
            build_cache
                .clear(self.runtime.as_ref())
                .await
                .map_err(|source| LifecycleError::CacheClear {
                    volume: build_cache.name().to_string(),
                    source,
                })?;
            debug!("Build cache {} cleared", build_cache.name());
        }
        let launch_cache = VolumeCache::new(&image, "launch");

        info!("===> DETECTING");
        self.detect(ctx, &opts.network, &opts.volumes, phase_factory)
            .await?;

        info!("===> RESTORING");
        if opts.clear_cache {
            info!("Skipping 'restore' due to clearing cache");
        } else {
            self.restore(ctx, build_cache.name(), phase_factory).await?;
        }

        info!("===> ANALYZING");
        self.analyze(
            ctx,
            &opts.image,
            build_cache.name(),
            opts.publish,
            opts.clear_cache,
            phase_factory,
        )
        .await?;

        info!("===> BUILDING");
        self.build(ctx, &opts.network, &opts.volumes, phase_factory)
            .await?;

        info!("===> EXPORTING");
        self.export(
            ctx,
            &opts.image,
            &opts.run_image,
            opts.publish,
            launch_cache.name(),
            build_cache.name(),
            phase_factory,
        )
        .await?;

        Ok(())
    }

    /// Removes the layers and app volumes.
    ///
    /// Both removals are attempted; the first failure is returned.
    pub async fn cleanup(&self) -> Result<(), LifecycleError> {
        let mut first_error = None;

        for volume in [&self.layers_volume, &self.app_volume] {
            if let Err(source) = self.runtime.remove_volume(volume, true).await {
                warn!("Failed to remove volume {}: {}", volume, source);
                first_error.get_or_insert(LifecycleError::VolumeCleanup {
                    volume: volume.clone(),
                    source,
                });
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}
