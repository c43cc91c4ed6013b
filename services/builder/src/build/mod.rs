//! Build dispatch and backends.
//!
//! Each [`BuildStrategy`](crate::artifact::BuildStrategy) variant has a
//! [`Builder`] implementation with the same contract:
//! `build(cancel, artifact, tag) -> image reference`. The [`Dispatcher`]
//! routes artifacts to backends, resolves tags and collects results.
//!
//! ## Backends
//!
//! - `buildpacks`: `pack build`, then tag, then push or resolve the id
//! - `docker`: `docker build` straight to the tag, then push or resolve the id
//! - `custom`: user command producing the tag, then push or resolve the id

mod buildpacks;
mod custom;
mod dispatcher;
mod docker;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use shipyard_tagging::TagPolicyError;

use crate::artifact::{Artifact, StrategyKind};
use crate::cancel::{CancelReason, Cancellation};
use crate::daemon::{DaemonError, ImageDaemon};
use crate::profiling::Profiler;

pub use buildpacks::BuildpacksBuilder;
pub use custom::CustomBuilder;
pub use dispatcher::Dispatcher;
pub use docker::DockerBuilder;

/// Errors from building a single artifact.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The backend failed. `output` is the backend's raw diagnostic text.
    #[error("building {artifact}: {output}")]
    Backend { artifact: String, output: String },

    /// The daemon rejected tagging the built image.
    #[error("tagging {built}->{tag:?}: {source}")]
    Tag {
        built: String,
        tag: String,
        #[source]
        source: DaemonError,
    },

    /// Pushing the tagged image failed.
    #[error("pushing {tag}: {source}")]
    Push {
        tag: String,
        #[source]
        source: DaemonError,
    },

    /// The built image could not be found locally.
    #[error("resolving image id of {tag}: {source}")]
    ImageId {
        tag: String,
        #[source]
        source: DaemonError,
    },

    /// The backend binary could not be started.
    #[error("starting {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// No backend is registered for the artifact's strategy.
    #[error("no builder registered for {kind} artifact {artifact}")]
    UnsupportedStrategy { artifact: String, kind: StrategyKind },

    /// The tag policy could not produce a tag.
    #[error("resolving tag for {artifact}: {source}")]
    TagPolicy {
        artifact: String,
        #[source]
        source: TagPolicyError,
    },

    /// The tag policy could not be prepared for the run.
    #[error("preparing tag policy: {0}")]
    RunTagPolicy(#[source] TagPolicyError),

    /// The build was cancelled or hit its deadline.
    #[error("build cancelled: {0}")]
    Cancelled(#[from] CancelReason),

    /// The build task terminated abnormally.
    #[error("build task failed: {0}")]
    Task(String),
}

impl BuildError {
    /// Returns true if the build was aborted by cancellation or deadline.
    pub fn is_cancelled(&self) -> bool {
        match self {
            BuildError::Cancelled(_) => true,
            BuildError::Tag { source, .. }
            | BuildError::Push { source, .. }
            | BuildError::ImageId { source, .. } => source.cancel_reason().is_some(),
            _ => false,
        }
    }
}

/// A build backend.
#[async_trait]
pub trait Builder: Send + Sync {
    /// Build `artifact`, leave it tagged as `tag` and return the pushed
    /// reference when pushing, otherwise the local image id.
    async fn build(
        &self,
        cancel: &Cancellation,
        artifact: &Artifact,
        tag: &str,
    ) -> Result<String, BuildError>;
}

/// Tag a freshly built image and publish it.
pub async fn tag_and_publish(
    daemon: &dyn ImageDaemon,
    cancel: &Cancellation,
    built: &str,
    tag: &str,
    push: bool,
) -> Result<String, BuildError> {
    daemon
        .tag_image(cancel, built, tag)
        .await
        .map_err(|source| BuildError::Tag {
            built: built.to_string(),
            tag: tag.to_string(),
            source,
        })?;
    debug!(built = %built, tag = %tag, "Tagged image");

    publish(daemon, cancel, tag, push).await
}

/// Push `tag` and return the pushed reference, or return its local id.
pub async fn publish(
    daemon: &dyn ImageDaemon,
    cancel: &Cancellation,
    tag: &str,
    push: bool,
) -> Result<String, BuildError> {
    if push {
        let pushed = daemon
            .push_image(cancel, tag)
            .await
            .map_err(|source| BuildError::Push {
                tag: tag.to_string(),
                source,
            })?;
        info!(tag = %tag, reference = %pushed, "Pushed image");
        return Ok(pushed);
    }

    daemon
        .image_id(cancel, tag)
        .await
        .map_err(|source| BuildError::ImageId {
            tag: tag.to_string(),
            source,
        })
}

/// Register the stock backends on a dispatcher.
pub fn register_default_builders(
    dispatcher: &mut Dispatcher,
    daemon: Arc<dyn ImageDaemon>,
    settings: &BackendSettings,
) {
    dispatcher.register(
        StrategyKind::Docker,
        Arc::new(
            DockerBuilder::new(Arc::clone(&daemon), &settings.docker_binary, settings.push)
                .with_profiler(settings.profiler.clone()),
        ),
    );
    dispatcher.register(
        StrategyKind::Buildpacks,
        Arc::new(
            BuildpacksBuilder::new(Arc::clone(&daemon), &settings.pack_binary, settings.push)
                .with_profiler(settings.profiler.clone()),
        ),
    );
    dispatcher.register(
        StrategyKind::Custom,
        Arc::new(
            CustomBuilder::new(daemon, settings.push).with_profiler(settings.profiler.clone()),
        ),
    );
}

/// Settings shared by the stock backends.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Push built images to their registry.
    pub push: bool,
    pub docker_binary: String,
    pub pack_binary: String,
    /// Receives every command the backends start.
    pub profiler: Profiler,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            push: false,
            docker_binary: "docker".to_string(),
            pack_binary: "pack".to_string(),
            profiler: Profiler::disabled(),
        }
    }
}
