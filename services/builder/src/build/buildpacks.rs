//! Cloud Native Buildpacks backend.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{tag_and_publish, BuildError, Builder};
use crate::artifact::{tagged_name, Artifact, BuildStrategy, BuildpacksArtifact};
use crate::cancel::Cancellation;
use crate::daemon::ImageDaemon;
use crate::process::{command, diagnostic};
use crate::profiling::Profiler;

/// Builds artifacts with `pack build`.
pub struct BuildpacksBuilder {
    daemon: Arc<dyn ImageDaemon>,
    pack_binary: String,
    push: bool,
    profiler: Profiler,
}

impl BuildpacksBuilder {
    pub fn new(daemon: Arc<dyn ImageDaemon>, pack_binary: &str, push: bool) -> Self {
        Self {
            daemon,
            pack_binary: pack_binary.to_string(),
            push,
            profiler: Profiler::disabled(),
        }
    }

    /// Record started commands in `profiler`'s exec log.
    pub fn with_profiler(mut self, profiler: Profiler) -> Self {
        self.profiler = profiler;
        self
    }

    /// Run `pack build` and return the reference of the local image it produced.
    async fn run_pack(
        &self,
        cancel: &Cancellation,
        artifact: &Artifact,
        params: &BuildpacksArtifact,
    ) -> Result<String, BuildError> {
        let built = tagged_name(&artifact.image_name, "latest");
        let args = pack_args(&built, artifact, params);

        info!(
            artifact = %artifact.image_name,
            builder = %params.builder,
            "Building with buildpacks"
        );

        let mut cmd = command(&self.pack_binary);
        cmd.args(&args);
        self.profiler.record_command(&cmd);
        let output = cancel
            .run(cmd.output())
            .await?
            .map_err(|source| BuildError::Spawn {
                program: self.pack_binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(BuildError::Backend {
                artifact: artifact.image_name.clone(),
                output: diagnostic(&output),
            });
        }

        Ok(built)
    }
}

fn pack_args(built: &str, artifact: &Artifact, params: &BuildpacksArtifact) -> Vec<String> {
    let mut args = vec![
        "build".to_string(),
        built.to_string(),
        "--builder".to_string(),
        params.builder.clone(),
        "--path".to_string(),
        artifact.context.display().to_string(),
    ];
    if let Some(run_image) = &params.run_image {
        args.push("--run-image".to_string());
        args.push(run_image.clone());
    }
    for buildpack in &params.buildpacks {
        args.push("--buildpack".to_string());
        args.push(buildpack.clone());
    }
    for (key, value) in &params.env {
        args.push("--env".to_string());
        args.push(format!("{key}={value}"));
    }
    args
}

#[async_trait]
impl Builder for BuildpacksBuilder {
    async fn build(
        &self,
        cancel: &Cancellation,
        artifact: &Artifact,
        tag: &str,
    ) -> Result<String, BuildError> {
        let BuildStrategy::Buildpacks(params) = &artifact.strategy else {
            return Err(BuildError::UnsupportedStrategy {
                artifact: artifact.image_name.clone(),
                kind: artifact.strategy.kind(),
            });
        };

        let built = self.run_pack(cancel, artifact, params).await?;
        tag_and_publish(self.daemon.as_ref(), cancel, &built, tag, self.push).await
    }
}
