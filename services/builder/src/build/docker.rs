//! Dockerfile backend.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{publish, BuildError, Builder};
use crate::artifact::{Artifact, BuildStrategy, DockerArtifact};
use crate::cancel::Cancellation;
use crate::daemon::ImageDaemon;
use crate::process::{command, diagnostic};
use crate::profiling::Profiler;

/// Builds artifacts with `docker build`, tagging directly at build time.
pub struct DockerBuilder {
    daemon: Arc<dyn ImageDaemon>,
    docker_binary: String,
    push: bool,
    profiler: Profiler,
}

impl DockerBuilder {
    pub fn new(daemon: Arc<dyn ImageDaemon>, docker_binary: &str, push: bool) -> Self {
        Self {
            daemon,
            docker_binary: docker_binary.to_string(),
            push,
            profiler: Profiler::disabled(),
        }
    }

    /// Record started commands in `profiler`'s exec log.
    pub fn with_profiler(mut self, profiler: Profiler) -> Self {
        self.profiler = profiler;
        self
    }
}

fn docker_build_args(tag: &str, artifact: &Artifact, params: &DockerArtifact) -> Vec<String> {
    let context = artifact.context.display().to_string();
    let dockerfile = artifact.context.join(&params.dockerfile);

    let mut args = vec![
        "build".to_string(),
        "--tag".to_string(),
        tag.to_string(),
        "--file".to_string(),
        dockerfile.display().to_string(),
    ];
    for (key, value) in &params.build_args {
        args.push("--build-arg".to_string());
        args.push(format!("{key}={value}"));
    }
    if let Some(target) = &params.target {
        args.push("--target".to_string());
        args.push(target.clone());
    }
    args.push(context);
    args
}

#[async_trait]
impl Builder for DockerBuilder {
    async fn build(
        &self,
        cancel: &Cancellation,
        artifact: &Artifact,
        tag: &str,
    ) -> Result<String, BuildError> {
        let BuildStrategy::Docker(params) = &artifact.strategy else {
            return Err(BuildError::UnsupportedStrategy {
                artifact: artifact.image_name.clone(),
                kind: artifact.strategy.kind(),
            });
        };

        info!(artifact = %artifact.image_name, tag = %tag, "Building with docker");

        let mut cmd = command(&self.docker_binary);
        cmd.args(docker_build_args(tag, artifact, params));
        self.profiler.record_command(&cmd);
        let output = cancel
            .run(cmd.output())
            .await?
            .map_err(|source| BuildError::Spawn {
                program: self.docker_binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(BuildError::Backend {
                artifact: artifact.image_name.clone(),
                output: diagnostic(&output),
            });
        }

        publish(self.daemon.as_ref(), cancel, tag, self.push).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_docker_build_args() {
        let artifact = Artifact::new(
            "app",
            "ctx",
            BuildStrategy::Docker(DockerArtifact {
                dockerfile: "build/Dockerfile".to_string(),
                build_args: BTreeMap::from([("VERSION".to_string(), "1.2".to_string())]),
                target: Some("release".to_string()),
            }),
        );
        let BuildStrategy::Docker(params) = &artifact.strategy else {
            unreachable!()
        };

        let args = docker_build_args("app:v1", &artifact, params);
        assert_eq!(
            args,
            vec![
                "build",
                "--tag",
                "app:v1",
                "--file",
                "ctx/build/Dockerfile",
                "--build-arg",
                "VERSION=1.2",
                "--target",
                "release",
                "ctx",
            ]
        );
    }

    #[tokio::test]
    async fn test_rejects_foreign_strategy() {
        let builder = DockerBuilder::new(
            Arc::new(crate::daemon::InMemoryDaemon::default()),
            "docker",
            false,
        );
        let artifact = Artifact::new(
            "app",
            ".",
            BuildStrategy::Custom(crate::artifact::CustomArtifact {
                build_command: "true".to_string(),
            }),
        );

        let err = builder
            .build(&Cancellation::never(), &artifact, "app:v1")
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::UnsupportedStrategy { .. }));
    }
}
