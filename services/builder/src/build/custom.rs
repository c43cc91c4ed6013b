//! User-command backend.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{publish, BuildError, Builder};
use crate::artifact::{Artifact, BuildStrategy};
use crate::cancel::Cancellation;
use crate::daemon::ImageDaemon;
use crate::process::{command, diagnostic};
use crate::profiling::Profiler;

/// Runs an arbitrary shell command that must produce the tagged image.
pub struct CustomBuilder {
    daemon: Arc<dyn ImageDaemon>,
    push: bool,
    profiler: Profiler,
}

impl CustomBuilder {
    pub fn new(daemon: Arc<dyn ImageDaemon>, push: bool) -> Self {
        Self {
            daemon,
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

#[async_trait]
impl Builder for CustomBuilder {
    async fn build(
        &self,
        cancel: &Cancellation,
        artifact: &Artifact,
        tag: &str,
    ) -> Result<String, BuildError> {
        let BuildStrategy::Custom(params) = &artifact.strategy else {
            return Err(BuildError::UnsupportedStrategy {
                artifact: artifact.image_name.clone(),
                kind: artifact.strategy.kind(),
            });
        };

        info!(
            artifact = %artifact.image_name,
            command = %params.build_command,
            "Running custom build"
        );

        let mut cmd = command("sh");
        cmd.arg("-c")
            .arg(&params.build_command)
            .current_dir(&artifact.context)
            .env("IMAGE", tag)
            .env("PUSH_IMAGE", self.push.to_string())
            .env("BUILD_CONTEXT", &artifact.context);
        self.profiler.record_command(&cmd);
        let output = cancel
            .run(cmd.output())
            .await?
            .map_err(|source| BuildError::Spawn {
                program: "sh".to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(BuildError::Backend {
                artifact: artifact.image_name.clone(),
                output: diagnostic(&output),
            });
        }

        let exists = self
            .daemon
            .image_exists(cancel, tag)
            .await
            .map_err(|source| BuildError::ImageId {
                tag: tag.to_string(),
                source,
            })?;
        if !exists {
            return Err(BuildError::Backend {
                artifact: artifact.image_name.clone(),
                output: format!("build command finished but {tag} is not in the local daemon"),
            });
        }

        publish(self.daemon.as_ref(), cancel, tag, self.push).await
    }
}
