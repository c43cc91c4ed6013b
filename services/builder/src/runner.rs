//! One build-tag-prune run.

use thiserror::Error;
use tracing::{error, info};

use shipyard_tagging::TagPolicy;

use crate::artifact::{Artifact, TaggedImage};
use crate::build::{BuildError, Dispatcher};
use crate::cancel::Cancellation;
use crate::prune::{PruneError, Pruner};

/// Errors from a full run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Prune(#[from] PruneError),
}

/// Drives the build phase and the prune pass that follows it.
pub struct Runner {
    dispatcher: Dispatcher,
    pruner: Pruner,
}

impl Runner {
    pub fn new(dispatcher: Dispatcher, pruner: Pruner) -> Self {
        Self { dispatcher, pruner }
    }

    /// Build and tag every artifact of the run.
    pub async fn build_and_tag(
        &self,
        cancel: &Cancellation,
        artifacts: &[Artifact],
        policy: &TagPolicy,
    ) -> Result<Vec<TaggedImage>, BuildError> {
        self.dispatcher.build_and_tag(cancel, artifacts, policy).await
    }

    /// Prune stale images of the run's artifacts. No-op when disabled.
    pub async fn prune(&self, cancel: &Cancellation, artifacts: &[Artifact]) -> Result<(), PruneError> {
        self.pruner.prune(cancel, artifacts).await
    }

    /// Build, then prune even if the build phase failed.
    ///
    /// A build failure takes precedence over a prune failure.
    pub async fn run(
        &self,
        cancel: &Cancellation,
        artifacts: &[Artifact],
        policy: &TagPolicy,
    ) -> Result<Vec<TaggedImage>, RunError> {
        let built = self.build_and_tag(cancel, artifacts, policy).await;
        let pruned = self.prune(cancel, artifacts).await;

        match (built, pruned) {
            (Ok(images), Ok(())) => {
                info!(images = images.len(), "Run complete");
                Ok(images)
            }
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), pruned) => {
                if let Err(prune_err) = pruned {
                    error!(error = %prune_err, "Prune pass failed after build failure");
                }
                Err(e.into())
            }
        }
    }
}
