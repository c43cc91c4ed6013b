//! Artifact descriptors and build results.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A named buildable unit.
///
/// `image_name` is the unique key within a run's artifact list, although the
/// same name may legitimately appear more than once (see the pruner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Image name without tag (e.g. `registry.example.com/team/app`).
    pub image_name: String,

    /// Build context directory.
    #[serde(default = "default_context")]
    pub context: PathBuf,

    /// How the artifact is built.
    pub strategy: BuildStrategy,
}

fn default_context() -> PathBuf {
    PathBuf::from(".")
}

impl Artifact {
    /// Create an artifact built with the given strategy from `context`.
    pub fn new(image_name: impl Into<String>, context: impl AsRef<Path>, strategy: BuildStrategy) -> Self {
        Self {
            image_name: image_name.into(),
            context: context.as_ref().to_path_buf(),
            strategy,
        }
    }
}

/// Strategy-specific build parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildStrategy {
    Docker(DockerArtifact),
    Buildpacks(BuildpacksArtifact),
    Custom(CustomArtifact),
}

impl BuildStrategy {
    /// The backend kind this strategy dispatches to.
    pub fn kind(&self) -> StrategyKind {
        match self {
            BuildStrategy::Docker(_) => StrategyKind::Docker,
            BuildStrategy::Buildpacks(_) => StrategyKind::Buildpacks,
            BuildStrategy::Custom(_) => StrategyKind::Custom,
        }
    }
}

/// Build with a Dockerfile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerArtifact {
    /// Dockerfile path relative to the context.
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,

    #[serde(default)]
    pub build_args: BTreeMap<String, String>,

    /// Multi-stage target.
    #[serde(default)]
    pub target: Option<String>,
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

/// Build with Cloud Native Buildpacks (`pack`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildpacksArtifact {
    /// Builder image.
    pub builder: String,

    #[serde(default)]
    pub run_image: Option<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub buildpacks: Vec<String>,
}

/// Build with a user-supplied shell command.
///
/// The command receives `IMAGE`, `PUSH_IMAGE` and `BUILD_CONTEXT` in its
/// environment and must leave `IMAGE` in the local daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomArtifact {
    pub build_command: String,
}

/// Identifies a build backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StrategyKind {
    Docker,
    Buildpacks,
    Custom,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::Docker => "docker",
            StrategyKind::Buildpacks => "buildpacks",
            StrategyKind::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// Result of building one artifact in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedImage {
    /// Artifact image name.
    pub image_name: String,

    /// Full tagged name (`image_name:tag`).
    pub tag: String,

    /// What the build returned: the pushed reference (`name:tag@sha256:...`)
    /// when pushing, otherwise the local image id.
    pub reference: String,
}

/// Join an image name and a resolved tag into a full tagged name.
pub fn tagged_name(image_name: &str, tag: &str) -> String {
    format!("{image_name}:{tag}")
}
