//! # shipyard-builder
//!
//! Local build, tag and prune lifecycle for shipyard artifacts.
//!
//! ## Architecture
//!
//! - **Daemon client**: tag/push/inspect/remove/disk-usage over the local image engine
//! - **Dispatcher**: routes each artifact to its build backend and tags the result
//! - **Pruner**: post-run disk-usage check and history-aware stale image removal
//! - **Profiling**: opt-in sampling, CPU and trace spans around builds
//!
//! A [`Runner`] ties them together: build every artifact, then always run
//! one prune pass over the same artifact list.

pub mod artifact;
pub mod build;
pub mod cancel;
pub mod config;
pub mod daemon;
mod process;
pub mod profiling;
pub mod prune;
pub mod runner;

pub use artifact::{Artifact, BuildStrategy, StrategyKind, TaggedImage};
pub use build::{register_default_builders, BackendSettings, BuildError, Builder, Dispatcher};
pub use cancel::{CancelHandle, CancelReason, Cancellation};
pub use daemon::{DaemonError, DockerCli, ImageDaemon, InMemoryDaemon, RemoveOptions};
pub use profiling::{Profiler, ProfilingConfig};
pub use prune::{compute_prune_set, DiskUsageError, PruneError, Pruner, PrunerConfig};
pub use runner::{RunError, Runner};
pub use shipyard_tagging::TagPolicy;
