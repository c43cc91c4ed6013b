//! Local image daemon client.
//!
//! The daemon is treated as an opaque capability surface: tag, push,
//! resolve image ids, check existence, remove, report disk usage, and list
//! the local image history of a name. Every call is bound to a
//! [`Cancellation`]; the client applies no timeout of its own.
//!
//! - `docker`: implementation over the `docker` CLI
//! - `memory`: in-memory daemon for tests and dry runs

mod docker;
mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::cancel::{CancelReason, Cancellation};

pub use docker::{parse_size, DockerCli};
pub use memory::{DiskUsageFailures, InMemoryDaemon};

/// Errors reported by the image daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// A daemon command exited unsuccessfully.
    #[error("{command} failed: {stderr}")]
    Command { command: String, stderr: String },

    /// The referenced image does not exist.
    #[error("image not found: {0}")]
    NotFound(String),

    /// The daemon rejected the operation.
    #[error("daemon rejected {operation} of {target}: {message}")]
    Rejected {
        operation: &'static str,
        target: String,
        message: String,
    },

    /// The daemon produced output we could not interpret.
    #[error("unexpected daemon output: {0}")]
    Parse(String),

    #[error(transparent)]
    Cancelled(#[from] CancelReason),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DaemonError {
    /// Returns the cancellation reason if this error came from cancellation.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            DaemonError::Cancelled(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Options for image removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Remove even if tagged in several repositories or used by stopped containers.
    pub force: bool,
    /// Also delete untagged parent layers.
    pub prune_children: bool,
}

impl RemoveOptions {
    /// Force removal and prune unreferenced parents.
    pub const FORCE_PRUNE: RemoveOptions = RemoveOptions {
        force: true,
        prune_children: true,
    };
}

/// Image daemon capability surface.
#[async_trait]
pub trait ImageDaemon: Send + Sync {
    /// Tag `source` as `target`.
    async fn tag_image(
        &self,
        cancel: &Cancellation,
        source: &str,
        target: &str,
    ) -> Result<(), DaemonError>;

    /// Push `reference` to its registry and return the pushed reference
    /// (`reference@sha256:...`).
    async fn push_image(&self, cancel: &Cancellation, reference: &str)
        -> Result<String, DaemonError>;

    /// Resolve the local image id of `reference`.
    async fn image_id(&self, cancel: &Cancellation, reference: &str)
        -> Result<String, DaemonError>;

    /// Whether `reference` exists locally.
    async fn image_exists(&self, cancel: &Cancellation, reference: &str)
        -> Result<bool, DaemonError>;

    /// Remove the image with the given id.
    async fn remove_image(
        &self,
        cancel: &Cancellation,
        image_id: &str,
        options: RemoveOptions,
    ) -> Result<(), DaemonError>;

    /// Bytes used by local images.
    async fn disk_usage(&self, cancel: &Cancellation) -> Result<u64, DaemonError>;

    /// Local image ids for `image_name`, oldest first.
    async fn image_history(
        &self,
        cancel: &Cancellation,
        image_name: &str,
    ) -> Result<Vec<String>, DaemonError>;
}
