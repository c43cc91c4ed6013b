//! Error types for tag policy resolution.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while resolving a tag from a policy.
#[derive(Debug, Error)]
pub enum TagPolicyError {
    /// The workspace has no version-control metadata.
    #[error("{} is not inside a git repository", path.display())]
    NotARepository { path: PathBuf },

    /// A git invocation exited unsuccessfully.
    #[error("git {args} failed: {stderr}")]
    Git { args: String, stderr: String },

    /// A template referenced an environment variable that is not set.
    #[error("environment variable {0} referenced by tag template is not set")]
    MissingVariable(String),

    /// The template could not be parsed.
    #[error("invalid tag template: {0}")]
    InvalidTemplate(String),

    /// The date format contains an unsupported specifier.
    #[error("invalid date format {0:?}")]
    InvalidDateFormat(String),

    /// The configured time zone could not be parsed.
    #[error("invalid time zone {0:?}: expected UTC, Local or an offset like +05:30")]
    InvalidTimeZone(String),

    /// The resolved value is not usable as an image tag.
    #[error("invalid tag {0:?}: must match [A-Za-z0-9_][A-Za-z0-9_.-]{{0,127}}")]
    InvalidTag(String),

    /// The build context could not be read.
    #[error("reading build context {}: {source}", path.display())]
    Context {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// I/O error (e.g. git binary missing).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TagPolicyError {
    /// Returns true if the error came from missing version-control metadata.
    pub fn is_not_a_repository(&self) -> bool {
        matches!(self, TagPolicyError::NotARepository { .. })
    }
}
