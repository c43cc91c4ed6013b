//! # shipyard-tagging
//!
//! Deterministic tag resolution for built images.
//!
//! A [`TagPolicy`] is selected once per run and frozen into a [`RunTagger`]
//! at run start. Resolution is pure for a fixed environment and repository
//! state: it never mutates the workspace or the image daemon.
//!
//! ## Policies
//!
//! - `ContentDigest`: hash of the build context, stable across unchanged inputs
//! - `VersionControl`: `git describe` of the workspace
//! - `WallClockDate`: date in a configured zone, captured at run start
//! - `Template`: `{{.VAR}}` expansion against the environment

mod digest;
mod error;
mod policy;
mod template;

pub use digest::context_digest;
pub use error::TagPolicyError;
pub use policy::{
    validate_tag, RunTagger, TagContext, TagPolicy, TagTimeZone, DEFAULT_DATE_FORMAT,
};
pub use template::expand_env_template;
