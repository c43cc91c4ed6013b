//! Tag policies and their per-run evaluation.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Local, Utc};
use tracing::debug;

use crate::digest::context_digest;
use crate::template::expand_env_template;
use crate::TagPolicyError;

/// Default date format for the wall-clock policy.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Time zone used to render the wall-clock date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagTimeZone {
    #[default]
    Utc,
    Local,
    Fixed(FixedOffset),
}

impl FromStr for TagTimeZone {
    type Err = TagPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "utc" | "z" => return Ok(Self::Utc),
            "local" => return Ok(Self::Local),
            _ => {}
        }

        let invalid = || TagPolicyError::InvalidTimeZone(s.to_string());
        let (sign, rest) = match trimmed.as_bytes().first() {
            Some(b'+') => (1, &trimmed[1..]),
            Some(b'-') => (-1, &trimmed[1..]),
            _ => return Err(invalid()),
        };
        let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
        let hours: i32 = hours.parse().map_err(|_| invalid())?;
        let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
        if !(0..60).contains(&minutes) {
            return Err(invalid());
        }

        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .map(Self::Fixed)
            .ok_or_else(invalid)
    }
}

/// How a built image gets its tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagPolicy {
    /// Digest of the artifact's build-context content.
    ContentDigest,

    /// `git describe --tags --always` of the artifact workspace, with a
    /// `-dirty` suffix when the working tree has uncommitted changes.
    VersionControl,

    /// The current date, captured once when the run starts.
    WallClockDate { format: String, zone: TagTimeZone },

    /// A `{{.VAR}}` template expanded against the process environment.
    Template { template: String },
}

/// Per-artifact inputs to tag resolution.
#[derive(Debug, Clone, Copy)]
pub struct TagContext<'a> {
    /// Image name of the artifact (used only for diagnostics).
    pub image_name: &'a str,
    /// Build context / workspace directory of the artifact.
    pub workspace: &'a Path,
}

impl TagPolicy {
    /// Freeze this policy for one run using the current clock and process environment.
    pub fn for_run(&self) -> Result<RunTagger, TagPolicyError> {
        self.for_run_at(Utc::now(), std::env::vars().collect())
    }

    /// Freeze this policy for one run against a fixed instant and environment.
    ///
    /// The wall-clock policy renders its date here, so every artifact in the
    /// run receives the same date even if the run crosses midnight.
    pub fn for_run_at(
        &self,
        now: DateTime<Utc>,
        env: BTreeMap<String, String>,
    ) -> Result<RunTagger, TagPolicyError> {
        let frozen = match self {
            TagPolicy::ContentDigest => Frozen::ContentDigest,
            TagPolicy::VersionControl => Frozen::VersionControl,
            TagPolicy::WallClockDate { format, zone } => {
                Frozen::Fixed(render_date(now, format, *zone)?)
            }
            TagPolicy::Template { template } => Frozen::Template {
                template: template.clone(),
                env,
            },
        };

        Ok(RunTagger { frozen })
    }
}

#[derive(Debug, Clone)]
enum Frozen {
    ContentDigest,
    VersionControl,
    Fixed(String),
    Template {
        template: String,
        env: BTreeMap<String, String>,
    },
}

/// A tag policy bound to one run. Resolution performs no mutation.
#[derive(Debug, Clone)]
pub struct RunTagger {
    frozen: Frozen,
}

impl RunTagger {
    /// Resolve the tag for one artifact.
    pub fn resolve(&self, ctx: &TagContext<'_>) -> Result<String, TagPolicyError> {
        let tag = match &self.frozen {
            Frozen::ContentDigest => context_digest(ctx.workspace)?,
            Frozen::VersionControl => git_describe(ctx.workspace)?,
            Frozen::Fixed(tag) => tag.clone(),
            Frozen::Template { template, env } => expand_env_template(template, env)?,
        };

        validate_tag(&tag)?;
        debug!(image = %ctx.image_name, tag = %tag, "Resolved tag");
        Ok(tag)
    }
}

fn render_date(
    now: DateTime<Utc>,
    format: &str,
    zone: TagTimeZone,
) -> Result<String, TagPolicyError> {
    let mut out = String::new();
    let written = match zone {
        TagTimeZone::Utc => write!(out, "{}", now.format(format)),
        TagTimeZone::Local => write!(out, "{}", now.with_timezone(&Local).format(format)),
        TagTimeZone::Fixed(offset) => write!(out, "{}", now.with_timezone(&offset).format(format)),
    };
    written.map_err(|_| TagPolicyError::InvalidDateFormat(format.to_string()))?;
    Ok(out)
}

fn git_describe(workspace: &Path) -> Result<String, TagPolicyError> {
    let inside = Command::new("git")
        .arg("-C")
        .arg(workspace)
        .args(["rev-parse", "--is-inside-work-tree"])
        .output()?;
    if !inside.status.success() {
        return Err(TagPolicyError::NotARepository {
            path: PathBuf::from(workspace),
        });
    }

    let description = run_git(workspace, &["describe", "--tags", "--always"])?;
    let status = run_git(workspace, &["status", "--porcelain"])?;

    if status.is_empty() {
        Ok(description)
    } else {
        Ok(format!("{description}-dirty"))
    }
}

fn run_git(workspace: &Path, args: &[&str]) -> Result<String, TagPolicyError> {
    let output = Command::new("git")
        .arg("-C")
        .arg(workspace)
        .args(args)
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TagPolicyError::Git {
            args: args.join(" "),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Check that `tag` is a valid image tag.
pub fn validate_tag(tag: &str) -> Result<(), TagPolicyError> {
    let mut chars = tag.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));

    if first_ok && rest_ok && tag.len() <= 128 {
        Ok(())
    } else {
        Err(TagPolicyError::InvalidTag(tag.to_string()))
    }
}
