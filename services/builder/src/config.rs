//! Configuration for the builder.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use shipyard_tagging::{TagPolicy, TagTimeZone, DEFAULT_DATE_FORMAT};

use crate::build::BackendSettings;
use crate::prune::PrunerConfig;

/// Builder configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// JSON file listing the run's artifacts.
    pub run_file: PathBuf,

    /// Push built images to their registry.
    pub push: bool,

    /// Prune stale local images after the run.
    pub prune: bool,

    /// Artifact caching toggle. Consumed by the surrounding tool, carried here.
    pub cache_artifacts: bool,

    pub tag_policy: TagPolicy,

    /// Maximum concurrent builds.
    pub concurrency: usize,

    pub docker_binary: String,
    pub pack_binary: String,

    /// Deadline for the whole run (builds and prune).
    pub run_timeout: Option<Duration>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let run_file = lookup("SHIPYARD_RUN_FILE")
            .map(PathBuf::from)
            .context("SHIPYARD_RUN_FILE must point at the artifact list")?;

        let flag = |key: &str, default: bool| -> Result<bool> {
            match lookup(key) {
                Some(value) => parse_bool(&value).with_context(|| format!("invalid {key}")),
                None => Ok(default),
            }
        };
        let push = flag("SHIPYARD_PUSH", false)?;
        let prune = flag("SHIPYARD_PRUNE", true)?;
        let cache_artifacts = flag("SHIPYARD_CACHE_ARTIFACTS", false)?;

        let tag_policy = tag_policy(&lookup)?;

        let concurrency = match lookup("SHIPYARD_CONCURRENCY") {
            Some(value) => value
                .parse::<usize>()
                .with_context(|| format!("invalid SHIPYARD_CONCURRENCY {value:?}"))?
                .max(1),
            None => 1,
        };

        let docker_binary = lookup("SHIPYARD_DOCKER_BIN").unwrap_or_else(|| "docker".to_string());
        let pack_binary = lookup("SHIPYARD_PACK_BIN").unwrap_or_else(|| "pack".to_string());

        let run_timeout = lookup("SHIPYARD_BUILD_TIMEOUT_SECS")
            .map(|value| {
                value
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .with_context(|| format!("invalid SHIPYARD_BUILD_TIMEOUT_SECS {value:?}"))
            })
            .transpose()?;

        let log_level = lookup("SHIPYARD_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            run_file,
            push,
            prune,
            cache_artifacts,
            tag_policy,
            concurrency,
            docker_binary,
            pack_binary,
            run_timeout,
            log_level,
        })
    }

    pub fn backend_settings(&self) -> BackendSettings {
        BackendSettings {
            push: self.push,
            docker_binary: self.docker_binary.clone(),
            pack_binary: self.pack_binary.clone(),
            ..BackendSettings::default()
        }
    }

    pub fn pruner_config(&self) -> PrunerConfig {
        PrunerConfig {
            enabled: self.prune,
            ..PrunerConfig::default()
        }
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got {other:?}"),
    }
}

fn tag_policy(lookup: &impl Fn(&str) -> Option<String>) -> Result<TagPolicy> {
    let name = lookup("SHIPYARD_TAG_POLICY").unwrap_or_else(|| "git".to_string());

    let policy = match name.trim().to_ascii_lowercase().as_str() {
        "digest" | "content-digest" => TagPolicy::ContentDigest,
        "git" | "version-control" => TagPolicy::VersionControl,
        "date" | "wall-clock-date" => {
            let format = lookup("SHIPYARD_TAG_DATE_FORMAT")
                .unwrap_or_else(|| DEFAULT_DATE_FORMAT.to_string());
            let zone = match lookup("SHIPYARD_TAG_TIMEZONE") {
                Some(zone) => zone
                    .parse::<TagTimeZone>()
                    .context("invalid SHIPYARD_TAG_TIMEZONE")?,
                None => TagTimeZone::Utc,
            };
            TagPolicy::WallClockDate { format, zone }
        }
        "template" => {
            let template = lookup("SHIPYARD_TAG_TEMPLATE")
                .context("SHIPYARD_TAG_TEMPLATE is required for the template tag policy")?;
            TagPolicy::Template { template }
        }
        other => bail!("unknown SHIPYARD_TAG_POLICY {other:?}"),
    };

    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("SHIPYARD_RUN_FILE", "run.json")]).unwrap();

        assert_eq!(config.run_file, PathBuf::from("run.json"));
        assert!(!config.push);
        assert!(config.prune);
        assert_eq!(config.tag_policy, TagPolicy::VersionControl);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.docker_binary, "docker");
        assert!(config.run_timeout.is_none());

        let pruner = config.pruner_config();
        assert!(pruner.enabled);
        assert_eq!(pruner.usage_retries, 5);
    }

    #[test]
    fn test_missing_run_file() {
        assert!(load(&[]).is_err());
    }

    #[test]
    fn test_date_policy_with_zone() {
        let config = load(&[
            ("SHIPYARD_RUN_FILE", "run.json"),
            ("SHIPYARD_TAG_POLICY", "date"),
            ("SHIPYARD_TAG_TIMEZONE", "+05:30"),
            ("SHIPYARD_PRUNE", "false"),
            ("SHIPYARD_CONCURRENCY", "4"),
            ("SHIPYARD_BUILD_TIMEOUT_SECS", "600"),
        ])
        .unwrap();

        assert_eq!(
            config.tag_policy,
            TagPolicy::WallClockDate {
                format: DEFAULT_DATE_FORMAT.to_string(),
                zone: TagTimeZone::Fixed(FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap()),
            }
        );
        assert!(!config.pruner_config().enabled);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.run_timeout, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_template_policy_requires_template() {
        let err = load(&[
            ("SHIPYARD_RUN_FILE", "run.json"),
            ("SHIPYARD_TAG_POLICY", "template"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("SHIPYARD_TAG_TEMPLATE"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(load(&[("SHIPYARD_RUN_FILE", "r"), ("SHIPYARD_PUSH", "maybe")]).is_err());
        assert!(load(&[("SHIPYARD_RUN_FILE", "r"), ("SHIPYARD_TAG_POLICY", "semver")]).is_err());
        assert!(load(&[("SHIPYARD_RUN_FILE", "r"), ("SHIPYARD_CONCURRENCY", "-1")]).is_err());
    }
}
