//! Image daemon client over the `docker` CLI.

use std::process::Output;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{DaemonError, ImageDaemon, RemoveOptions};
use crate::cancel::Cancellation;
use crate::process::{command, diagnostic, stdout};
use crate::profiling::Profiler;

/// Talks to the local engine by shelling out to `docker`.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    profiler: Profiler,
}

impl DockerCli {
    /// Create a client using the given `docker` binary.
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            profiler: Profiler::disabled(),
        }
    }

    /// Record every `docker` invocation in `profiler`'s exec log.
    pub fn with_profiler(mut self, profiler: Profiler) -> Self {
        self.profiler = profiler;
        self
    }

    async fn exec(&self, cancel: &Cancellation, args: &[&str]) -> Result<Output, DaemonError> {
        debug!(binary = %self.binary, args = %args.join(" "), "Running docker");
        let mut cmd = command(&self.binary);
        cmd.args(args);
        self.profiler.record_command(&cmd);
        Ok(cancel.run(cmd.output()).await??)
    }

    /// Run a command and return stdout, mapping failures to `DaemonError`.
    async fn run(&self, cancel: &Cancellation, args: &[&str]) -> Result<String, DaemonError> {
        let output = self.exec(cancel, args).await?;
        if !output.status.success() {
            return Err(self.failure(args, &output));
        }
        Ok(stdout(&output))
    }

    fn failure(&self, args: &[&str], output: &Output) -> DaemonError {
        let stderr = diagnostic(output);
        if stderr.contains("No such image") {
            let target = args.last().copied().unwrap_or_default();
            return DaemonError::NotFound(target.to_string());
        }
        DaemonError::Command {
            command: format!("{} {}", self.binary, args.join(" ")),
            stderr,
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait]
impl ImageDaemon for DockerCli {
    async fn tag_image(
        &self,
        cancel: &Cancellation,
        source: &str,
        target: &str,
    ) -> Result<(), DaemonError> {
        self.run(cancel, &["tag", source, target]).await?;
        Ok(())
    }

    async fn push_image(
        &self,
        cancel: &Cancellation,
        reference: &str,
    ) -> Result<String, DaemonError> {
        let out = self.run(cancel, &["push", reference]).await?;
        let digest = parse_push_digest(&out).ok_or_else(|| {
            DaemonError::Parse(format!("no digest in push output for {reference}"))
        })?;
        Ok(format!("{reference}@{digest}"))
    }

    async fn image_id(
        &self,
        cancel: &Cancellation,
        reference: &str,
    ) -> Result<String, DaemonError> {
        let id = self
            .run(cancel, &["image", "inspect", "--format", "{{.Id}}", reference])
            .await?;
        if id.is_empty() {
            return Err(DaemonError::NotFound(reference.to_string()));
        }
        Ok(id)
    }

    async fn image_exists(
        &self,
        cancel: &Cancellation,
        reference: &str,
    ) -> Result<bool, DaemonError> {
        match self.image_id(cancel, reference).await {
            Ok(_) => Ok(true),
            Err(DaemonError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn remove_image(
        &self,
        cancel: &Cancellation,
        image_id: &str,
        options: RemoveOptions,
    ) -> Result<(), DaemonError> {
        let mut args = vec!["rmi"];
        if options.force {
            args.push("--force");
        }
        if !options.prune_children {
            args.push("--no-prune");
        }
        args.push(image_id);
        self.run(cancel, &args).await?;
        Ok(())
    }

    async fn disk_usage(&self, cancel: &Cancellation) -> Result<u64, DaemonError> {
        let out = self
            .run(cancel, &["system", "df", "--format", "{{json .}}"])
            .await?;
        parse_images_usage(&out)
    }

    async fn image_history(
        &self,
        cancel: &Cancellation,
        image_name: &str,
    ) -> Result<Vec<String>, DaemonError> {
        let out = self
            .run(
                cancel,
                &["image", "ls", "--no-trunc", "--format", "{{.ID}}", image_name],
            )
            .await?;

        // `docker image ls` lists newest first; one id may carry several tags.
        let mut ids: Vec<String> = Vec::new();
        for id in out.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if !ids.iter().any(|seen| seen == id) {
                ids.push(id.to_string());
            }
        }
        ids.reverse();
        Ok(ids)
    }
}

/// Extract `sha256:...` from `docker push` output.
fn parse_push_digest(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (_, rest) = line.split_once("digest: ")?;
        let digest = rest.split_whitespace().next()?;
        digest.starts_with("sha256:").then(|| digest.to_string())
    })
}

#[derive(Debug, Deserialize)]
struct DfRow {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Size")]
    size: String,
}

fn parse_images_usage(output: &str) -> Result<u64, DaemonError> {
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let row: DfRow = serde_json::from_str(line)
            .map_err(|e| DaemonError::Parse(format!("system df row {line:?}: {e}")))?;
        if row.kind == "Images" {
            return parse_size(&row.size)
                .ok_or_else(|| DaemonError::Parse(format!("image size {:?}", row.size)));
        }
    }
    Err(DaemonError::Parse("no Images row in system df output".to_string()))
}

/// Parse a docker human-readable size (`1.5GB`, `512kB`, `0B`) into bytes.
///
/// Docker reports sizes in decimal units.
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let number: f64 = number.parse().ok()?;

    let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1.0,
        "kb" => 1e3,
        "mb" => 1e6,
        "gb" => 1e9,
        "tb" => 1e12,
        _ => return None,
    };

    Some((number * multiplier).round() as u64)
}
