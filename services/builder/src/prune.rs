//! Post-run pruning of stale local images.
//!
//! A pass runs once after the build phase of a run:
//!
//! 1. Query disk usage. A failed query is logged and the pass continues.
//! 2. Read one history snapshot per distinct artifact name and compute the
//!    prune set: for a name occurring `c` times in the run, the `c` newest
//!    images survive and every older one is pruned once.
//! 3. Remove each image with force + prune-children. The first failed
//!    removal stops the pass and is returned.
//!
//! Names that do not appear in the run are never touched.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::artifact::Artifact;
use crate::cancel::{CancelReason, Cancellation};
use crate::daemon::{DaemonError, ImageDaemon, RemoveOptions};

/// Disk-usage query failure.
#[derive(Debug, Error)]
pub enum DiskUsageError {
    #[error("disk usage query cancelled: {0}")]
    Cancelled(CancelReason),

    #[error("disk usage query failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: DaemonError,
    },
}

/// Prune pass failure.
#[derive(Debug, Error)]
pub enum PruneError {
    #[error("pruning images: removing {image}: {source}")]
    Remove {
        image: String,
        #[source]
        source: DaemonError,
    },

    #[error("pruning images: {0}")]
    Cancelled(CancelReason),
}

/// Pruner configuration.
#[derive(Debug, Clone)]
pub struct PrunerConfig {
    /// Pruning runs only when enabled.
    pub enabled: bool,
    /// Disk-usage attempts before giving up.
    pub usage_retries: u32,
    /// Pause between disk-usage attempts.
    pub usage_retry_interval: Duration,
}

impl Default for PrunerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            usage_retries: 5,
            usage_retry_interval: Duration::from_millis(500),
        }
    }
}

/// Compute the images to prune for a run.
///
/// `history` maps image names to ids, oldest first. For every distinct
/// name in `run_names` occurring `c` times, all but the `c` newest ids are
/// selected. Ids kept under any name of the run are never selected. The
/// result is deduplicated and ordered by first selection.
pub fn compute_prune_set(history: &BTreeMap<String, Vec<String>>, run_names: &[&str]) -> Vec<String> {
    let mut occurrences: Vec<(&str, usize)> = Vec::new();
    for name in run_names {
        match occurrences.iter().position(|(n, _)| n == name) {
            Some(i) => occurrences[i].1 += 1,
            None => occurrences.push((*name, 1)),
        }
    }

    let mut preserved = HashSet::new();
    let mut stale = Vec::new();
    for (name, count) in &occurrences {
        let Some(ids) = history.get(*name) else {
            continue;
        };
        let split = ids.len().saturating_sub(*count);
        stale.extend(ids[..split].iter());
        preserved.extend(ids[split..].iter());
    }

    let mut seen = HashSet::new();
    stale
        .into_iter()
        .filter(|id| !preserved.contains(id) && seen.insert(*id))
        .cloned()
        .collect()
}

/// Disk-usage-aware pruner of local images.
pub struct Pruner {
    daemon: Arc<dyn ImageDaemon>,
    config: PrunerConfig,
    /// Ids removed by earlier passes in this process.
    pruned: Mutex<HashSet<String>>,
}

impl Pruner {
    pub fn new(daemon: Arc<dyn ImageDaemon>, config: PrunerConfig) -> Self {
        Self {
            daemon,
            config,
            pruned: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Query daemon disk usage, retrying up to the configured bound.
    ///
    /// Cancellation is checked before every attempt and never consumes a
    /// retry. Each call starts with a fresh retry budget.
    ///
    /// An exhausted budget is reported as [`DiskUsageError::Exhausted`] carrying
    /// the last daemon error; no zero utilization value accompanies it.
    pub async fn disk_usage(&self, cancel: &Cancellation) -> Result<u64, DiskUsageError> {
        let attempts = self.config.usage_retries.max(1);
        let mut attempt = 0;

        loop {
            if let Some(reason) = cancel.reason() {
                return Err(DiskUsageError::Cancelled(reason));
            }
            attempt += 1;

            match self.daemon.disk_usage(cancel).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    if let Some(reason) = e.cancel_reason() {
                        return Err(DiskUsageError::Cancelled(reason));
                    }
                    if attempt >= attempts {
                        return Err(DiskUsageError::Exhausted { attempts, last: e });
                    }
                    debug!(attempt, error = %e, "Disk usage query failed, retrying");
                }
            }

            cancel
                .run(tokio::time::sleep(self.config.usage_retry_interval))
                .await
                .map_err(DiskUsageError::Cancelled)?;
        }
    }

    /// Read one history snapshot and compute the ids to prune for `artifacts`.
    pub async fn collect_images_to_prune(
        &self,
        cancel: &Cancellation,
        artifacts: &[Artifact],
    ) -> Result<Vec<String>, PruneError> {
        let run_names: Vec<&str> = artifacts.iter().map(|a| a.image_name.as_str()).collect();

        let mut history = BTreeMap::new();
        for name in &run_names {
            if history.contains_key(*name) {
                continue;
            }
            match self.daemon.image_history(cancel, name).await {
                Ok(ids) => {
                    history.insert(name.to_string(), ids);
                }
                Err(e) => {
                    if let Some(reason) = e.cancel_reason() {
                        return Err(PruneError::Cancelled(reason));
                    }
                    warn!(artifact = %name, error = %e, "Could not read image history; skipping");
                }
            }
        }

        let pruned = self.pruned.lock().await;
        let to_prune: Vec<String> = compute_prune_set(&history, &run_names)
            .into_iter()
            .filter(|id| !pruned.contains(id))
            .collect();

        if tracing::enabled!(tracing::Level::DEBUG) {
            let counts: HashMap<&str, usize> = history
                .iter()
                .map(|(name, ids)| (name.as_str(), ids.len()))
                .collect();
            debug!(history = ?counts, selected = to_prune.len(), "Computed prune set");
        }

        Ok(to_prune)
    }

    /// Run one prune pass for the artifacts of a finished run.
    ///
    /// Does nothing when pruning is disabled.
    pub async fn prune(&self, cancel: &Cancellation, artifacts: &[Artifact]) -> Result<(), PruneError> {
        if !self.config.enabled {
            debug!("Pruning disabled");
            return Ok(());
        }
        if let Some(reason) = cancel.reason() {
            return Err(PruneError::Cancelled(reason));
        }

        let before = match self.disk_usage(cancel).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(error = %e, "Disk usage unknown; pruning anyway");
                None
            }
        };

        let to_prune = self.collect_images_to_prune(cancel, artifacts).await?;
        if to_prune.is_empty() {
            debug!("No stale images");
            return Ok(());
        }

        for id in &to_prune {
            if let Err(e) = self
                .daemon
                .remove_image(cancel, id, RemoveOptions::FORCE_PRUNE)
                .await
            {
                if let Some(reason) = e.cancel_reason() {
                    return Err(PruneError::Cancelled(reason));
                }
                return Err(PruneError::Remove {
                    image: id.clone(),
                    source: e,
                });
            }
            self.pruned.lock().await.insert(id.clone());
            debug!(image = %id, "Removed image");
        }

        let after = match self.disk_usage(cancel).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!(error = %e, "Disk usage unavailable after pruning");
                None
            }
        };
        match (before, after) {
            (Some(before), Some(after)) => info!(
                images = to_prune.len(),
                freed_bytes = before.saturating_sub(after),
                "Pruned images"
            ),
            _ => info!(images = to_prune.len(), "Pruned images"),
        }

        Ok(())
    }
}
