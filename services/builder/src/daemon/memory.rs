//! In-memory image daemon.
//!
//! Records every mutation so tests can assert on daemon state, and can be
//! scripted to fail disk-usage queries, tags, pushes or removals.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{DaemonError, ImageDaemon, RemoveOptions};
use crate::cancel::Cancellation;

/// How many disk-usage queries fail before one succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiskUsageFailures {
    #[default]
    None,
    /// The first `n` queries fail.
    First(u32),
    /// Every query fails.
    Always,
}

#[derive(Debug, Default)]
struct State {
    /// Tagged reference -> image id.
    references: BTreeMap<String, String>,
    /// Image name -> ids, oldest first.
    history: BTreeMap<String, Vec<String>>,
    pushed: Vec<String>,
    removed: Vec<(String, RemoveOptions)>,
    disk_usage_failures: DiskUsageFailures,
    disk_usage_calls: u32,
    fail_tags: bool,
    fail_pushes: bool,
    fail_removals: bool,
}

/// Mock daemon for testing and development.
#[derive(Debug)]
pub struct InMemoryDaemon {
    state: Mutex<State>,
    disk_usage_bytes: u64,
    id_counter: AtomicU64,
}

impl InMemoryDaemon {
    /// Create an empty daemon reporting `disk_usage_bytes` of usage.
    pub fn new(disk_usage_bytes: u64) -> Self {
        Self {
            state: Mutex::new(State::default()),
            disk_usage_bytes,
            id_counter: AtomicU64::new(0),
        }
    }

    /// Seed local history for `image_name` (ids oldest first).
    pub fn with_history(mut self, image_name: &str, ids: &[&str]) -> Self {
        self.state.get_mut().history.insert(
            image_name.to_string(),
            ids.iter().map(|id| id.to_string()).collect(),
        );
        self
    }

    /// Script disk-usage query failures.
    pub fn with_disk_usage_failures(mut self, failures: DiskUsageFailures) -> Self {
        self.state.get_mut().disk_usage_failures = failures;
        self
    }

    /// Make every tag operation fail.
    pub fn failing_tags(mut self) -> Self {
        self.state.get_mut().fail_tags = true;
        self
    }

    /// Make every push fail.
    pub fn failing_pushes(mut self) -> Self {
        self.state.get_mut().fail_pushes = true;
        self
    }

    /// Make every removal fail.
    pub fn failing_removals(mut self) -> Self {
        self.state.get_mut().fail_removals = true;
        self
    }

    /// Simulate a fresh local build producing `reference`. Returns the new id.
    pub async fn add_built_image(&self, reference: &str) -> String {
        let n = self.id_counter.fetch_add(1, Ordering::SeqCst);
        let id = format!("sha256:{:064x}", n + 1);
        let mut state = self.state.lock().await;
        state.references.insert(reference.to_string(), id.clone());
        state
            .history
            .entry(image_name_of(reference).to_string())
            .or_default()
            .push(id.clone());
        id
    }

    /// All tagged references currently known.
    pub async fn references(&self) -> BTreeMap<String, String> {
        self.state.lock().await.references.clone()
    }

    /// References pushed so far, in order.
    pub async fn pushed(&self) -> Vec<String> {
        self.state.lock().await.pushed.clone()
    }

    /// Removals performed so far, in order.
    pub async fn removed(&self) -> Vec<(String, RemoveOptions)> {
        self.state.lock().await.removed.clone()
    }

    /// Number of disk-usage queries attempted.
    pub async fn disk_usage_calls(&self) -> u32 {
        self.state.lock().await.disk_usage_calls
    }

    /// Current history snapshot for `image_name`.
    pub async fn history_of(&self, image_name: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .history
            .get(image_name)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for InMemoryDaemon {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Strip the tag or digest from a reference (`host:5000/app:v1` -> `host:5000/app`).
fn image_name_of(reference: &str) -> &str {
    let without_digest = reference.split('@').next().unwrap_or(reference);
    match without_digest.rfind(':') {
        Some(idx) if !without_digest[idx..].contains('/') => &without_digest[..idx],
        _ => without_digest,
    }
}

fn check(cancel: &Cancellation) -> Result<(), DaemonError> {
    match cancel.reason() {
        Some(reason) => Err(DaemonError::Cancelled(reason)),
        None => Ok(()),
    }
}

#[async_trait]
impl ImageDaemon for InMemoryDaemon {
    async fn tag_image(
        &self,
        cancel: &Cancellation,
        source: &str,
        target: &str,
    ) -> Result<(), DaemonError> {
        check(cancel)?;
        let mut state = self.state.lock().await;
        if state.fail_tags {
            return Err(DaemonError::Rejected {
                operation: "tag",
                target: target.to_string(),
                message: "tagging disabled".to_string(),
            });
        }

        let id = state
            .references
            .get(source)
            .cloned()
            .ok_or_else(|| DaemonError::NotFound(source.to_string()))?;
        debug!(source = %source, target = %target, "[MOCK] Tagging image");
        state.references.insert(target.to_string(), id);
        Ok(())
    }

    async fn push_image(
        &self,
        cancel: &Cancellation,
        reference: &str,
    ) -> Result<String, DaemonError> {
        check(cancel)?;
        let mut state = self.state.lock().await;
        if state.fail_pushes {
            return Err(DaemonError::Rejected {
                operation: "push",
                target: reference.to_string(),
                message: "registry unavailable".to_string(),
            });
        }

        let id = state
            .references
            .get(reference)
            .cloned()
            .ok_or_else(|| DaemonError::NotFound(reference.to_string()))?;
        state.pushed.push(reference.to_string());
        Ok(format!("{reference}@{id}"))
    }

    async fn image_id(
        &self,
        cancel: &Cancellation,
        reference: &str,
    ) -> Result<String, DaemonError> {
        check(cancel)?;
        self.state
            .lock()
            .await
            .references
            .get(reference)
            .cloned()
            .ok_or_else(|| DaemonError::NotFound(reference.to_string()))
    }

    async fn image_exists(
        &self,
        cancel: &Cancellation,
        reference: &str,
    ) -> Result<bool, DaemonError> {
        check(cancel)?;
        Ok(self.state.lock().await.references.contains_key(reference))
    }

    async fn remove_image(
        &self,
        cancel: &Cancellation,
        image_id: &str,
        options: RemoveOptions,
    ) -> Result<(), DaemonError> {
        check(cancel)?;
        let mut state = self.state.lock().await;
        if state.fail_removals {
            return Err(DaemonError::Rejected {
                operation: "remove",
                target: image_id.to_string(),
                message: "image is in use".to_string(),
            });
        }

        state.references.retain(|_, id| id != image_id);
        for ids in state.history.values_mut() {
            ids.retain(|id| id != image_id);
        }
        state.removed.push((image_id.to_string(), options));
        Ok(())
    }

    async fn disk_usage(&self, cancel: &Cancellation) -> Result<u64, DaemonError> {
        check(cancel)?;
        let mut state = self.state.lock().await;
        state.disk_usage_calls += 1;

        let fail = match state.disk_usage_failures {
            DiskUsageFailures::None => false,
            DiskUsageFailures::Always => true,
            DiskUsageFailures::First(n) => state.disk_usage_calls <= n,
        };
        if fail {
            return Err(DaemonError::Command {
                command: "system df".to_string(),
                stderr: "daemon busy".to_string(),
            });
        }

        Ok(self.disk_usage_bytes)
    }

    async fn image_history(
        &self,
        cancel: &Cancellation,
        image_name: &str,
    ) -> Result<Vec<String>, DaemonError> {
        check(cancel)?;
        Ok(self.history_of(image_name).await)
    }
}
