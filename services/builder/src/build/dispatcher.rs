//! Routes artifacts to backends and collects tagged results.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn, Instrument};

use shipyard_tagging::{RunTagger, TagContext, TagPolicy};

use super::{BuildError, Builder};
use crate::artifact::{tagged_name, Artifact, StrategyKind, TaggedImage};
use crate::cancel::{CancelReason, Cancellation};
use crate::profiling::Profiler;

/// Dispatches a run's artifacts to their registered backends.
pub struct Dispatcher {
    builders: HashMap<StrategyKind, Arc<dyn Builder>>,
    concurrency: usize,
    profiler: Profiler,
}

impl Dispatcher {
    /// Create a dispatcher running at most `concurrency` builds at once.
    pub fn new(concurrency: usize) -> Self {
        Self {
            builders: HashMap::new(),
            concurrency: concurrency.max(1),
            profiler: Profiler::disabled(),
        }
    }

    pub fn with_profiler(mut self, profiler: Profiler) -> Self {
        self.profiler = profiler;
        self
    }

    /// Register (or replace) the backend for a strategy kind.
    pub fn register(&mut self, kind: StrategyKind, builder: Arc<dyn Builder>) {
        self.builders.insert(kind, builder);
    }

    /// Build and tag every artifact, freezing `policy` at the start of the run.
    pub async fn build_and_tag(
        &self,
        cancel: &Cancellation,
        artifacts: &[Artifact],
        policy: &TagPolicy,
    ) -> Result<Vec<TaggedImage>, BuildError> {
        let tagger = policy.for_run().map_err(BuildError::RunTagPolicy)?;
        self.build_and_tag_with(cancel, artifacts, &tagger).await
    }

    /// Build and tag every artifact with an already frozen tagger.
    ///
    /// Results are returned in artifact order. After the first failure no
    /// further builds start, but builds already running are awaited before
    /// the first error is returned, so nothing touches the daemon once this
    /// returns.
    pub async fn build_and_tag_with(
        &self,
        cancel: &Cancellation,
        artifacts: &[Artifact],
        tagger: &RunTagger,
    ) -> Result<Vec<TaggedImage>, BuildError> {
        // Reject unknown strategies before anything is dispatched.
        let mut routed = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let kind = artifact.strategy.kind();
            let builder = self.builders.get(&kind).ok_or_else(|| {
                BuildError::UnsupportedStrategy {
                    artifact: artifact.image_name.clone(),
                    kind,
                }
            })?;
            routed.push((artifact.clone(), Arc::clone(builder)));
        }

        let profile = self.profiler.span("build");
        if let Some(e) = &profile.error {
            warn!(error = %e, "Profiling partially unavailable");
        }

        info!(
            artifacts = artifacts.len(),
            concurrency = self.concurrency,
            "Starting build run"
        );

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let tagger = Arc::new(tagger.clone());
        let mut pending = FuturesUnordered::new();

        for (index, (artifact, builder)) in routed.into_iter().enumerate() {
            let span = self.profiler.trace_span("build", &artifact.image_name);
            let task = BuildTask {
                artifact,
                builder,
                tagger: Arc::clone(&tagger),
                permits: Arc::clone(&permits),
                cancel: cancel.clone(),
            };
            let handle = tokio::spawn(task.run().instrument(span));
            pending.push(async move { (index, handle.await) });
        }

        let mut results: Vec<Option<TaggedImage>> = vec![None; artifacts.len()];
        let mut first_error = None;
        while let Some((index, joined)) = pending.next().await {
            let outcome = joined
                .map_err(|e| BuildError::Task(e.to_string()))
                .and_then(|result| result);
            match outcome {
                Ok(image) => results[index] = Some(image),
                Err(e) if first_error.is_none() => {
                    permits.close();
                    warn!(error = %e, "Build failed; waiting for running builds");
                    first_error = Some(e);
                }
                Err(e) => debug!(error = %e, "Build ended after run failure"),
            }
        }

        profile.stop.stop();
        match first_error {
            Some(e) => Err(e),
            None => Ok(results.into_iter().flatten().collect()),
        }
    }
}

/// One artifact's build, owned by its spawned task.
struct BuildTask {
    artifact: Artifact,
    builder: Arc<dyn Builder>,
    tagger: Arc<RunTagger>,
    permits: Arc<Semaphore>,
    cancel: Cancellation,
}

impl BuildTask {
    async fn run(self) -> Result<TaggedImage, BuildError> {
        // A closed semaphore means the run already failed.
        let _permit = self
            .cancel
            .run(Arc::clone(&self.permits).acquire_owned())
            .await?
            .map_err(|_| BuildError::Cancelled(CancelReason::Cancelled))?;

        let result = self.build().await;
        if result.is_err() {
            // Close before the permit is released so no queued build starts.
            self.permits.close();
        }
        result
    }

    async fn build(&self) -> Result<TaggedImage, BuildError> {
        let name = &self.artifact.image_name;
        let tag = self.resolve_tag().await?;
        let tag = tagged_name(name, &tag);
        debug!(artifact = %name, tag = %tag, "Resolved tag");

        let reference = self
            .builder
            .build(&self.cancel, &self.artifact, &tag)
            .await?;
        info!(artifact = %name, tag = %tag, reference = %reference, "Built image");

        Ok(TaggedImage {
            image_name: name.clone(),
            tag,
            reference,
        })
    }

    /// Tag resolution may walk the context or run `git`, so it runs on the
    /// blocking pool and is raced against cancellation.
    async fn resolve_tag(&self) -> Result<String, BuildError> {
        let tagger = Arc::clone(&self.tagger);
        let name = self.artifact.image_name.clone();
        let workspace = self.artifact.context.clone();

        let resolved = tokio::task::spawn_blocking(move || {
            tagger
                .resolve(&TagContext {
                    image_name: &name,
                    workspace: &workspace,
                })
                .map_err(|source| BuildError::TagPolicy {
                    artifact: name.clone(),
                    source,
                })
        });

        self.cancel
            .run(resolved)
            .await?
            .map_err(|e| BuildError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{BuildStrategy, CustomArtifact, DockerArtifact};
    use crate::build::publish;
    use crate::daemon::InMemoryDaemon;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Backend that "builds" by registering the tag with the in-memory daemon.
    struct FakeBuilder {
        daemon: Arc<InMemoryDaemon>,
        fail: Option<&'static str>,
        delays: HashMap<&'static str, Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeBuilder {
        fn new(daemon: Arc<InMemoryDaemon>) -> Self {
            Self {
                daemon,
                fail: None,
                delays: HashMap::new(),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Builder for FakeBuilder {
        async fn build(
            &self,
            cancel: &Cancellation,
            artifact: &Artifact,
            tag: &str,
        ) -> Result<String, BuildError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = self.delays.get(artifact.image_name.as_str()) {
                tokio::time::sleep(*delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail == Some(artifact.image_name.as_str()) {
                return Err(BuildError::Backend {
                    artifact: artifact.image_name.clone(),
                    output: "incompatible plugin version".to_string(),
                });
            }
            self.daemon.add_built_image(tag).await;
            publish(self.daemon.as_ref(), cancel, tag, false).await
        }
    }

    fn custom(name: &str) -> Artifact {
        Artifact::new(
            name,
            ".",
            BuildStrategy::Custom(CustomArtifact {
                build_command: "true".to_string(),
            }),
        )
    }

    fn tagger(template: &str) -> RunTagger {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let env = BTreeMap::from([("RELEASE".to_string(), "r7".to_string())]);
        TagPolicy::Template {
            template: template.to_string(),
        }
        .for_run_at(now, env)
        .unwrap()
    }

    fn dispatcher(concurrency: usize, builder: Arc<FakeBuilder>) -> Dispatcher {
        let mut dispatcher = Dispatcher::new(concurrency);
        dispatcher.register(StrategyKind::Custom, builder);
        dispatcher
    }

    #[tokio::test]
    async fn test_results_follow_artifact_order() {
        let daemon = Arc::new(InMemoryDaemon::default());
        let mut builder = FakeBuilder::new(daemon.clone());
        builder.delays.insert("a", Duration::from_millis(60));
        builder.delays.insert("b", Duration::from_millis(30));
        let dispatcher = dispatcher(3, Arc::new(builder));

        let images = dispatcher
            .build_and_tag_with(
                &Cancellation::never(),
                &[custom("a"), custom("b"), custom("c")],
                &tagger("{{.RELEASE}}"),
            )
            .await
            .unwrap();

        let tags: Vec<&str> = images.iter().map(|i| i.tag.as_str()).collect();
        assert_eq!(tags, vec!["a:r7", "b:r7", "c:r7"]);
        let references = daemon.references().await;
        for image in &images {
            assert_eq!(references.get(&image.tag), Some(&image.reference));
        }
    }

    #[tokio::test]
    async fn test_concurrency_bound_is_respected() {
        let daemon = Arc::new(InMemoryDaemon::default());
        let mut builder = FakeBuilder::new(daemon);
        for name in ["a", "b", "c", "d", "e"] {
            builder.delays.insert(name, Duration::from_millis(20));
        }
        let builder = Arc::new(builder);
        let dispatcher = dispatcher(2, builder.clone());

        let artifacts: Vec<Artifact> = ["a", "b", "c", "d", "e"].into_iter().map(custom).collect();
        dispatcher
            .build_and_tag_with(&Cancellation::never(), &artifacts, &tagger("v1"))
            .await
            .unwrap();

        assert!(builder.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_first_failure_waits_for_running_siblings() {
        let daemon = Arc::new(InMemoryDaemon::default());
        let mut builder = FakeBuilder::new(daemon.clone());
        builder.fail = Some("broken");
        builder.delays.insert("slow", Duration::from_millis(100));
        let dispatcher = dispatcher(2, Arc::new(builder));

        let err = dispatcher
            .build_and_tag_with(
                &Cancellation::never(),
                &[custom("slow"), custom("broken"), custom("never")],
                &tagger("v1"),
            )
            .await
            .unwrap_err();

        match err {
            BuildError::Backend { artifact, output } => {
                assert_eq!(artifact, "broken");
                assert_eq!(output, "incompatible plugin version");
            }
            other => panic!("unexpected error {other:?}"),
        }
        let references = daemon.references().await;
        assert!(references.contains_key("slow:v1"));
        assert!(!references.contains_key("never:v1"));
    }

    #[tokio::test]
    async fn test_content_digest_resolved_off_runtime() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        let daemon = Arc::new(InMemoryDaemon::default());
        let dispatcher = dispatcher(1, Arc::new(FakeBuilder::new(daemon)));
        let artifact = Artifact::new(
            "app",
            dir.path(),
            BuildStrategy::Custom(CustomArtifact {
                build_command: "true".to_string(),
            }),
        );

        let images = dispatcher
            .build_and_tag(&Cancellation::never(), &[artifact], &TagPolicy::ContentDigest)
            .await
            .unwrap();

        let digest = shipyard_tagging::context_digest(dir.path()).unwrap();
        assert_eq!(images[0].tag, format!("app:{digest}"));
    }

    #[tokio::test]
    async fn test_expired_deadline_builds_nothing() {
        let daemon = Arc::new(InMemoryDaemon::default());
        let dispatcher = dispatcher(1, Arc::new(FakeBuilder::new(daemon.clone())));
        let cancel = Cancellation::never().with_timeout(Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(5)).await;

        let err = dispatcher
            .build_and_tag_with(&cancel, &[custom("a")], &tagger("v1"))
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::Cancelled(CancelReason::DeadlineExceeded)));
        assert!(daemon.references().await.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_strategy_dispatches_nothing() {
        let daemon = Arc::new(InMemoryDaemon::default());
        let dispatcher = dispatcher(1, Arc::new(FakeBuilder::new(daemon.clone())));
        let docker = Artifact::new("web", ".", BuildStrategy::Docker(DockerArtifact::default()));

        let err = dispatcher
            .build_and_tag_with(
                &Cancellation::never(),
                &[custom("a"), docker],
                &tagger("v1"),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BuildError::UnsupportedStrategy { kind: StrategyKind::Docker, .. }
        ));
        assert!(daemon.references().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_template_variable_fails_artifact() {
        let daemon = Arc::new(InMemoryDaemon::default());
        let dispatcher = dispatcher(1, Arc::new(FakeBuilder::new(daemon)));

        let err = dispatcher
            .build_and_tag_with(
                &Cancellation::never(),
                &[custom("a")],
                &tagger("{{.NOT_SET}}"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::TagPolicy { ref artifact, .. } if artifact == "a"));
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let daemon = Arc::new(InMemoryDaemon::default());
        let dispatcher = dispatcher(1, Arc::new(FakeBuilder::new(daemon.clone())));
        let (handle, cancel) = Cancellation::new();
        handle.cancel();

        let err = dispatcher
            .build_and_tag_with(&cancel, &[custom("a")], &tagger("v1"))
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(daemon.references().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_run() {
        let dispatcher = Dispatcher::new(4);
        let images = dispatcher
            .build_and_tag(&Cancellation::never(), &[], &TagPolicy::ContentDigest)
            .await
            .unwrap();
        assert!(images.is_empty());
    }
}
