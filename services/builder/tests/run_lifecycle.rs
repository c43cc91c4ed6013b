use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shipyard_builder::artifact::CustomArtifact;
use shipyard_builder::build::publish;
use shipyard_builder::{
    Artifact, BuildError, BuildStrategy, Builder, Cancellation, Dispatcher, InMemoryDaemon,
    PruneError, Pruner, PrunerConfig, RemoveOptions, RunError, Runner, StrategyKind, TagPolicy,
};

/// Builds by registering a fresh image for the tag with the in-memory daemon.
struct LocalBuilder {
    daemon: Arc<InMemoryDaemon>,
    broken: Option<&'static str>,
    slow: Option<(&'static str, Duration)>,
}

#[async_trait]
impl Builder for LocalBuilder {
    async fn build(
        &self,
        cancel: &Cancellation,
        artifact: &Artifact,
        tag: &str,
    ) -> Result<String, BuildError> {
        if let Some((name, delay)) = self.slow {
            if name == artifact.image_name {
                tokio::time::sleep(delay).await;
            }
        }
        if self.broken == Some(artifact.image_name.as_str()) {
            return Err(BuildError::Backend {
                artifact: artifact.image_name.clone(),
                output: "Could not find goal 'build' in plugin".to_string(),
            });
        }
        self.daemon.add_built_image(tag).await;
        publish(self.daemon.as_ref(), cancel, tag, false).await
    }
}

fn artifact(name: &str) -> Artifact {
    Artifact::new(
        name,
        ".",
        BuildStrategy::Custom(CustomArtifact {
            build_command: "true".to_string(),
        }),
    )
}

fn policy() -> TagPolicy {
    TagPolicy::Template {
        template: "release".to_string(),
    }
}

fn runner(daemon: &Arc<InMemoryDaemon>, broken: Option<&'static str>, prune: bool) -> Runner {
    runner_with(
        LocalBuilder {
            daemon: Arc::clone(daemon),
            broken,
            slow: None,
        },
        daemon,
        prune,
    )
}

fn runner_with(builder: LocalBuilder, daemon: &Arc<InMemoryDaemon>, prune: bool) -> Runner {
    let mut dispatcher = Dispatcher::new(2);
    dispatcher.register(StrategyKind::Custom, Arc::new(builder));
    let pruner = Pruner::new(
        daemon.clone(),
        PrunerConfig {
            enabled: prune,
            usage_retries: 2,
            usage_retry_interval: Duration::from_millis(1),
        },
    );
    Runner::new(dispatcher, pruner)
}

fn removed_ids(removed: &[(String, RemoveOptions)]) -> Vec<&str> {
    removed.iter().map(|(id, _)| id.as_str()).collect()
}

#[tokio::test]
async fn run_builds_then_prunes_superseded_images() {
    let daemon = Arc::new(
        InMemoryDaemon::new(1 << 30)
            .with_history("foo", &["old-1", "old-2"])
            .with_history("unrelated", &["keep-1", "keep-2"]),
    );
    let runner = runner(&daemon, None, true);

    let images = runner
        .run(
            &Cancellation::never(),
            &[artifact("foo"), artifact("bar")],
            &policy(),
        )
        .await
        .unwrap();

    assert_eq!(images.len(), 2);
    assert_eq!(images[0].tag, "foo:release");
    assert_eq!(images[1].tag, "bar:release");

    let removed = daemon.removed().await;
    assert_eq!(removed_ids(&removed), vec!["old-1", "old-2"]);
    assert_eq!(daemon.history_of("foo").await, vec![images[0].reference.clone()]);
    assert_eq!(daemon.history_of("bar").await, vec![images[1].reference.clone()]);
    assert_eq!(daemon.history_of("unrelated").await.len(), 2);
}

#[tokio::test]
async fn repeated_artifact_keeps_one_image_per_occurrence() {
    let daemon = Arc::new(InMemoryDaemon::new(0).with_history("foo", &["old-1", "old-2"]));
    let runner = runner(&daemon, None, true);

    runner
        .run(
            &Cancellation::never(),
            &[artifact("foo"), artifact("foo")],
            &policy(),
        )
        .await
        .unwrap();

    assert_eq!(removed_ids(&daemon.removed().await), vec!["old-1", "old-2"]);
    assert_eq!(daemon.history_of("foo").await.len(), 2);
}

#[tokio::test]
async fn prune_waits_for_running_builds_after_failure() {
    let daemon = Arc::new(
        InMemoryDaemon::new(0)
            .with_history("slow", &["old-1", "old-2"])
            .with_history("broken", &["broken-1"]),
    );
    let runner = runner_with(
        LocalBuilder {
            daemon: Arc::clone(&daemon),
            broken: Some("broken"),
            slow: Some(("slow", Duration::from_millis(200))),
        },
        &daemon,
        true,
    );

    let err = runner
        .run(
            &Cancellation::never(),
            &[artifact("slow"), artifact("broken")],
            &policy(),
        )
        .await
        .unwrap_err();

    match err {
        RunError::Build(BuildError::Backend { artifact, output }) => {
            assert_eq!(artifact, "broken");
            assert_eq!(output, "Could not find goal 'build' in plugin");
        }
        other => panic!("unexpected error {other:?}"),
    }

    // The slow build finished before the pass read history, so only its
    // fresh image survives.
    let built = daemon.references().await["slow:release"].clone();
    assert_eq!(removed_ids(&daemon.removed().await), vec!["old-1", "old-2"]);
    assert_eq!(daemon.history_of("slow").await, vec![built]);
    assert_eq!(daemon.history_of("broken").await, vec!["broken-1".to_string()]);
}

#[tokio::test]
async fn removal_failure_surfaces_as_prune_error() {
    let daemon = Arc::new(
        InMemoryDaemon::new(0)
            .with_history("foo", &["old-1"])
            .failing_removals(),
    );
    let runner = runner(&daemon, None, true);

    let err = runner
        .run(&Cancellation::never(), &[artifact("foo")], &policy())
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Prune(PruneError::Remove { .. })));
    assert!(err.to_string().starts_with("pruning images"));
}

#[tokio::test]
async fn disabled_pruning_leaves_history_alone() {
    let daemon = Arc::new(InMemoryDaemon::new(0).with_history("foo", &["old-1", "old-2"]));
    let runner = runner(&daemon, None, false);

    runner
        .run(&Cancellation::never(), &[artifact("foo")], &policy())
        .await
        .unwrap();

    assert!(daemon.removed().await.is_empty());
    assert_eq!(daemon.history_of("foo").await.len(), 3);
    assert_eq!(daemon.disk_usage_calls().await, 0);
}
