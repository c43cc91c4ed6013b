//! shipyard builder
//!
//! Builds the artifacts listed in `SHIPYARD_RUN_FILE`, tags them with the
//! configured policy and prunes stale local images afterwards.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use shipyard_builder::config::Config;
use shipyard_builder::{
    register_default_builders, Artifact, BackendSettings, Cancellation, Dispatcher, DockerCli, ImageDaemon,
    Profiler, ProfilingConfig, Pruner, Runner,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    let profiling = ProfilingConfig::from_env();

    let span_events = if profiling.trace_export {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_span_events(span_events))
        .init();

    info!(
        run_file = %config.run_file.display(),
        push = config.push,
        prune = config.prune,
        concurrency = config.concurrency,
        "Configuration loaded"
    );

    let raw = tokio::fs::read(&config.run_file)
        .await
        .with_context(|| format!("reading {}", config.run_file.display()))?;
    let artifacts: Vec<Artifact> = serde_json::from_slice(&raw)
        .with_context(|| format!("parsing {}", config.run_file.display()))?;

    let profiler = Profiler::new(&profiling);
    let daemon: Arc<dyn ImageDaemon> =
        Arc::new(DockerCli::new(&config.docker_binary).with_profiler(profiler.clone()));

    let settings = BackendSettings {
        profiler: profiler.clone(),
        ..config.backend_settings()
    };
    let mut dispatcher = Dispatcher::new(config.concurrency).with_profiler(profiler);
    register_default_builders(&mut dispatcher, Arc::clone(&daemon), &settings);
    let runner = Runner::new(dispatcher, Pruner::new(daemon, config.pruner_config()));

    let (handle, cancel) = Cancellation::new();
    let cancel = match config.run_timeout {
        Some(timeout) => cancel.with_timeout(timeout),
        None => cancel,
    };
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt, cancelling run");
            handle.cancel();
        }
    });

    match runner.run(&cancel, &artifacts, &config.tag_policy).await {
        Ok(images) => {
            for image in &images {
                info!(artifact = %image.image_name, tag = %image.tag, reference = %image.reference, "Image ready");
            }
            println!("{}", serde_json::to_string_pretty(&images)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Run failed");
            Err(e.into())
        }
    }
}
