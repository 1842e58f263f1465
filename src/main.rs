use std::process::ExitCode;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use component_ci::config::{Config, ConfigError};
use component_ci::executor::{Npm, ProcessModelGenerator, ProcessTestExecutor};
use component_ci::git::{GitError, cleanup_stale};
use component_ci::pipeline::BuildRunner;
use component_ci::pubsub::{Broker, Topic};
use component_ci::scheduler::{CoverageRunner, TestRunner};
use component_ci::server::{AppState, build_router};
use component_ci::store::{FileStore, StoreError};
use component_ci::worker::FamilyWorker;

/// Log filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "component_ci=debug";

#[derive(Debug, Error)]
enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to open store: {0}")]
    Store(#[from] StoreError),

    #[error("failed to clean working trees: {0}")]
    Git(#[from] GitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), StartupError> {
    let config = Config::from_env()?;

    let store = Arc::new(FileStore::open(config.store_dir())?);

    for root in ["builds", "tests", "coverage"].map(|d| config.work_dir.join(d)) {
        let removed = cleanup_stale(&root, config.stale_tree_age)?;
        if !removed.is_empty() {
            info!(root = %root.display(), removed = removed.len(), "Removed stale working trees");
        }
    }

    let broker = Arc::new(Broker::new());
    let packages = Arc::new(Npm::new(config.package_manager.clone()));
    let executor = Arc::new(ProcessTestExecutor::new(config.test_command.clone()));
    let models = Arc::new(ProcessModelGenerator::new(config.model_command.clone()));
    let shutdown = CancellationToken::new();

    let workers = vec![
        FamilyWorker::spawn(
            "builds",
            broker.subscribe(Topic::Builds).await,
            Arc::new(BuildRunner::new(
                store.clone(),
                packages.clone(),
                config.pipeline_config(),
            )),
            shutdown.child_token(),
        ),
        FamilyWorker::spawn(
            "tests",
            broker.subscribe(Topic::Tests).await,
            Arc::new(TestRunner::new(
                store.clone(),
                packages.clone(),
                executor.clone(),
                models,
                config.scheduler_config(),
            )),
            shutdown.child_token(),
        ),
        FamilyWorker::spawn(
            "coverage",
            broker.subscribe(Topic::Coverage).await,
            Arc::new(CoverageRunner::new(
                store.clone(),
                packages,
                executor,
                config.coverage_config(),
            )),
            shutdown.child_token(),
        ),
    ];

    let queues = workers.iter().map(|w| w.queue().clone()).collect();
    let app = build_router(AppState::with_queues(
        store,
        broker,
        config.webhook_secret.as_bytes(),
        queues,
    ));

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Ctrl-C received, shutting down"),
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
            }
            server_shutdown.cancel();
        })
        .await?;

    for worker in workers {
        worker.shutdown().await;
    }
    info!("Shutdown complete");
    Ok(())
}
