//! Quayside deploy service binary.
//!
//! Runs the worker pool that drains the deploy queue and processes
//! blueprints into running services.

use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use quayside_deploy::{
    CaddyManager, CommandExecutor, Components, DeployConfig, DeployQueue, DeployWorker,
    EnvironmentCheck, HttpClient, MemoryStore, Orchestrator, RuntimeManager, SchemaCache,
    SecretsManager, SourceProvider, Stores,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("quayside_deploy=info".parse()?),
        )
        .init();

    info!("Quayside deploy service starting");

    let config = DeployConfig::load().unwrap_or_else(|e| {
        info!(error = %e, "failed to load config, using defaults");
        DeployConfig::default()
    });

    let check = EnvironmentCheck::run();
    check.validate()?;

    ensure_directories(&config).await?;

    let queue = Arc::new(DeployQueue::new(
        config.queue.max_size,
        config.queue.exclusivity(),
    ));
    let executor = CommandExecutor::with_queue(Arc::clone(&queue));
    let http = HttpClient::new(config.command.timeout())?;

    let schema = Arc::new(SchemaCache::new(
        http.clone(),
        config.schema.url.clone(),
        config.schema.ttl(),
    ));

    let store = Arc::new(MemoryStore::new());
    let stores = Stores {
        blueprints: store.clone(),
        remotes: store.clone(),
        services: store,
    };
    let components = Components {
        executor: executor.clone(),
        proxy: CaddyManager::new(executor.clone(), http.clone(), config.proxy.clone()),
        runtimes: RuntimeManager::new(executor.clone(), config.command.timeout()),
        secrets: SecretsManager::new(config.paths.staging_root.clone(), executor.clone()),
        source: SourceProvider::new(
            http,
            executor.clone(),
            config.providers.clone(),
            config.command.timeout(),
        ),
        schema,
    };

    let orchestrator = Arc::new(Orchestrator::new(
        stores,
        components,
        config.paths.clone(),
        config.command.timeout(),
    ));

    let cancel = CancellationToken::new();
    let mut handles = Vec::with_capacity(config.queue.workers);
    for id in 0..config.queue.workers {
        let worker = DeployWorker::new(
            id,
            Arc::clone(&queue),
            Arc::clone(&orchestrator),
            executor.clone(),
        );
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            worker.run(cancel).await;
        }));
    }
    info!(count = config.queue.workers, "deploy workers started");

    shutdown_signal().await;
    cancel.cancel();

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "worker task failed");
        }
    }

    info!("deploy service shutdown complete");
    Ok(())
}

async fn ensure_directories(config: &DeployConfig) -> Result<(), std::io::Error> {
    tokio::fs::create_dir_all(&config.paths.services_root).await?;
    tokio::fs::create_dir_all(&config.paths.staging_root).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
    }
}
