use std::sync::Arc;

use recon_core::config::ServiceConfig;
use recon_core::provider::ProviderRegistry;
use recon_core::queue::DispatchQueue;
use recon_core::workspace::sweep_stale;
use recon_events::WebhookDelivery;
use recon_worker::{reaper, JobPipeline, PipelineSettings, WorkerContext, WorkerPool};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into());
        format!("recon_worker={level},recon_core={level},recon_db={level},recon_storage={level},recon_events={level}").into()
    });
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    // --- Configuration ---
    let config = ServiceConfig::from_env().expect("Invalid configuration");
    tracing::info!(
        provider = %config.reconstruction.provider,
        binary = %config.reconstruction.binary.display(),
        workers = config.worker.max_concurrent_jobs,
        storage = config.storage.backend.name(),
        "Loaded worker configuration",
    );

    // --- Queue ---
    let pool = recon_db::create_pool(&config.queue.database_url, config.queue.max_connections)
        .await
        .expect("Failed to connect to database");
    recon_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    recon_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!(queue = %config.queue.queue_name, "Dispatch queue ready");
    let queue: Arc<dyn DispatchQueue> = Arc::new(recon_db::PgDispatchQueue::new(pool, &config.queue));

    // --- Collaborators ---
    let store = recon_storage::build_store(&config.storage)
        .await
        .expect("Failed to initialize artifact store");
    let provider = ProviderRegistry::with_defaults()
        .create(&config.reconstruction)
        .expect("Failed to initialize reconstruction provider");
    let notifier = Arc::new(WebhookDelivery::new(&config.notifier).expect("Failed to build webhook client"));

    // --- Stale workspaces ---
    let root = &config.reconstruction.workspace_dir;
    match sweep_stale(root, config.reconstruction.timeout * 2) {
        Ok(0) => {}
        Ok(removed) => tracing::info!(removed, root = %root.display(), "Removed stale workspaces"),
        Err(e) => tracing::warn!(root = %root.display(), error = %e, "Stale workspace sweep failed"),
    }

    // --- Workers ---
    let pipeline = JobPipeline::new(PipelineSettings::from_config(&config), store, provider);
    let context = Arc::new(WorkerContext::new(&config, Arc::clone(&queue), pipeline, notifier));
    let workers = WorkerPool::start(config.worker.max_concurrent_jobs, context);

    let reaper_cancel = CancellationToken::new();
    let reaper = tokio::spawn(reaper::run(
        queue,
        config.worker.dead_letter_sweep_interval,
        reaper_cancel.clone(),
    ));

    shutdown_signal().await;

    let aborted = workers.shutdown(config.worker.shutdown_grace).await;
    reaper_cancel.cancel();
    let _ = reaper.await;
    tracing::info!(aborted, "Worker shut down");
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, starting graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
