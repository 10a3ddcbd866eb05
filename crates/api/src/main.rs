use std::net::SocketAddr;
use std::sync::Arc;

use recon_api::config::ServerConfig;
use recon_api::router::build_app_router;
use recon_api::state::{AppState, ServiceInfo};
use recon_core::config::ServiceConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into());
        format!("recon_api={level},recon_db={level},tower_http={level}").into()
    });
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid server configuration");
    let service = ServiceConfig::from_env().expect("Invalid service configuration");
    tracing::info!(
        host = %config.host,
        port = config.port,
        api_key = config.api_key.is_some(),
        "Loaded server configuration",
    );

    // --- Database ---
    let pool = recon_db::create_pool(&service.queue.database_url, service.queue.max_connections)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    recon_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    recon_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- App state ---
    let state = AppState {
        queue: Arc::new(recon_db::PgDispatchQueue::new(pool, &service.queue)),
        config: Arc::new(config.clone()),
        service: Arc::new(ServiceInfo::from_config(&service)),
    };
    let app = build_app_router(state);

    // --- Start server ---
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Invalid HOST:PORT combination");

    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Server shut down");
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
