use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use backend::{
    build_http_client,
    config::Config,
    db::{self, PgScanStore},
    repository::SharedStore,
    router,
    scanner::ScanQueue,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::debug!("Provider settings: {:?}", config.provider);

    // Establish database connection pool
    let pool = db::establish_connection_pool(&config.database_url, config.db_require_tls)?;
    db::run_migrations(&pool)
        .await
        .context("Failed to initialize the scanned_emails table")?;
    tracing::info!("Database ready");

    let store: SharedStore = Arc::new(PgScanStore::new(pool));
    let http = build_http_client(config.http_timeout)?;
    let (scan_queue, scan_rx) = ScanQueue::channel(config.scan_queue_capacity);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState::new(config, http, store, scan_queue);

    // Start the notification scan worker
    let worker = state.scan_worker().spawn(scan_rx);

    let app = router(state);

    tracing::info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    worker.abort();
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
