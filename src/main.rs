use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use moar_reader::config::Config;
use moar_reader::directory::SourceDirectory;
use moar_reader::fetcher::{start_background_refresh, Fetcher};
use moar_reader::routes::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "moar_reader=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = PathBuf::from(
        std::env::var("MOAR_READER_CONFIG").unwrap_or_else(|_| "sources.toml".to_string()),
    );
    let config = Config::load(&config_path)?;
    info!("Loaded {} sources from configuration", config.sources.len());
    let port = config.port;

    // Open one store per source and load its articles
    let directory = Arc::new(SourceDirectory::open(config, Some(config_path)).await?);

    // Create fetcher
    let fetcher = Arc::new(Fetcher::new(directory.clone())?);

    // Start background refresh task
    let bg_fetcher = fetcher.clone();
    let refresh_task = tokio::spawn(async move {
        start_background_refresh(bg_fetcher).await;
    });

    // Create app state
    let state = Arc::new(AppState::new(directory.clone(), fetcher.clone()));
    let app = routes::router(state.clone());

    // Start server
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Server starting on http://localhost:{}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the scheduler and let request-spawned fetches finish; after this
    // nothing submits writes
    refresh_task.abort();
    let _ = refresh_task.await;
    state.wait_background().await;
    directory.shutdown().await;
    info!("Exiting.");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
