use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pgsession::{config::Config, routes, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let state = if config.database_url.is_some() {
        AppState::new(&config).await
    } else {
        tracing::warn!("⚠️ DATABASE_URL not set, sessions are kept in memory");
        AppState::in_memory(&config).await
    };
    let state = match state {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("❌ Failed to initialize session store: {}", e);
            return Err(e.into());
        }
    };
    tracing::info!("✅ AppState initialized");

    state.sweeper.start(config.sweep_interval).await?;
    tracing::info!(
        "✅ Expired session sweeper started (every {}s)",
        config.sweep_interval.as_secs()
    );

    let app = routes::app(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("🚀 Server listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.sweeper.stop().await;
    tracing::info!("✅ Sweeper stopped, shutting down");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("🛑 Shutdown signal received");
}
