use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use voxbridge::{AppConfig, AppState, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (must happen before config loading).
    let _ = dotenvy::dotenv();

    // LOG_LEVEL takes a full tracing filter, e.g. "voxbridge=debug".
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new("voxbridge=info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env().context("configuration error")?;
    let address = config.address();

    let state = AppState::new(config)
        .await
        .context("could not open the appointments database")?;

    let app = routes::create_router().with_state(state);

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("could not bind {address}"))?;
    tracing::info!(%address, "voxbridge listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
