//! BMS realtime relay server.

use anyhow::Context;
use bms_realtime_server::{serve, AppState, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bms_realtime_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    if config.tokens.is_empty() {
        tracing::warn!("BMS_REALTIME_TOKENS is unset; any non-empty token is accepted");
    }

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!("Starting realtime relay on {}", config.bind);

    serve(listener, AppState::new(config)).await?;
    Ok(())
}
