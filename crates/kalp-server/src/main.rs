use tracing::{info, warn};

use kalp_server::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kalp=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    if config.uses_dev_secret() {
        warn!("KALP_JWT_SECRET is unset or the development placeholder; tokens are forgeable");
    }

    let db = kalp_db::Database::open(&config.db_path)?;
    let state = kalp_server::build_state(&config, db);
    let app = kalp_server::app(state);

    let addr = config.addr()?;
    info!("Kalp server listening on {}", addr);
    info!("Relaying prompts to {} ({})", config.model_url, config.model_name);
    if let Some(limit) = config.monthly_message_limit {
        info!("Monthly message limit: {}", limit);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
