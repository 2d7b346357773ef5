//! MailPilot - scheduling assistant server
//!
//! Main entry point: loads configuration, wires the context, starts the
//! background tasks and serves HTTP until interrupted.

use std::sync::Arc;

use anyhow::Context;
use mailpilot_api::utils::logging::init_logging;
use mailpilot_api::{build_router, AppContext};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env first so RUST_LOG and MAILPILOT_* apply to logging and config
    let dotenv = dotenvy::dotenv();
    init_logging();
    match dotenv {
        Ok(path) => info!(path = %path.display(), "Loaded .env"),
        Err(err) => info!(error = %err, "No .env file loaded"),
    }

    let config = mailpilot_infra::config::load().context("failed to load configuration")?;
    let bind_address = config.server.bind_address.clone();

    let ctx = Arc::new(AppContext::new(config).await.context("failed to initialise application")?);
    ctx.start_background().await.context("failed to start background tasks")?;

    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    info!(address = %bind_address, "MailPilot listening");

    let served = axum::serve(listener, build_router(Arc::clone(&ctx)))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    ctx.shutdown().await;
    served.context("server error")?;
    info!("MailPilot stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
