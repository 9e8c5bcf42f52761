use std::time::Duration;

use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    info!(
        "classhub starting (build {})",
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown")
    );

    // Missing backend configuration is fatal; fail before binding anything.
    let config = classhub::Config::from_env()?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_task = tokio::spawn(async move {
        if let Err(e) = classhub::start_server_with_config(config, shutdown_rx).await {
            eprintln!("server error: {e}");
        }
    });

    // Wait for Ctrl-C
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, stopping server...");

    let _ = shutdown_tx.send(());
    // short grace period for in-flight requests
    tokio::time::sleep(Duration::from_millis(200)).await;
    server_task.abort();

    info!("server stopped");
    Ok(())
}
