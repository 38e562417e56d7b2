use std::sync::Arc;

use tokio::{net::TcpListener, signal, sync::watch};
use tracing_subscriber::EnvFilter;

use askdoc::{build_state, config::AppConfig, default_handlers, routes, Worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "server",
        listen = %config.listen_address(),
        database_path = %config.database_path,
        pool_size = config.database_max_pool_size,
        documents_dir = %config.documents_dir.display(),
        orchestrator_url = ?config.redacted_orchestrator_url(),
        llm_base_url = %config.redacted_llm_base_url(),
        admin_auth = config.admin_api_key.is_some(),
        rate_limit_enabled = config.rate_limit.enabled,
        rate_limit_per_hour = config.rate_limit.requests_per_hour,
        embedded_worker = config.embedded_worker,
        "loaded configuration"
    );

    let pool_size = config.database_max_pool_size;
    let state = build_state(config, pool_size).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = if state.config.embedded_worker {
        let worker = Worker::new(
            Arc::new(state.clone()),
            default_handlers(),
            state.config.worker_poll_interval,
        );
        Some(tokio::spawn(async move { worker.run(shutdown_rx).await }))
    } else {
        None
    };

    let address = state.config.listen_address();
    let listener = TcpListener::bind(&address).await?;
    tracing::info!(%address, "http server listening");

    axum::serve(listener, routes::create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = worker_handle {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "worker task ended abnormally");
        }
    }
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("received shutdown signal");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
