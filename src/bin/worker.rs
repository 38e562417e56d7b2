use std::sync::Arc;

use tokio::{signal, sync::watch};
use tracing_subscriber::EnvFilter;

use askdoc::{build_state, config::AppConfig, default_handlers, Worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "worker",
        database_path = %config.database_path,
        pool_size = 1,
        orchestrator_url = ?config.redacted_orchestrator_url(),
        poll_interval_ms = config.worker_poll_interval.as_millis() as u64,
        "loaded configuration"
    );
    let state = build_state(config, 1).await?;
    let poll_interval = state.config.worker_poll_interval;
    let worker = Worker::new(Arc::new(state), default_handlers(), poll_interval);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("worker received shutdown signal");
        }
        let _ = shutdown_tx.send(true);
    });

    worker.run(shutdown_rx).await;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
