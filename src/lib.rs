use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod jobs;
pub mod models;
pub mod orchestrator;
pub mod routes;
pub mod schema;
pub mod state;
pub mod storage;
pub mod store;
pub mod utils {
    pub mod json;
}
pub mod workers;

pub use workers::{default_handlers, Worker};

use config::AppConfig;
use orchestrator::{HttpOrchestrator, Orchestrator};
use state::AppState;
use storage::LocalStorage;

/// Connects to the configured orchestrator. Any failure leaves the service
/// in placeholder mode.
pub async fn connect_orchestrator(config: &AppConfig) -> Option<Arc<dyn Orchestrator>> {
    let url = config.orchestrator_url.as_deref()?;
    match HttpOrchestrator::connect(url, &config.rag, &config.llm).await {
        Ok(orchestrator) => {
            info!(
                orchestrator_url = ?config.redacted_orchestrator_url(),
                llm_provider = %config.llm.provider,
                llm_model = %config.llm.llm_model,
                "orchestrator connected"
            );
            Some(Arc::new(orchestrator))
        }
        Err(err) => {
            warn!(
                orchestrator_url = ?config.redacted_orchestrator_url(),
                error = %err,
                "orchestrator unavailable; running in placeholder mode"
            );
            None
        }
    }
}

/// Opens the pool, applies migrations and wires storage and orchestrator
/// into a fresh [`AppState`].
pub async fn build_state(config: AppConfig, pool_size: u32) -> Result<AppState> {
    let pool = db::init_pool_with_size(&config.database_path, pool_size)?;
    db::run_migrations(&pool)?;

    let storage = Arc::new(LocalStorage::new(config.documents_dir.clone()));
    let orchestrator = match config.orchestrator_url {
        Some(_) => connect_orchestrator(&config).await,
        None => {
            warn!("no orchestrator configured; running in placeholder mode");
            None
        }
    };

    Ok(AppState::new(pool, config, storage, orchestrator))
}
