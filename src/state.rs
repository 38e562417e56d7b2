use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::{SqlitePool, SqlitePooledConnection},
    error::AppResult,
    orchestrator::Orchestrator,
    storage::DocumentStorage,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn DocumentStorage>,
    /// `None` runs the service in placeholder mode.
    pub orchestrator: Option<Arc<dyn Orchestrator>>,
}

impl AppState {
    pub fn new(
        pool: SqlitePool,
        config: AppConfig,
        storage: Arc<dyn DocumentStorage>,
        orchestrator: Option<Arc<dyn Orchestrator>>,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            storage,
            orchestrator,
        }
    }

    pub fn db(&self) -> AppResult<SqlitePooledConnection> {
        Ok(self.pool.get()?)
    }

    pub fn orchestrator(&self) -> Option<&Arc<dyn Orchestrator>> {
        self.orchestrator.as_ref()
    }
}
