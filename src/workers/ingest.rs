use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::task;
use tracing::{debug, error, info, warn};

use crate::{
    ingest::IngestPayload,
    jobs::{find_job, JOB_INGEST_DOCUMENT, MAX_ATTEMPTS},
    models::{DocumentStatus, Job, META_CHUNK_COUNT, META_ERROR, META_STATUS},
    orchestrator::{IngestRequest, Orchestrator, OrchestratorError},
    state::AppState,
};

use super::{JobExecution, JobHandler};

pub const ORCHESTRATOR_UNAVAILABLE: &str = "orchestrator not available";

const TRANSPORT_RETRY_DELAY: Duration = Duration::from_secs(30);

pub struct IngestDocumentJob;

impl IngestDocumentJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for IngestDocumentJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for IngestDocumentJob {
    fn job_type(&self) -> &'static str {
        JOB_INGEST_DOCUMENT
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let payload = match IngestPayload::from_job(&job) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid ingest payload: {err}"),
                }
            }
        };

        let Some(orchestrator) = state.orchestrator().cloned() else {
            warn!(job_id = %job.id, "no orchestrator configured; failing ingestion");
            return JobExecution::Failed {
                error: ORCHESTRATOR_UNAVAILABLE.into(),
            };
        };

        let request = IngestRequest {
            path: PathBuf::from(&payload.path),
            document_id: job.id.clone(),
            filename: payload.filename.clone(),
            chunk_size: state.config.rag.chunk_size,
            overlap: state.config.rag.chunk_overlap,
            metadata: payload.metadata_bag(),
        };

        let outcome = match orchestrator.ingest_file(request).await {
            Ok(outcome) => outcome,
            Err(err) => return ingest_failed(orchestrator.as_ref(), &job, err).await,
        };

        if outcome.document_id != job.id {
            warn!(
                job_id = %job.id,
                stored_id = %outcome.document_id,
                "orchestrator stored document under a different id"
            );
        }

        let mut update = Map::new();
        update.insert(META_STATUS.into(), Value::from(DocumentStatus::Ready.as_str()));
        update.insert(META_CHUNK_COUNT.into(), Value::from(outcome.chunk_count));
        if let Err(err) = orchestrator
            .update_document_metadata(&outcome.document_id, update)
            .await
        {
            return ingest_failed(orchestrator.as_ref(), &job, err).await;
        }

        if !job_still_exists(state.clone(), &job.id).await {
            info!(document_id = %job.id, "document deleted during ingestion; removing stored copy");
            if let Err(err) = orchestrator.delete_document(&outcome.document_id).await {
                error!(document_id = %job.id, error = %err, "failed to remove orphaned document");
            }
            return JobExecution::Success;
        }

        info!(
            document_id = %job.id,
            collection_id = %payload.collection_id,
            chunk_count = outcome.chunk_count,
            "document ingested"
        );
        JobExecution::Success
    }
}

/// Tags the external document as failed where possible. Transport errors are
/// retried while attempts remain.
async fn ingest_failed(
    orchestrator: &dyn Orchestrator,
    job: &Job,
    err: OrchestratorError,
) -> JobExecution {
    let message = err.to_string();

    if matches!(err, OrchestratorError::Request(_)) && job.attempts < MAX_ATTEMPTS {
        return JobExecution::Retry {
            delay: TRANSPORT_RETRY_DELAY,
            error: message,
        };
    }

    let mut update = Map::new();
    update.insert(META_STATUS.into(), Value::from(DocumentStatus::Failed.as_str()));
    update.insert(META_ERROR.into(), Value::from(message.clone()));
    if let Err(tag_err) = orchestrator.update_document_metadata(&job.id, update).await {
        debug!(document_id = %job.id, error = %tag_err, "could not tag failed document");
    }

    JobExecution::Failed { error: message }
}

async fn job_still_exists(state: Arc<AppState>, job_id: &str) -> bool {
    let job_id = job_id.to_string();
    let lookup = task::spawn_blocking(move || {
        let mut conn = state.db().map_err(|err| err.to_string())?;
        find_job(&mut conn, &job_id).map_err(|err| err.to_string())
    })
    .await;

    match lookup {
        Ok(Ok(found)) => found.is_some(),
        Ok(Err(err)) => {
            warn!(error = %err, "failed to check ingestion job; assuming it still exists");
            true
        }
        Err(join_err) => {
            error!(error = %join_err, "job lookup task panicked");
            true
        }
    }
}
