//! Upload validation, the job-backed document view, and document removal.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::path::Path;

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::jobs::{
    delete_job, enqueue_job_with_id, find_job, unfinished_jobs, JobQueueError, JOB_INGEST_DOCUMENT,
    STATUS_FAILED, STATUS_PROCESSING, STATUS_QUEUED,
};
use crate::models::{
    Document, DocumentStatus, Job, META_CHECKSUM, META_COLLECTION_ID, META_FILENAME,
    META_FILE_SIZE, META_FILE_TYPE, META_STATUS,
};
use crate::orchestrator::OrchestratorError;
use crate::state::AppState;
use crate::store;

/// Extensions accepted for upload, lower-cased and without the dot.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "pdf", "md", "markdown", "txt", "html", "htm", "adoc", "asciidoc",
];

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// Maps a file name to its document type, or returns the offending
/// extension.
pub fn detect_file_type(filename: &str) -> Result<&'static str, String> {
    let ext = extension_of(filename);
    match ext.as_str() {
        "pdf" => Ok("pdf"),
        "md" | "markdown" => Ok("md"),
        "txt" => Ok("txt"),
        "html" | "htm" => Ok("html"),
        "adoc" | "asciidoc" => Ok("adoc"),
        _ => Err(ext),
    }
}

fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

/// Job payload of an ingestion job. The job id is the document id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestPayload {
    pub collection_id: String,
    pub filename: String,
    pub file_type: String,
    pub file_size: i64,
    pub checksum: String,
    pub path: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl IngestPayload {
    pub fn from_job(job: &Job) -> Result<Self, serde_json::Error> {
        serde_json::from_str(&job.payload)
    }

    /// Metadata tagged onto the external document at ingestion time. Caller
    /// metadata never overrides the tracked keys.
    pub fn metadata_bag(&self) -> Map<String, Value> {
        let mut bag = self.metadata.clone();
        bag.insert(META_COLLECTION_ID.into(), Value::from(self.collection_id.clone()));
        bag.insert(META_FILENAME.into(), Value::from(self.filename.clone()));
        bag.insert(META_FILE_TYPE.into(), Value::from(self.file_type.clone()));
        bag.insert(META_FILE_SIZE.into(), Value::from(self.file_size));
        bag.insert(META_CHECKSUM.into(), Value::from(self.checksum.clone()));
        bag.insert(
            META_STATUS.into(),
            Value::from(DocumentStatus::Processing.as_str()),
        );
        bag
    }
}

pub struct UploadedFile {
    pub filename: String,
    pub bytes: Bytes,
}

/// Stores the upload and queues it for ingestion. The returned document is
/// `pending`.
pub async fn upload_document(
    state: &AppState,
    collection_id: &str,
    file: UploadedFile,
    metadata: Map<String, Value>,
) -> AppResult<Document> {
    {
        let mut conn = state.db()?;
        if store::find_collection(&mut conn, collection_id)?.is_none() {
            return Err(AppError::not_found_named("collection"));
        }
    }

    let file_type = detect_file_type(&file.filename)
        .map_err(|ext| AppError::bad_request(format!("unsupported file type: {ext}")))?;
    let ext = extension_of(&file.filename);

    let document_id = Uuid::new_v4().to_string();
    let checksum = hex::encode(Sha256::digest(&file.bytes));
    let stored_name = format!("{document_id}.{ext}");
    let path = state
        .storage
        .put_document(collection_id, &stored_name, &file.bytes)
        .await?;

    let payload = IngestPayload {
        collection_id: collection_id.to_string(),
        filename: file.filename.clone(),
        file_type: file_type.to_string(),
        file_size: file.bytes.len() as i64,
        checksum,
        path: path.to_string_lossy().into_owned(),
        metadata,
    };
    let payload_value = serde_json::to_value(&payload)?;

    let enqueued = {
        let mut conn = state.db()?;
        conn.immediate_transaction(|conn| {
            store::adjust_document_count(conn, collection_id, 1)?;
            enqueue_job_with_id(conn, &document_id, JOB_INGEST_DOCUMENT, &payload_value, None)
        })
    };
    let job = match enqueued {
        Ok(job) => job,
        Err(err) => {
            if let Err(cleanup) = state
                .storage
                .remove_document(collection_id, &document_id, &[ext.as_str()])
                .await
            {
                warn!(error = %cleanup, document_id = %document_id, "failed to remove orphaned upload");
            }
            return Err(err.into());
        }
    };

    info!(
        document_id = %document_id,
        collection_id = %collection_id,
        file_type,
        file_size = payload.file_size,
        "queued document for ingestion"
    );

    Ok(Document {
        id: document_id,
        collection_id: payload.collection_id,
        filename: payload.filename,
        file_type: payload.file_type,
        file_size: payload.file_size,
        status: DocumentStatus::Pending,
        chunk_count: 0,
        metadata: payload.metadata,
        error: None,
        created_at: Some(job.created_at.and_utc().to_rfc3339()),
    })
}

/// Document view derived from an unfinished ingestion job. Succeeded jobs
/// have handed the document to the external store and yield nothing.
pub fn job_document(job: &Job) -> Option<Document> {
    let status = match job.status.as_str() {
        STATUS_QUEUED => DocumentStatus::Pending,
        STATUS_PROCESSING => DocumentStatus::Processing,
        STATUS_FAILED => DocumentStatus::Failed,
        _ => return None,
    };
    let payload = match IngestPayload::from_job(job) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(job_id = %job.id, error = %err, "skipping ingestion job with unreadable payload");
            return None;
        }
    };
    let error = (status == DocumentStatus::Failed)
        .then(|| job.last_error.clone())
        .flatten();

    Some(Document {
        id: job.id.clone(),
        collection_id: payload.collection_id,
        filename: payload.filename,
        file_type: payload.file_type,
        file_size: payload.file_size,
        status,
        chunk_count: 0,
        metadata: payload.metadata,
        error,
        created_at: Some(job.created_at.and_utc().to_rfc3339()),
    })
}

/// Clamps raw paging parameters: page defaults to 1, page size to 20 and
/// falls back to 20 outside 1..=100.
pub fn normalize_paging(page: Option<i64>, page_size: Option<i64>) -> (usize, usize) {
    let page = page.filter(|p| *p >= 1).unwrap_or(1) as usize;
    let page_size = page_size
        .filter(|size| (1..=MAX_PAGE_SIZE as i64).contains(size))
        .map(|size| size as usize)
        .unwrap_or(DEFAULT_PAGE_SIZE);
    (page, page_size)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentPage {
    pub documents: Vec<Document>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// Orchestrator timestamps vary in precision and offset; naive ones are UTC.
fn created_instant(created_at: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = created_at?;
    DateTime::parse_from_rfc3339(raw)
        .map(|instant| instant.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| naive.and_utc())
        })
        .ok()
}

/// Newest first; documents without a readable timestamp sort last.
fn paginate(mut documents: Vec<Document>, page: usize, page_size: usize) -> DocumentPage {
    documents.sort_by_cached_key(|doc| Reverse(created_instant(doc.created_at.as_deref())));
    let total = documents.len();
    let start = page.saturating_sub(1).saturating_mul(page_size).min(total);
    let end = start.saturating_add(page_size).min(total);
    let documents = documents.drain(start..end).collect();
    DocumentPage {
        documents,
        total,
        page,
        page_size,
    }
}

fn collection_jobs(
    conn: &mut SqliteConnection,
    collection_id: &str,
) -> Result<Vec<Document>, JobQueueError> {
    Ok(unfinished_jobs(conn, JOB_INGEST_DOCUMENT)?
        .iter()
        .filter_map(job_document)
        .filter(|doc| doc.collection_id == collection_id)
        .collect())
}

pub async fn list_documents(
    state: &AppState,
    collection_id: &str,
    page: usize,
    page_size: usize,
) -> AppResult<DocumentPage> {
    let pending = {
        let mut conn = state.db()?;
        if store::find_collection(&mut conn, collection_id)?.is_none() {
            return Err(AppError::not_found_named("collection"));
        }
        collection_jobs(&mut conn, collection_id)?
    };

    let mut documents: Vec<Document> = match state.orchestrator() {
        Some(orchestrator) => orchestrator
            .list_documents_by_collection(collection_id)
            .await?
            .into_iter()
            .map(|doc| doc.into_document())
            .collect(),
        None => Vec::new(),
    };

    let known: HashSet<String> = documents.iter().map(|doc| doc.id.clone()).collect();
    documents.extend(pending.into_iter().filter(|doc| !known.contains(&doc.id)));

    Ok(paginate(documents, page, page_size))
}

pub async fn get_document(state: &AppState, document_id: &str) -> AppResult<Document> {
    if let Some(orchestrator) = state.orchestrator() {
        if let Some(external) = orchestrator.get_document(document_id).await? {
            return Ok(external.into_document());
        }
    }

    let mut conn = state.db()?;
    find_job(&mut conn, document_id)?
        .as_ref()
        .and_then(job_document)
        .ok_or_else(|| AppError::not_found_named("document"))
}

/// Removes the document from the external store, its job record and its
/// stored file, then decrements the collection's document count.
pub async fn delete_document(state: &AppState, document_id: &str) -> AppResult<()> {
    let external = match state.orchestrator() {
        Some(orchestrator) => orchestrator.get_document(document_id).await?,
        None => None,
    };
    let job = {
        let mut conn = state.db()?;
        find_job(&mut conn, document_id)?
    };

    let collection_id = external
        .as_ref()
        .and_then(|doc| doc.collection_id().map(str::to_string))
        .or_else(|| {
            job.as_ref()
                .and_then(|job| IngestPayload::from_job(job).ok())
                .map(|payload| payload.collection_id)
        })
        .ok_or_else(|| AppError::not_found_named("document"))?;

    if external.is_some() {
        if let Some(orchestrator) = state.orchestrator() {
            match orchestrator.delete_document(document_id).await {
                Ok(()) | Err(OrchestratorError::NotFound(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
    }

    {
        let mut conn = state.db()?;
        delete_job(&mut conn, document_id)?;
    }

    if let Err(err) = state
        .storage
        .remove_document(&collection_id, document_id, SUPPORTED_EXTENSIONS)
        .await
    {
        warn!(error = %err, document_id = %document_id, "failed to remove stored document file");
    }

    let mut conn = state.db()?;
    store::adjust_document_count(&mut conn, &collection_id, -1)?;

    info!(document_id = %document_id, collection_id = %collection_id, "deleted document");
    Ok(())
}
