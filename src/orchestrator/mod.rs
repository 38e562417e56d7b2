//! Seam to the external retrieval/generation service.
//!
//! Embedding, chunking, vector search and generation all happen on the other
//! side of [`Orchestrator`]. The rest of the crate only ever talks to this
//! trait, and runs in placeholder mode when no implementation is configured.

use std::path::PathBuf;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{Document, Source, META_COLLECTION_ID};

pub mod http;
pub mod sse;

pub use http::HttpOrchestrator;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("orchestrator request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("orchestrator returned {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("failed to read document file: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected orchestrator response: {0}")]
    Decode(String),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Stream of chat chunks produced by one streaming turn.
pub type ChunkStream = BoxStream<'static, StreamChunk>;

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub path: PathBuf,
    pub document_id: String,
    pub filename: String,
    pub chunk_size: u32,
    pub overlap: u32,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestOutcome {
    pub document_id: String,
    #[serde(default)]
    pub chunk_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub message: String,
    pub collection_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatAnswer {
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<Source>,
}

/// A document as the external store reports it: an id plus whatever metadata
/// was tagged onto it at ingestion time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalDocument {
    pub id: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl ExternalDocument {
    pub fn collection_id(&self) -> Option<&str> {
        self.metadata.get(META_COLLECTION_ID).and_then(Value::as_str)
    }

    pub fn into_document(self) -> Document {
        Document::from_metadata(self.id, self.metadata, self.created_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Thinking,
    Content,
    Sources,
    Error,
    Done,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Thinking => "thinking",
            ChunkKind::Content => "content",
            ChunkKind::Sources => "sources",
            ChunkKind::Error => "error",
            ChunkKind::Done => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChunkKind::Error | ChunkKind::Done)
    }
}

/// One unit of a streamed chat response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl StreamChunk {
    fn with_content(kind: ChunkKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: Some(content.into()),
            sources: None,
            session_id: None,
        }
    }

    pub fn thinking(content: impl Into<String>) -> Self {
        Self::with_content(ChunkKind::Thinking, content)
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self::with_content(ChunkKind::Content, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::with_content(ChunkKind::Error, content)
    }

    pub fn sources(sources: Vec<Source>) -> Self {
        Self {
            kind: ChunkKind::Sources,
            content: None,
            sources: Some(sources),
            session_id: None,
        }
    }

    pub fn done() -> Self {
        Self {
            kind: ChunkKind::Done,
            content: None,
            sources: None,
            session_id: None,
        }
    }
}

#[async_trait]
pub trait Orchestrator: Send + Sync + 'static {
    async fn ingest_file(&self, request: IngestRequest) -> OrchestratorResult<IngestOutcome>;

    async fn chat(&self, turn: ChatTurn) -> OrchestratorResult<ChatAnswer>;

    async fn chat_stream(&self, turn: ChatTurn) -> OrchestratorResult<ChunkStream>;

    async fn search(&self, query: &str, top_k: usize) -> OrchestratorResult<Vec<Source>>;

    async fn list_documents(&self) -> OrchestratorResult<Vec<ExternalDocument>>;

    async fn get_document(&self, id: &str) -> OrchestratorResult<Option<ExternalDocument>>;

    async fn delete_document(&self, id: &str) -> OrchestratorResult<()>;

    /// Merges `metadata` into the document's existing metadata.
    async fn update_document_metadata(
        &self,
        id: &str,
        metadata: Map<String, Value>,
    ) -> OrchestratorResult<()>;

    async fn list_documents_by_collection(
        &self,
        collection_id: &str,
    ) -> OrchestratorResult<Vec<ExternalDocument>> {
        let documents = self.list_documents().await?;
        Ok(documents
            .into_iter()
            .filter(|doc| doc.collection_id() == Some(collection_id))
            .collect())
    }
}
