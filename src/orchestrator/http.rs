use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::{multipart, Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::{
    sse::SseDecoder, ChatAnswer, ChatTurn, ChunkStream, ExternalDocument, IngestOutcome,
    IngestRequest, Orchestrator, OrchestratorError, OrchestratorResult, StreamChunk,
};
use crate::config::{LlmConfig, RagConfig};
use crate::models::Source;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest silence tolerated between reads, streamed chat included.
const READ_TIMEOUT: Duration = Duration::from_secs(120);

/// [`Orchestrator`] backed by an orchestration service speaking JSON over HTTP.
#[derive(Clone)]
pub struct HttpOrchestrator {
    client: Client,
    base_url: String,
}

impl HttpOrchestrator {
    pub fn new(base_url: &str) -> OrchestratorResult<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Hands the store, chunker and model settings to the service. A failure
    /// here means the service is unusable and the caller should fall back to
    /// placeholder mode.
    pub async fn connect(
        base_url: &str,
        rag: &RagConfig,
        llm: &LlmConfig,
    ) -> OrchestratorResult<Self> {
        let orchestrator = Self::new(base_url)?;
        let response = orchestrator
            .client
            .post(orchestrator.endpoint("init"))
            .json(&json!({ "rag": rag, "llm": llm }))
            .send()
            .await?;
        check(response).await?;
        Ok(orchestrator)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }
}

async fn check(response: Response) -> OrchestratorResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(OrchestratorError::Upstream {
        status: status.as_u16(),
        message: message.trim().to_string(),
    })
}

#[derive(Deserialize)]
struct DocumentList {
    #[serde(default)]
    documents: Vec<ExternalDocument>,
}

#[derive(Deserialize)]
struct SearchResults {
    #[serde(default)]
    sources: Vec<Source>,
}

/// Event shape emitted by the service's streaming chat endpoint.
#[derive(Debug, Deserialize)]
struct UpstreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    sources: Option<Vec<Source>>,
}

fn map_event(event: UpstreamEvent) -> Option<StreamChunk> {
    let content = event.content.unwrap_or_default();
    let tool = event.tool_name.unwrap_or_default();
    match event.kind.as_str() {
        "thinking" => Some(StreamChunk::thinking(content)),
        "text" | "content" => Some(StreamChunk::content(content)),
        "tool_call" => Some(StreamChunk::thinking(format!("Using tool: {tool}"))),
        "tool_result" => Some(StreamChunk::thinking(format!("Tool {tool} completed"))),
        "sources" => Some(StreamChunk::sources(event.sources.unwrap_or_default())),
        "done" => Some(StreamChunk::done()),
        "error" => Some(StreamChunk::error(content)),
        other => {
            debug!(event_type = %other, "skipping unknown orchestrator event");
            None
        }
    }
}

fn decode_event(data: &str) -> Option<StreamChunk> {
    match serde_json::from_str::<UpstreamEvent>(data) {
        Ok(event) => map_event(event),
        Err(err) => {
            warn!(error = %err, "ignoring malformed orchestrator event");
            None
        }
    }
}

struct EventStreamState {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    decoder: SseDecoder,
    pending: VecDeque<StreamChunk>,
    finished: bool,
}

fn chunk_stream(response: Response) -> ChunkStream {
    let state = EventStreamState {
        body: response.bytes_stream().boxed(),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(chunk) = state.pending.pop_front() {
                return Some((chunk, state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    for data in state.decoder.push(&bytes) {
                        if let Some(chunk) = decode_event(&data) {
                            state.pending.push_back(chunk);
                        }
                    }
                }
                Some(Err(err)) => {
                    state.finished = true;
                    state
                        .pending
                        .push_back(StreamChunk::error(format!("stream interrupted: {err}")));
                }
                None => {
                    state.finished = true;
                    if let Some(chunk) = state.decoder.finish().as_deref().and_then(decode_event) {
                        state.pending.push_back(chunk);
                    }
                }
            }
        }
    })
    .boxed()
}

#[async_trait]
impl Orchestrator for HttpOrchestrator {
    async fn ingest_file(&self, request: IngestRequest) -> OrchestratorResult<IngestOutcome> {
        let bytes = tokio::fs::read(&request.path).await?;
        let mime = mime_guess::from_path(&request.path).first_or_octet_stream();
        let part = multipart::Part::bytes(bytes)
            .file_name(request.filename.clone())
            .mime_str(mime.as_ref())?;
        let options = json!({
            "document_id": request.document_id,
            "chunk_size": request.chunk_size,
            "overlap": request.overlap,
            "metadata": request.metadata,
        });
        let form = multipart::Form::new()
            .part("file", part)
            .text("options", options.to_string());

        let response = self
            .client
            .post(self.endpoint("ingest"))
            .multipart(form)
            .send()
            .await?;
        let outcome = check(response).await?.json::<IngestOutcome>().await?;
        Ok(outcome)
    }

    async fn chat(&self, turn: ChatTurn) -> OrchestratorResult<ChatAnswer> {
        let response = self
            .client
            .post(self.endpoint("chat"))
            .json(&turn)
            .send()
            .await?;
        Ok(check(response).await?.json::<ChatAnswer>().await?)
    }

    async fn chat_stream(&self, turn: ChatTurn) -> OrchestratorResult<ChunkStream> {
        let response = self
            .client
            .post(self.endpoint("chat/stream"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&turn)
            .send()
            .await?;
        let response = check(response).await?;
        Ok(chunk_stream(response))
    }

    async fn search(&self, query: &str, top_k: usize) -> OrchestratorResult<Vec<Source>> {
        let response = self
            .client
            .post(self.endpoint("search"))
            .json(&json!({ "query": query, "top_k": top_k }))
            .send()
            .await?;
        let results = check(response).await?.json::<SearchResults>().await?;
        Ok(results.sources)
    }

    async fn list_documents(&self) -> OrchestratorResult<Vec<ExternalDocument>> {
        let response = self.client.get(self.endpoint("documents")).send().await?;
        let list = check(response).await?.json::<DocumentList>().await?;
        Ok(list.documents)
    }

    async fn get_document(&self, id: &str) -> OrchestratorResult<Option<ExternalDocument>> {
        let response = self
            .client
            .get(self.endpoint(&format!("documents/{id}")))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let document = check(response).await?.json::<ExternalDocument>().await?;
        Ok(Some(document))
    }

    async fn delete_document(&self, id: &str) -> OrchestratorResult<()> {
        let response = self
            .client
            .delete(self.endpoint(&format!("documents/{id}")))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(OrchestratorError::NotFound(id.to_string()));
        }
        check(response).await?;
        Ok(())
    }

    async fn update_document_metadata(
        &self,
        id: &str,
        metadata: Map<String, Value>,
    ) -> OrchestratorResult<()> {
        let response = self
            .client
            .patch(self.endpoint(&format!("documents/{id}/metadata")))
            .json(&json!({ "metadata": metadata }))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(OrchestratorError::NotFound(id.to_string()));
        }
        check(response).await?;
        Ok(())
    }
}
