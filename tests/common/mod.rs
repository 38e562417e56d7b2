use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use askdoc::config::{AppConfig, LlmConfig, RagConfig, RateLimitConfig};
use askdoc::db;
use askdoc::models::{Collection, Job, Message, Source};
use askdoc::orchestrator::{
    ChatAnswer, ChatTurn, ChunkStream, ExternalDocument, IngestOutcome, IngestRequest,
    Orchestrator, OrchestratorError, OrchestratorResult, StreamChunk,
};
use askdoc::routes;
use askdoc::schema::{collections, jobs, messages, sessions};
use askdoc::state::AppState;
use askdoc::storage::LocalStorage;
use askdoc::{default_handlers, Worker};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use chrono::Utc;
use diesel::prelude::*;
use diesel::SqliteConnection;
use futures_util::stream::{self, StreamExt};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tempfile::TempDir;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

#[allow(dead_code)]
pub const FAKE_CHUNK_COUNT: i64 = 3;

/// In-memory stand-in for the orchestration service.
pub struct FakeOrchestrator {
    documents: Mutex<HashMap<String, ExternalDocument>>,
    ingest_failure: Mutex<Option<String>>,
    chat_failure: Mutex<Option<String>>,
    stream_script: Mutex<Vec<StreamChunk>>,
    stall_after_script: Mutex<bool>,
    list_failure: Mutex<Option<String>>,
    turns: Mutex<Vec<ChatTurn>>,
}

impl Default for FakeOrchestrator {
    fn default() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            ingest_failure: Mutex::new(None),
            chat_failure: Mutex::new(None),
            stream_script: Mutex::new(vec![
                StreamChunk::thinking("Searching documents"),
                StreamChunk::content("Hello"),
                StreamChunk::content(" world"),
                StreamChunk::sources(vec![sample_source()]),
                StreamChunk::done(),
            ]),
            stall_after_script: Mutex::new(false),
            list_failure: Mutex::new(None),
            turns: Mutex::new(Vec::new()),
        }
    }
}

#[allow(dead_code)]
pub fn sample_source() -> Source {
    Source {
        document_id: "doc-1".to_string(),
        filename: "notes.txt".to_string(),
        content: "askdoc answers questions".to_string(),
        score: 0.92,
    }
}

#[allow(dead_code)]
impl FakeOrchestrator {
    pub async fn fail_ingest(&self, message: &str) {
        *self.ingest_failure.lock().await = Some(message.to_string());
    }

    pub async fn fail_chat(&self, message: &str) {
        *self.chat_failure.lock().await = Some(message.to_string());
    }

    pub async fn script_stream(&self, chunks: Vec<StreamChunk>) {
        *self.stream_script.lock().await = chunks;
    }

    /// Keeps the chat stream open and silent once the script is exhausted.
    pub async fn stall_after_script(&self) {
        *self.stall_after_script.lock().await = true;
    }

    pub async fn fail_list(&self, message: &str) {
        *self.list_failure.lock().await = Some(message.to_string());
    }

    pub async fn document(&self, id: &str) -> Option<ExternalDocument> {
        self.documents.lock().await.get(id).cloned()
    }

    pub async fn document_count(&self) -> usize {
        self.documents.lock().await.len()
    }

    pub async fn turns(&self) -> Vec<ChatTurn> {
        self.turns.lock().await.clone()
    }

    pub async fn insert_document(&self, id: &str, metadata: Map<String, Value>) {
        let document = ExternalDocument {
            id: id.to_string(),
            metadata,
            created_at: Some(Utc::now().to_rfc3339()),
        };
        self.documents.lock().await.insert(id.to_string(), document);
    }
}

fn upstream(message: &str) -> OrchestratorError {
    OrchestratorError::Upstream {
        status: 500,
        message: message.to_string(),
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn ingest_file(&self, request: IngestRequest) -> OrchestratorResult<IngestOutcome> {
        if let Some(message) = self.ingest_failure.lock().await.clone() {
            return Err(upstream(&message));
        }
        // The stored upload must exist when the worker hands it over.
        tokio::fs::metadata(&request.path).await?;
        let metadata = request.metadata;
        self.insert_document(&request.document_id, metadata).await;
        Ok(IngestOutcome {
            document_id: request.document_id,
            chunk_count: FAKE_CHUNK_COUNT,
        })
    }

    async fn chat(&self, turn: ChatTurn) -> OrchestratorResult<ChatAnswer> {
        self.turns.lock().await.push(turn.clone());
        if let Some(message) = self.chat_failure.lock().await.clone() {
            return Err(upstream(&message));
        }
        Ok(ChatAnswer {
            answer: format!("Answer to: {}", turn.message),
            sources: vec![sample_source()],
        })
    }

    async fn chat_stream(&self, turn: ChatTurn) -> OrchestratorResult<ChunkStream> {
        self.turns.lock().await.push(turn);
        if let Some(message) = self.chat_failure.lock().await.clone() {
            return Err(upstream(&message));
        }
        let script = stream::iter(self.stream_script.lock().await.clone());
        if *self.stall_after_script.lock().await {
            return Ok(script.chain(stream::pending()).boxed());
        }
        Ok(script.boxed())
    }

    async fn search(&self, query: &str, top_k: usize) -> OrchestratorResult<Vec<Source>> {
        let documents = self.documents.lock().await;
        Ok(documents
            .values()
            .take(top_k)
            .map(|doc| Source {
                document_id: doc.id.clone(),
                filename: doc
                    .metadata
                    .get("filename")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                content: format!("match for {query}"),
                score: 0.5,
            })
            .collect())
    }

    async fn list_documents(&self) -> OrchestratorResult<Vec<ExternalDocument>> {
        if let Some(message) = self.list_failure.lock().await.clone() {
            return Err(upstream(&message));
        }
        Ok(self.documents.lock().await.values().cloned().collect())
    }

    async fn get_document(&self, id: &str) -> OrchestratorResult<Option<ExternalDocument>> {
        Ok(self.documents.lock().await.get(id).cloned())
    }

    async fn delete_document(&self, id: &str) -> OrchestratorResult<()> {
        self.documents
            .lock()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }

    async fn update_document_metadata(
        &self,
        id: &str,
        metadata: Map<String, Value>,
    ) -> OrchestratorResult<()> {
        let mut documents = self.documents.lock().await;
        let document = documents
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        document.metadata.extend(metadata);
        Ok(())
    }
}

pub struct TestOptions {
    pub orchestrator: bool,
    pub api_key: Option<String>,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            orchestrator: true,
            api_key: None,
            cors_allowed_origins: vec!["*".to_string()],
        }
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    orchestrator: Option<Arc<FakeOrchestrator>>,
    dir: TempDir,
}

#[allow(dead_code)]
impl TestApp {
    pub async fn new() -> Result<Self> {
        Self::with_options(TestOptions::default()).await
    }

    pub async fn without_orchestrator() -> Result<Self> {
        Self::with_options(TestOptions {
            orchestrator: false,
            ..TestOptions::default()
        })
        .await
    }

    pub async fn with_options(options: TestOptions) -> Result<Self> {
        let dir = tempfile::tempdir().context("failed to create temp dir")?;
        let database_path = dir.path().join("askdoc.db");
        let documents_dir = dir.path().join("documents");

        let config = AppConfig {
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            server_base_url: "http://askdoc.test".to_string(),
            admin_api_key: options.api_key,
            database_path: database_path.to_string_lossy().into_owned(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            documents_dir: documents_dir.clone(),
            static_dir: dir.path().join("static"),
            cors_allowed_origins: options.cors_allowed_origins,
            orchestrator_url: None,
            rag: RagConfig {
                db_path: dir.path().join("rag.db").to_string_lossy().into_owned(),
                index_type: "hnsw".to_string(),
                chunk_size: 1000,
                chunk_overlap: 200,
            },
            llm: LlmConfig {
                provider: "ollama".to_string(),
                base_url: "http://localhost:11434/v1".to_string(),
                api_key: String::new(),
                embedding_model: "nomic-embed-text".to_string(),
                llm_model: "qwen2.5:7b".to_string(),
            },
            rate_limit: RateLimitConfig {
                enabled: false,
                requests_per_hour: 100,
            },
            embedded_worker: false,
            worker_poll_interval: Duration::from_millis(10),
        };

        let pool = db::init_pool_with_size(&config.database_path, config.database_max_pool_size)?;
        db::run_migrations(&pool)?;

        let fake = options
            .orchestrator
            .then(|| Arc::new(FakeOrchestrator::default()));
        let orchestrator = fake
            .clone()
            .map(|fake| fake as Arc<dyn Orchestrator>);
        let storage = Arc::new(LocalStorage::new(documents_dir));
        let state = AppState::new(pool, config, storage, orchestrator);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            orchestrator: fake,
            dir,
        })
    }

    pub fn orchestrator(&self) -> Arc<FakeOrchestrator> {
        self.orchestrator
            .clone()
            .expect("test app was built without an orchestrator")
    }

    pub fn documents_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("documents")
    }

    /// Drains the ingestion queue the way the embedded worker would.
    pub async fn run_worker(&self) -> Result<usize> {
        let worker = Worker::new(
            Arc::new(self.state.clone()),
            default_handlers(),
            Duration::from_millis(10),
        );
        worker
            .run_until_idle()
            .await
            .map_err(|err| anyhow!("worker failed: {err}"))
    }

    pub async fn create_collection(&self, name: &str, key: Option<&str>) -> Result<String> {
        let response = self
            .post_json(
                "/api/admin/collections",
                &serde_json::json!({ "name": name }),
                key,
            )
            .await?;
        ensure!(
            response.status() == axum::http::StatusCode::CREATED,
            "collection create failed with status {}",
            response.status()
        );
        let body: Value = read_json(response).await?;
        body["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("collection id missing"))
    }

    pub async fn create_site(&self, name: &str, collection_ids: &[&str]) -> Result<String> {
        let response = self
            .post_json(
                "/api/admin/sites",
                &serde_json::json!({
                    "name": name,
                    "domain": "docs.example",
                    "collection_ids": collection_ids,
                }),
                None,
            )
            .await?;
        ensure!(
            response.status() == axum::http::StatusCode::CREATED,
            "site create failed with status {}",
            response.status()
        );
        let body: Value = read_json(response).await?;
        body["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("site id missing"))
    }

    pub async fn collection(&self, id: &str) -> Result<Collection> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            collections::table
                .find(&id)
                .first(conn)
                .context("failed to load collection")
        })
        .await
    }

    pub async fn jobs(&self) -> Result<Vec<Job>> {
        self.with_conn(|conn| jobs::table.load(conn).context("failed to load jobs"))
            .await
    }

    pub async fn session_count(&self) -> Result<i64> {
        self.with_conn(|conn| {
            sessions::table
                .count()
                .get_result(conn)
                .context("failed to count sessions")
        })
        .await
    }

    pub async fn messages_for(&self, session_id: &str) -> Result<Vec<Message>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            askdoc::store::session_messages(conn, &session_id).context("failed to load messages")
        })
        .await
    }

    pub async fn all_messages(&self) -> Result<Vec<Message>> {
        self.with_conn(|conn| messages::table.load(conn).context("failed to load messages"))
            .await
    }

    pub async fn send(&self, request: Request<Body>) -> Result<hyper::Response<Body>> {
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        key: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.json_request(Method::POST, path, payload, key).await
    }

    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        key: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.json_request(Method::PUT, path, payload, key).await
    }

    async fn json_request<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        key: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(key) = key {
            builder = builder.header("x-api-key", key);
        }
        self.send(builder.body(Body::from(body))?).await
    }

    pub async fn get(&self, path: &str, key: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(key) = key {
            builder = builder.header("x-api-key", key);
        }
        self.send(builder.body(Body::empty())?).await
    }

    pub async fn delete(&self, path: &str, key: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::DELETE).uri(path);
        if let Some(key) = key {
            builder = builder.header("x-api-key", key);
        }
        self.send(builder.body(Body::empty())?).await
    }

    pub async fn upload_document(
        &self,
        collection_id: &str,
        filename: &str,
        data: &[u8],
        metadata: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend(data);
        body.extend(b"\r\n");

        if let Some(metadata) = metadata {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(b"Content-Disposition: form-data; name=\"metadata\"\r\n\r\n");
            body.extend(metadata.as_bytes());
            body.extend(b"\r\n");
        }

        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/api/admin/collections/{collection_id}/documents"))
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))?;
        self.send(request).await
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn read_json<T: DeserializeOwned>(response: hyper::Response<Body>) -> Result<T> {
    let body = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&body).with_context(|| {
        format!(
            "failed to decode body: {}",
            String::from_utf8_lossy(&body)
        )
    })
}

/// Splits an SSE body into `(event, data)` pairs.
#[allow(dead_code)]
pub fn parse_sse(body: &str) -> Vec<(String, Value)> {
    let mut frames = Vec::new();
    for block in body.split("\n\n") {
        let mut event = String::new();
        let mut data = String::new();
        for line in block.lines() {
            if let Some(value) = line.strip_prefix("event:") {
                event = value.trim().to_string();
            } else if let Some(value) = line.strip_prefix("data:") {
                data.push_str(value.strip_prefix(' ').unwrap_or(value));
            }
        }
        if data.is_empty() {
            continue;
        }
        if let Ok(value) = serde_json::from_str(&data) {
            frames.push((event, value));
        }
    }
    frames
}
