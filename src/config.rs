use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

const ENV_PREFIX: &str = "ASKDOC_";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_host: String,
    pub server_port: u16,
    pub server_base_url: String,
    pub admin_api_key: Option<String>,
    pub database_path: String,
    pub database_max_pool_size: u32,
    pub documents_dir: PathBuf,
    pub static_dir: PathBuf,
    pub cors_allowed_origins: Vec<String>,
    pub orchestrator_url: Option<String>,
    pub rag: RagConfig,
    pub llm: LlmConfig,
    pub rate_limit: RateLimitConfig,
    pub embedded_worker: bool,
    pub worker_poll_interval: Duration,
}

/// Settings forwarded to the orchestrator's document store and chunker.
#[derive(Clone, Debug, serde::Serialize)]
pub struct RagConfig {
    pub db_path: String,
    pub index_type: String,
    pub chunk_size: u32,
    pub chunk_overlap: u32,
}

/// Settings forwarded to the orchestrator's model provider.
#[derive(Clone, Debug, serde::Serialize)]
pub struct LlmConfig {
    pub provider: String,
    pub base_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    pub embedding_model: String,
    pub llm_model: String,
}

/// Loaded and reported, not enforced.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_hour: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let server_host = var("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let server_port = var("SERVER_PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse()
            .context("ASKDOC_SERVER_PORT must be a valid u16")?;
        let server_base_url =
            var("SERVER_BASE_URL").unwrap_or_else(|| "http://localhost:8080".to_string());
        let admin_api_key = var("ADMIN_API_KEY").filter(|key| !key.trim().is_empty());
        let database_path =
            var("DATABASE_PATH").unwrap_or_else(|| "./data/askdoc.db".to_string());
        let database_max_pool_size = var("DATABASE_MAX_POOL_SIZE")
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let documents_dir = var("STORAGE_DOCUMENTS")
            .unwrap_or_else(|| "./data/documents".to_string())
            .into();
        let static_dir = var("STATIC_DIR")
            .unwrap_or_else(|| "./static".to_string())
            .into();
        let cors_allowed_origins =
            parse_origins(&var("CORS_ALLOWED_ORIGINS").unwrap_or_else(|| "*".to_string()));
        let orchestrator_url = var("ORCHESTRATOR_URL").filter(|url| !url.trim().is_empty());

        let rag = RagConfig {
            db_path: var("RAG_DB_PATH").unwrap_or_else(|| "./data/rag.db".to_string()),
            index_type: var("RAG_INDEX_TYPE").unwrap_or_else(|| "hnsw".to_string()),
            chunk_size: var("RAG_CHUNK_SIZE")
                .unwrap_or_else(|| "1000".to_string())
                .parse()
                .context("ASKDOC_RAG_CHUNK_SIZE must be an integer")?,
            chunk_overlap: var("RAG_CHUNK_OVERLAP")
                .unwrap_or_else(|| "200".to_string())
                .parse()
                .context("ASKDOC_RAG_CHUNK_OVERLAP must be an integer")?,
        };

        let llm = LlmConfig {
            provider: var("LLM_PROVIDER").unwrap_or_else(|| "ollama".to_string()),
            base_url: var("LLM_BASE_URL")
                .unwrap_or_else(|| "http://localhost:11434/v1".to_string()),
            api_key: var("LLM_API_KEY").unwrap_or_default(),
            embedding_model: var("LLM_EMBEDDING_MODEL")
                .unwrap_or_else(|| "nomic-embed-text".to_string()),
            llm_model: var("LLM_MODEL").unwrap_or_else(|| "qwen2.5:7b".to_string()),
        };

        let rate_limit = RateLimitConfig {
            enabled: var("RATE_LIMIT_ENABLED")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),
            requests_per_hour: var("RATE_LIMIT_REQUESTS_PER_HOUR")
                .unwrap_or_else(|| "100".to_string())
                .parse()
                .context("ASKDOC_RATE_LIMIT_REQUESTS_PER_HOUR must be an integer")?,
        };

        let embedded_worker = var("EMBEDDED_WORKER")
            .map(|v| parse_flag(&v))
            .unwrap_or(true);
        let worker_poll_interval = Duration::from_millis(
            var("WORKER_POLL_INTERVAL_MS")
                .unwrap_or_else(|| "1000".to_string())
                .parse()
                .context("ASKDOC_WORKER_POLL_INTERVAL_MS must be an integer")?,
        );

        Ok(Self {
            server_host,
            server_port,
            server_base_url,
            admin_api_key,
            database_path,
            database_max_pool_size,
            documents_dir,
            static_dir,
            cors_allowed_origins,
            orchestrator_url,
            rag,
            llm,
            rate_limit,
            embedded_worker,
            worker_poll_interval,
        })
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn redacted_orchestrator_url(&self) -> Option<String> {
        self.orchestrator_url.as_deref().map(redact_url)
    }

    pub fn redacted_llm_base_url(&self) -> String {
        redact_url(&self.llm.base_url)
    }
}

fn var(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{name}")).ok()
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("*****"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
