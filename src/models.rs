use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::*;

pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";

pub const META_COLLECTION_ID: &str = "collection_id";
pub const META_FILENAME: &str = "filename";
pub const META_FILE_TYPE: &str = "file_type";
pub const META_FILE_SIZE: &str = "file_size";
pub const META_STATUS: &str = "status";
pub const META_CHUNK_COUNT: &str = "chunk_count";
pub const META_ERROR: &str = "error";
pub const META_CHECKSUM: &str = "checksum";

pub const DEFAULT_RATE_LIMIT: i32 = 100;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = collections)]
pub struct Collection {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub metadata: String,
    pub document_count: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Collection {
    pub fn metadata_map(&self) -> Map<String, Value> {
        serde_json::from_str(&self.metadata).unwrap_or_default()
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = collections)]
pub struct NewCollection {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub metadata: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = sites)]
pub struct Site {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub collection_ids: String,
    pub widget_config: String,
    pub rate_limit: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Site {
    pub fn collection_ids(&self) -> Vec<String> {
        serde_json::from_str(&self.collection_ids).unwrap_or_default()
    }

    pub fn widget_config(&self) -> WidgetConfig {
        serde_json::from_str(&self.widget_config).unwrap_or_default()
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = sites)]
pub struct NewSite {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub collection_ids: String,
    pub widget_config: String,
    pub rate_limit: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Display settings handed to the embeddable widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetConfig {
    pub theme: String,
    pub primary_color: String,
    pub position: String,
    pub welcome_message: String,
    pub placeholder: String,
    pub show_sources: bool,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            theme: "light".to_string(),
            primary_color: "#3b82f6".to_string(),
            position: "bottom-right".to_string(),
            welcome_message: "Hi! How can I help you?".to_string(),
            placeholder: "Ask a question...".to_string(),
            show_sources: true,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = sessions)]
pub struct Session {
    pub id: String,
    pub site_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession {
    pub id: String,
    pub site_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = messages)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub sources: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Message {
    pub fn sources(&self) -> Vec<Source> {
        self.sources
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub id: String,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub sources: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: String,
    pub job_type: String,
    pub payload: String,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: String,
    pub job_type: String,
    pub payload: String,
    pub status: String,
    pub run_after: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A citation returned alongside a generated answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(default)]
    pub document_id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(DocumentStatus::Pending),
            "processing" => Some(DocumentStatus::Processing),
            "ready" => Some(DocumentStatus::Ready),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

/// API view of a document. The row itself lives in the orchestrator's store;
/// this is assembled from the metadata tagged onto it, or from the ingestion
/// job while the orchestrator has not stored it yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub collection_id: String,
    pub filename: String,
    pub file_type: String,
    pub file_size: i64,
    pub status: DocumentStatus,
    pub chunk_count: i64,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Document {
    /// Reads the tagged metadata fields. A document without a status tag was
    /// stored outside the ingestion workflow and counts as ready.
    pub fn from_metadata(
        id: impl Into<String>,
        metadata: Map<String, Value>,
        created_at: Option<String>,
    ) -> Self {
        let text = |key: &str| {
            metadata
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let number = |key: &str| {
            metadata
                .get(key)
                .and_then(|value| value.as_i64().or_else(|| value.as_f64().map(|f| f as i64)))
                .unwrap_or(0)
        };

        let status = metadata
            .get(META_STATUS)
            .and_then(Value::as_str)
            .and_then(DocumentStatus::parse)
            .unwrap_or(DocumentStatus::Ready);
        let error = metadata
            .get(META_ERROR)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        Self {
            id: id.into(),
            collection_id: text(META_COLLECTION_ID),
            filename: text(META_FILENAME),
            file_type: text(META_FILE_TYPE),
            file_size: number(META_FILE_SIZE),
            status,
            chunk_count: number(META_CHUNK_COUNT),
            error,
            created_at,
            metadata,
        }
    }
}
