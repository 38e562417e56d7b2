use axum::extract::{Json, Multipart, Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::ingest::{self, DocumentPage, UploadedFile};
use crate::models::Document;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListDocumentsQuery {
    pub page: Option<String>,
    pub page_size: Option<String>,
}

fn parse_number(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|value| value.trim().parse().ok())
}

pub async fn upload_document(
    State(state): State<AppState>,
    Path(collection_id): Path<String>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<Document>)> {
    let mut file: Option<UploadedFile> = None;
    let mut metadata = Map::new();

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        warn!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                let Some(filename) = field.file_name().map(|n| n.to_string()) else {
                    continue;
                };
                let bytes = field.bytes().await.map_err(|err| {
                    warn!(error = %err, "failed to read file bytes");
                    AppError::bad_request(format!("failed to read file bytes: {err}"))
                })?;
                file = Some(UploadedFile { filename, bytes });
            }
            Some("metadata") => {
                let value = field.text().await.map_err(|err| {
                    warn!(error = %err, "invalid metadata payload");
                    AppError::bad_request("invalid metadata JSON")
                })?;
                if value.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(&value) {
                    Ok(Value::Object(map)) => metadata = map,
                    _ => return Err(AppError::bad_request("invalid metadata JSON")),
                }
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| AppError::bad_request("file is required"))?;
    let document = ingest::upload_document(&state, &collection_id, file, metadata).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

pub async fn list_documents(
    State(state): State<AppState>,
    Path(collection_id): Path<String>,
    Query(query): Query<ListDocumentsQuery>,
) -> AppResult<Json<DocumentPage>> {
    let (page, page_size) = ingest::normalize_paging(
        parse_number(query.page.as_deref()),
        parse_number(query.page_size.as_deref()),
    );
    let page = ingest::list_documents(&state, &collection_id, page, page_size).await?;
    Ok(Json(page))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> AppResult<Json<Document>> {
    Ok(Json(ingest::get_document(&state, &document_id).await?))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> AppResult<Json<Value>> {
    ingest::delete_document(&state, &document_id).await?;
    Ok(Json(json!({ "message": "document deleted" })))
}
