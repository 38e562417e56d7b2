use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Collection, NewCollection};
use crate::schema::collections;
use crate::state::AppState;
use crate::utils::json::classify_nullable;

#[derive(Deserialize)]
pub struct CreateCollectionRequest {
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = collections)]
struct UpdateCollectionChangeset<'a> {
    name: Option<&'a str>,
    description: Option<Option<&'a str>>,
    metadata: Option<String>,
    updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CollectionResponse {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub metadata: Map<String, Value>,
    pub document_count: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<Collection> for CollectionResponse {
    fn from(collection: Collection) -> Self {
        Self {
            metadata: collection.metadata_map(),
            id: collection.id,
            name: collection.name,
            description: collection.description,
            document_count: collection.document_count,
            created_at: collection.created_at,
            updated_at: collection.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct CollectionListResponse {
    pub collections: Vec<CollectionResponse>,
}

pub async fn list_collections(
    State(state): State<AppState>,
) -> AppResult<Json<CollectionListResponse>> {
    let mut conn = state.db()?;
    let rows: Vec<Collection> = collections::table
        .order(collections::created_at.desc())
        .load(&mut conn)?;

    Ok(Json(CollectionListResponse {
        collections: rows.into_iter().map(CollectionResponse::from).collect(),
    }))
}

pub async fn create_collection(
    State(state): State<AppState>,
    payload: Result<Json<CreateCollectionRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<CollectionResponse>)> {
    let Json(payload) = payload?;
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name is required"));
    }

    let now = Utc::now().naive_utc();
    let new_collection = NewCollection {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        description: payload.description,
        metadata: serde_json::to_string(&payload.metadata.unwrap_or_default())?,
        created_at: now,
        updated_at: now,
    };

    let mut conn = state.db()?;
    diesel::insert_into(collections::table)
        .values(&new_collection)
        .execute(&mut conn)?;

    let collection: Collection = collections::table
        .find(&new_collection.id)
        .first(&mut conn)?;
    tracing::info!(collection_id = %collection.id, name = %collection.name, "created collection");
    Ok((StatusCode::CREATED, Json(collection.into())))
}

pub async fn get_collection(
    State(state): State<AppState>,
    Path(collection_id): Path<String>,
) -> AppResult<Json<CollectionResponse>> {
    let mut conn = state.db()?;
    let collection = crate::store::find_collection(&mut conn, &collection_id)?
        .ok_or_else(|| AppError::not_found_named("collection"))?;
    Ok(Json(collection.into()))
}

pub async fn update_collection(
    State(state): State<AppState>,
    Path(collection_id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> AppResult<Json<CollectionResponse>> {
    let Json(body) = body?;
    let mut conn = state.db()?;
    let existing = crate::store::find_collection(&mut conn, &collection_id)?
        .ok_or_else(|| AppError::not_found_named("collection"))?;

    let name = match body.get("name") {
        None | Some(Value::Null) => None,
        Some(Value::String(value)) if !value.trim().is_empty() => Some(value.trim().to_string()),
        Some(Value::String(_)) => return Err(AppError::bad_request("name must not be empty")),
        Some(_) => return Err(AppError::bad_request("name must be a string")),
    };

    let description = classify_nullable(body.get("description"))
        .map_err(AppError::bad_request)?
        .into_update();

    let metadata = match body.get("metadata") {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(serde_json::to_string(map)?),
        Some(_) => return Err(AppError::bad_request("metadata must be an object")),
    };

    if name.is_none() && description.is_none() && metadata.is_none() {
        return Ok(Json(existing.into()));
    }

    let changeset = UpdateCollectionChangeset {
        name: name.as_deref(),
        description: description.as_ref().map(|value| value.as_deref()),
        metadata,
        updated_at: Some(Utc::now().naive_utc()),
    };

    diesel::update(collections::table.find(&collection_id))
        .set(&changeset)
        .execute(&mut conn)?;

    let updated: Collection = collections::table.find(&collection_id).first(&mut conn)?;
    Ok(Json(updated.into()))
}

/// Removes the metadata row only. Documents already ingested into the
/// external store stay there.
pub async fn delete_collection(
    State(state): State<AppState>,
    Path(collection_id): Path<String>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let removed = diesel::delete(collections::table.find(&collection_id)).execute(&mut conn)?;
    if removed == 0 {
        return Err(AppError::not_found_named("collection"));
    }
    tracing::info!(collection_id = %collection_id, "deleted collection");
    Ok(Json(json!({ "message": "collection deleted" })))
}
