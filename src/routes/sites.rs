use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{NewSite, Site, WidgetConfig, DEFAULT_RATE_LIMIT};
use crate::schema::sites;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateSiteRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub collection_ids: Vec<String>,
    pub widget_config: Option<WidgetConfig>,
    pub rate_limit: Option<i32>,
}

#[derive(Deserialize)]
pub struct UpdateSiteRequest {
    pub name: Option<String>,
    pub domain: Option<String>,
    pub collection_ids: Option<Vec<String>>,
    pub widget_config: Option<WidgetConfig>,
    pub rate_limit: Option<i32>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = sites)]
struct UpdateSiteChangeset {
    name: Option<String>,
    domain: Option<String>,
    collection_ids: Option<String>,
    widget_config: Option<String>,
    rate_limit: Option<i32>,
    updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SiteResponse {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub collection_ids: Vec<String>,
    pub widget_config: WidgetConfig,
    pub rate_limit: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<Site> for SiteResponse {
    fn from(site: Site) -> Self {
        Self {
            collection_ids: site.collection_ids(),
            widget_config: site.widget_config(),
            id: site.id,
            name: site.name,
            domain: site.domain,
            rate_limit: site.rate_limit,
            created_at: site.created_at,
            updated_at: site.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct SiteListResponse {
    pub sites: Vec<SiteResponse>,
}

pub async fn list_sites(State(state): State<AppState>) -> AppResult<Json<SiteListResponse>> {
    let mut conn = state.db()?;
    let rows: Vec<Site> = sites::table
        .order(sites::created_at.desc())
        .load(&mut conn)?;
    Ok(Json(SiteListResponse {
        sites: rows.into_iter().map(SiteResponse::from).collect(),
    }))
}

pub async fn create_site(
    State(state): State<AppState>,
    payload: Result<Json<CreateSiteRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<SiteResponse>)> {
    let Json(payload) = payload?;
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name is required"));
    }

    let now = Utc::now().naive_utc();
    let new_site = NewSite {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        domain: payload.domain.trim().to_string(),
        collection_ids: serde_json::to_string(&payload.collection_ids)?,
        widget_config: serde_json::to_string(&payload.widget_config.unwrap_or_default())?,
        rate_limit: payload
            .rate_limit
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_RATE_LIMIT),
        created_at: now,
        updated_at: now,
    };

    let mut conn = state.db()?;
    diesel::insert_into(sites::table)
        .values(&new_site)
        .execute(&mut conn)?;

    let site: Site = sites::table.find(&new_site.id).first(&mut conn)?;
    tracing::info!(site_id = %site.id, domain = %site.domain, "created site");
    Ok((StatusCode::CREATED, Json(site.into())))
}

pub async fn get_site(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
) -> AppResult<Json<SiteResponse>> {
    let mut conn = state.db()?;
    let site = crate::store::find_site(&mut conn, &site_id)?
        .ok_or_else(|| AppError::not_found_named("site"))?;
    Ok(Json(site.into()))
}

pub async fn update_site(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
    payload: Result<Json<UpdateSiteRequest>, JsonRejection>,
) -> AppResult<Json<SiteResponse>> {
    let Json(payload) = payload?;
    let mut conn = state.db()?;
    if crate::store::find_site(&mut conn, &site_id)?.is_none() {
        return Err(AppError::not_found_named("site"));
    }

    let changeset = UpdateSiteChangeset {
        name: payload
            .name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty()),
        domain: payload
            .domain
            .map(|domain| domain.trim().to_string())
            .filter(|domain| !domain.is_empty()),
        collection_ids: payload
            .collection_ids
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?,
        widget_config: payload
            .widget_config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?,
        rate_limit: payload.rate_limit.filter(|limit| *limit > 0),
        updated_at: Some(Utc::now().naive_utc()),
    };

    diesel::update(sites::table.find(&site_id))
        .set(&changeset)
        .execute(&mut conn)?;

    let updated: Site = sites::table.find(&site_id).first(&mut conn)?;
    Ok(Json(updated.into()))
}

/// Sessions of the site survive with their site reference cleared.
pub async fn delete_site(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let removed = diesel::delete(sites::table.find(&site_id)).execute(&mut conn)?;
    if removed == 0 {
        return Err(AppError::not_found_named("site"));
    }
    tracing::info!(site_id = %site_id, "deleted site");
    Ok(Json(json!({ "message": "site deleted" })))
}
