use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::Source;
use crate::state::AppState;

pub const DEFAULT_TOP_K: usize = 5;
pub const MAX_TOP_K: usize = 50;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub top_k: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<Source>,
}

fn clamp_top_k(raw: Option<&str>) -> usize {
    raw.and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|k| *k > 0)
        .map(|k| k.min(MAX_TOP_K))
        .unwrap_or(DEFAULT_TOP_K)
}

/// Retrieval only, no generation.
pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<SearchResponse>> {
    let text = query.q.trim();
    if text.is_empty() {
        return Err(AppError::bad_request("q is required"));
    }
    let orchestrator = state
        .orchestrator()
        .ok_or_else(|| AppError::service_unavailable("orchestrator not available"))?;

    let results = orchestrator
        .search(text, clamp_top_k(query.top_k.as_deref()))
        .await?;
    Ok(Json(SearchResponse { results }))
}
