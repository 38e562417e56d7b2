use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AppResult;
use crate::state::AppState;
use crate::store;

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub total_documents: i64,
    pub total_collections: i64,
    pub total_sites: i64,
    pub total_chats: i64,
}

/// A count that cannot be read is reported as zero.
fn or_zero<E: std::fmt::Display>(what: &str, result: Result<i64, E>) -> i64 {
    result.unwrap_or_else(|err| {
        warn!(count = what, error = %err, "failed to compute stat");
        0
    })
}

pub async fn get_stats(State(state): State<AppState>) -> AppResult<Json<StatsResponse>> {
    let total_documents = match state.orchestrator() {
        Some(orchestrator) => or_zero(
            "documents",
            orchestrator
                .list_documents()
                .await
                .map(|documents| documents.len() as i64),
        ),
        None => 0,
    };

    let mut conn = state.db()?;
    Ok(Json(StatsResponse {
        total_documents,
        total_collections: or_zero("collections", store::count_collections(&mut conn)),
        total_sites: or_zero("sites", store::count_sites(&mut conn)),
        total_chats: or_zero("chats", store::count_user_messages(&mut conn)),
    }))
}
