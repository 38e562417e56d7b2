use axum::{
    extract::{Path, State},
    Json,
};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::{Message, Session, Source};
use crate::schema::sessions;
use crate::state::AppState;
use crate::store;

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: String,
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
    pub created_at: NaiveDateTime,
}

impl From<Message> for MessageResponse {
    fn from(message: Message) -> Self {
        Self {
            sources: message.sources(),
            id: message.id,
            role: message.role,
            content: message.content,
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptResponse {
    pub session_id: String,
    pub site_id: Option<String>,
    pub messages: Vec<MessageResponse>,
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<Json<TranscriptResponse>> {
    let mut conn = state.db()?;
    let session: Session = sessions::table
        .find(&session_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_named("session"))?;

    let messages = store::session_messages(&mut conn, &session.id)?;
    Ok(Json(TranscriptResponse {
        session_id: session.id,
        site_id: session.site_id,
        messages: messages.into_iter().map(MessageResponse::from).collect(),
    }))
}
