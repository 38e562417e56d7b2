use std::convert::Infallible;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::chat::{self, ChatRequest, ChatResponse};
use crate::error::{AppError, AppResult};
use crate::models::WidgetConfig;
use crate::orchestrator::StreamChunk;
use crate::state::AppState;
use crate::store;

pub const SESSION_ID_HEADER: &str = "x-session-id";

#[derive(Debug, Serialize, Deserialize)]
pub struct WidgetConfigResponse {
    pub site_id: String,
    pub name: String,
    pub config: WidgetConfig,
    pub base_url: String,
}

/// `<scheme>://<host>` as the browser reached us, honouring
/// `X-Forwarded-Proto`. Falls back to the configured base URL without a
/// `Host` header.
fn request_base_url(headers: &HeaderMap, fallback: &str) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|host| !host.is_empty());
    let Some(host) = host else {
        return fallback.trim_end_matches('/').to_string();
    };

    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|scheme| !scheme.is_empty())
        .unwrap_or("http");
    format!("{scheme}://{host}")
}

pub async fn get_config(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<WidgetConfigResponse>> {
    let mut conn = state.db()?;
    let site = store::find_site(&mut conn, &site_id)?
        .ok_or_else(|| AppError::not_found_named("site"))?;

    Ok(Json(WidgetConfigResponse {
        config: site.widget_config(),
        site_id: site.id,
        name: site.name,
        base_url: request_base_url(&headers, &state.config.server_base_url),
    }))
}

pub async fn chat(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
    request: Result<Json<ChatRequest>, JsonRejection>,
) -> AppResult<Json<ChatResponse>> {
    let Json(request) = request?;
    Ok(Json(chat::chat(&state, &site_id, request).await?))
}

fn chunk_event(chunk: &StreamChunk) -> Event {
    let event = Event::default().event(chunk.kind.as_str());
    match serde_json::to_string(chunk) {
        Ok(data) => event.data(data),
        Err(err) => {
            warn!(error = %err, "failed to encode stream chunk");
            event.data(format!(r#"{{"type":"{}"}}"#, chunk.kind.as_str()))
        }
    }
}

pub async fn chat_stream(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
    request: Result<Json<ChatRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(request) = request?;
    let (session_id, chunks) = chat::chat_stream(&state, &site_id, request).await?;

    let events = chunks.map(|chunk| Ok::<Event, Infallible>(chunk_event(&chunk)));
    let mut response = Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response();

    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        headers.insert(SESSION_ID_HEADER, value);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_prefers_forwarded_proto() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("docs.example"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https, http"));
        assert_eq!(
            request_base_url(&headers, "http://localhost:8080"),
            "https://docs.example"
        );
    }

    #[test]
    fn base_url_defaults_to_http_and_falls_back_without_host() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            request_base_url(&headers, "http://localhost:8080/"),
            "http://localhost:8080"
        );
        headers.insert(header::HOST, HeaderValue::from_static("127.0.0.1:8080"));
        assert_eq!(
            request_base_url(&headers, "http://localhost:8080"),
            "http://127.0.0.1:8080"
        );
    }
}
