//! Chat turns for the widget: one JSON answer, or a relayed chunk stream.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{Source, ROLE_ASSISTANT, ROLE_USER};
use crate::orchestrator::{ChatTurn, ChunkKind, ChunkStream, Orchestrator, StreamChunk};
use crate::state::AppState;
use crate::store;

/// Capacity of the channel between the streaming producer and the response.
pub const STREAM_BUFFER: usize = 100;

pub const PLACEHOLDER_NOTICE: &str = "Orchestrator Agent not configured.";

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub answer: String,
    pub sources: Vec<Source>,
}

/// A turn whose session exists and whose user message is already stored.
struct PreparedTurn {
    session_id: String,
    turn: ChatTurn,
}

fn prepare_turn(state: &AppState, site_id: &str, request: ChatRequest) -> AppResult<PreparedTurn> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(AppError::bad_request("message is required"));
    }

    let mut conn = state.db()?;
    let site = store::find_site(&mut conn, site_id)?
        .ok_or_else(|| AppError::not_found_named("site"))?;
    let session = store::resolve_session(&mut conn, &site.id, request.session_id.as_deref())?;
    store::append_message(&mut conn, &session.id, ROLE_USER, message, &[])?;

    Ok(PreparedTurn {
        session_id: session.id,
        turn: ChatTurn {
            message: message.to_string(),
            collection_ids: site.collection_ids(),
        },
    })
}

fn finish_turn(
    state: &AppState,
    session_id: &str,
    answer: &str,
    sources: &[Source],
) -> AppResult<()> {
    let mut conn = state.db()?;
    store::append_message(&mut conn, session_id, ROLE_ASSISTANT, answer, sources)?;
    store::touch_session(&mut conn, session_id)?;
    Ok(())
}

fn placeholder_answer(question: &str) -> String {
    format!("{PLACEHOLDER_NOTICE} Your question: {question}")
}

fn error_answer(message: &str) -> String {
    format!("Error from Agent: {message}")
}

pub async fn chat(state: &AppState, site_id: &str, request: ChatRequest) -> AppResult<ChatResponse> {
    let prepared = prepare_turn(state, site_id, request)?;

    let (answer, sources) = match state.orchestrator() {
        Some(orchestrator) => match orchestrator.chat(prepared.turn.clone()).await {
            Ok(reply) => (reply.answer, reply.sources),
            Err(err) => {
                warn!(session_id = %prepared.session_id, error = %err, "orchestrator chat failed");
                (error_answer(&err.to_string()), Vec::new())
            }
        },
        None => (placeholder_answer(&prepared.turn.message), Vec::new()),
    };

    finish_turn(state, &prepared.session_id, &answer, &sources)?;

    Ok(ChatResponse {
        session_id: prepared.session_id,
        answer,
        sources,
    })
}

/// Starts a streaming turn. Returns the session id and the chunk stream; the
/// stream always ends with exactly one `done` chunk carrying the session id.
pub async fn chat_stream(
    state: &AppState,
    site_id: &str,
    request: ChatRequest,
) -> AppResult<(String, ChunkStream)> {
    let prepared = prepare_turn(state, site_id, request)?;
    let session_id = prepared.session_id.clone();

    let (tx, rx) = mpsc::channel::<StreamChunk>(STREAM_BUFFER);
    tokio::spawn(relay_turn(
        state.clone(),
        state.orchestrator().cloned(),
        prepared,
        tx,
    ));

    let chunks = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    })
    .boxed();
    Ok((session_id, chunks))
}

#[derive(Default)]
struct Transcript {
    content: String,
    sources: Vec<Source>,
    error: Option<String>,
}

impl Transcript {
    fn record(&mut self, chunk: &StreamChunk) {
        match chunk.kind {
            ChunkKind::Content => {
                if let Some(text) = &chunk.content {
                    self.content.push_str(text);
                }
            }
            ChunkKind::Sources => {
                if let Some(sources) = &chunk.sources {
                    self.sources = sources.clone();
                }
            }
            ChunkKind::Error => {
                self.error = Some(chunk.content.clone().unwrap_or_default());
            }
            ChunkKind::Thinking | ChunkKind::Done => {}
        }
    }

    fn answer(&self) -> String {
        if !self.content.is_empty() {
            return self.content.clone();
        }
        match &self.error {
            Some(message) => error_answer(message),
            None => String::new(),
        }
    }
}

async fn upstream_chunks(
    orchestrator: Option<Arc<dyn Orchestrator>>,
    turn: ChatTurn,
) -> ChunkStream {
    match orchestrator {
        Some(orchestrator) => match orchestrator.chat_stream(turn).await {
            Ok(chunks) => chunks,
            Err(err) => {
                warn!(error = %err, "orchestrator stream failed to start");
                stream::iter(vec![StreamChunk::error(err.to_string())]).boxed()
            }
        },
        None => stream::iter(vec![
            StreamChunk::thinking("Processing..."),
            StreamChunk::content(PLACEHOLDER_NOTICE),
            StreamChunk::done(),
        ])
        .boxed(),
    }
}

/// Pulls upstream chunks into `tx` until a terminal chunk, then emits the
/// closing `done` and stores the assistant message. A closed receiver stops
/// the pull and drops the upstream stream.
async fn relay_turn(
    state: AppState,
    orchestrator: Option<Arc<dyn Orchestrator>>,
    prepared: PreparedTurn,
    tx: mpsc::Sender<StreamChunk>,
) {
    let session_id = prepared.session_id;
    let mut upstream = upstream_chunks(orchestrator, prepared.turn).await;
    let mut transcript = Transcript::default();
    let mut sources_sent = false;
    let mut connected = true;

    loop {
        // A closed receiver must end the pull even while upstream is silent.
        let next = tokio::select! {
            _ = tx.closed() => None,
            next = upstream.next() => Some(next),
        };
        let chunk = match next {
            None => {
                debug!(session_id = %session_id, "stream receiver closed");
                connected = false;
                break;
            }
            Some(None) => break,
            Some(Some(chunk)) => chunk,
        };
        if chunk.kind == ChunkKind::Done {
            break;
        }
        if chunk.kind == ChunkKind::Sources {
            if sources_sent {
                continue;
            }
            sources_sent = true;
        }
        transcript.record(&chunk);
        let terminal = chunk.kind.is_terminal();
        if tx.send(chunk).await.is_err() {
            debug!(session_id = %session_id, "stream receiver closed");
            connected = false;
            break;
        }
        if terminal {
            break;
        }
    }
    drop(upstream);

    let answer = transcript.answer();
    if let Err(err) = finish_turn(&state, &session_id, &answer, &transcript.sources) {
        error!(session_id = %session_id, error = %err, "failed to store assistant message");
    }

    if connected {
        let mut done = StreamChunk::done();
        done.session_id = Some(session_id.clone());
        let _ = tx.send(done).await;
    }
    info!(session_id = %session_id, completed = connected, "streamed chat turn finished");
}
