mod common;

use std::time::Duration;

use anyhow::Result;
use askdoc::chat::PLACEHOLDER_NOTICE;
use askdoc::models::{ROLE_ASSISTANT, ROLE_USER};
use askdoc::orchestrator::StreamChunk;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use common::{body_to_vec, parse_sse, read_json, TestApp};
use http_body_util::BodyExt;
use serde_json::{json, Value};

async fn stream_chat(
    app: &TestApp,
    site_id: &str,
    payload: Value,
) -> Result<(StatusCode, Option<String>, Vec<(String, Value)>)> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/api/widget/chat/{site_id}/stream"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&payload)?))?;
    let response = app.send(request).await?;
    let status = response.status();
    let session_header = response
        .headers()
        .get("x-session-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = body_to_vec(response.into_body()).await?;
    Ok((
        status,
        session_header,
        parse_sse(&String::from_utf8_lossy(&body)),
    ))
}

fn done_frames(frames: &[(String, Value)]) -> Vec<&Value> {
    frames
        .iter()
        .filter(|(_, data)| data["type"] == "done")
        .map(|(_, data)| data)
        .collect()
}

#[tokio::test]
async fn widget_config_is_public_and_stable() -> Result<()> {
    let app = TestApp::new().await?;
    let site_id = app.create_site("Docs portal", &[]).await?;
    let path = format!("/api/widget/config/{site_id}");

    let first: Value = read_json(app.get(&path, None).await?).await?;
    let second: Value = read_json(app.get(&path, None).await?).await?;
    assert_eq!(first, second);
    assert_eq!(first["site_id"], site_id.as_str());
    assert_eq!(first["name"], "Docs portal");
    assert_eq!(first["config"]["placeholder"], "Ask a question...");
    assert_eq!(first["base_url"], "http://askdoc.test");

    let request = Request::builder()
        .uri(&path)
        .header("host", "widget.example:9000")
        .header("x-forwarded-proto", "https")
        .body(Body::empty())?;
    let proxied: Value = read_json(app.send(request).await?).await?;
    assert_eq!(proxied["base_url"], "https://widget.example:9000");

    let response = app.get("/api/widget/config/missing", None).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn chat_creates_and_reuses_a_session() -> Result<()> {
    let app = TestApp::new().await?;
    let collection_id = app.create_collection("Handbook", None).await?;
    let site_id = app.create_site("Docs portal", &[&collection_id]).await?;
    let path = format!("/api/widget/chat/{site_id}");

    let response = app
        .post_json(&path, &json!({"message": "What is askdoc?"}), None)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let first: Value = read_json(response).await?;
    assert_eq!(first["answer"], "Answer to: What is askdoc?");
    assert_eq!(first["sources"].as_array().unwrap().len(), 1);
    let session_id = first["session_id"].as_str().unwrap().to_string();

    let second: Value = read_json(
        app.post_json(
            &path,
            &json!({"session_id": session_id, "message": "And pricing?"}),
            None,
        )
        .await?,
    )
    .await?;
    assert_eq!(second["session_id"], session_id.as_str());
    assert_eq!(app.session_count().await?, 1);

    let turns = app.orchestrator().turns().await;
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].collection_ids, vec![collection_id]);

    let messages = app.messages_for(&session_id).await?;
    let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(
        roles,
        vec![ROLE_USER, ROLE_ASSISTANT, ROLE_USER, ROLE_ASSISTANT]
    );
    assert_eq!(messages[0].content, "What is askdoc?");
    assert_eq!(messages[1].sources().len(), 1);

    let transcript: Value = read_json(
        app.get(&format!("/api/admin/sessions/{session_id}/messages"), None)
            .await?,
    )
    .await?;
    assert_eq!(transcript["site_id"], site_id.as_str());
    assert_eq!(transcript["messages"].as_array().unwrap().len(), 4);
    assert_eq!(transcript["messages"][3]["content"], "Answer to: And pricing?");

    Ok(())
}

#[tokio::test]
async fn unknown_session_id_starts_a_new_session() -> Result<()> {
    let app = TestApp::new().await?;
    let site_id = app.create_site("Docs portal", &[]).await?;

    let reply: Value = read_json(
        app.post_json(
            &format!("/api/widget/chat/{site_id}"),
            &json!({"session_id": "not-a-session", "message": "hi"}),
            None,
        )
        .await?,
    )
    .await?;
    assert_ne!(reply["session_id"], "not-a-session");
    assert_eq!(app.session_count().await?, 1);
    Ok(())
}

#[tokio::test]
async fn chat_validates_message_and_site() -> Result<()> {
    let app = TestApp::new().await?;
    let site_id = app.create_site("Docs portal", &[]).await?;

    let response = app
        .post_json(
            &format!("/api/widget/chat/{site_id}"),
            &json!({"message": "   "}),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = read_json(response).await?;
    assert_eq!(body["error"], "message is required");

    let response = app
        .post_json("/api/widget/chat/missing", &json!({"message": "hi"}), None)
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let (status, _, _) = stream_chat(&app, "missing", json!({"message": "hi"})).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert_eq!(app.session_count().await?, 0);
    assert!(app.all_messages().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn chat_failure_is_answered_and_stored() -> Result<()> {
    let app = TestApp::new().await?;
    let site_id = app.create_site("Docs portal", &[]).await?;
    app.orchestrator().fail_chat("model offline").await;

    let response = app
        .post_json(
            &format!("/api/widget/chat/{site_id}"),
            &json!({"message": "hi"}),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let reply: Value = read_json(response).await?;
    let answer = reply["answer"].as_str().unwrap();
    assert!(answer.starts_with("Error from Agent:"));
    assert!(answer.contains("model offline"));

    let messages = app
        .messages_for(reply["session_id"].as_str().unwrap())
        .await?;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, answer);
    Ok(())
}

#[tokio::test]
async fn placeholder_chat_echoes_question() -> Result<()> {
    let app = TestApp::without_orchestrator().await?;
    let site_id = app.create_site("Docs portal", &[]).await?;

    let reply: Value = read_json(
        app.post_json(
            &format!("/api/widget/chat/{site_id}"),
            &json!({"message": "Where are the docs?"}),
            None,
        )
        .await?,
    )
    .await?;
    let answer = reply["answer"].as_str().unwrap();
    assert!(answer.starts_with(PLACEHOLDER_NOTICE));
    assert!(answer.ends_with("Where are the docs?"));
    assert_eq!(reply["sources"], json!([]));
    Ok(())
}

#[tokio::test]
async fn stream_relays_chunks_and_finishes_with_one_done() -> Result<()> {
    let app = TestApp::new().await?;
    let site_id = app.create_site("Docs portal", &[]).await?;

    let (status, header, frames) =
        stream_chat(&app, &site_id, json!({"message": "Say hello"})).await?;
    assert_eq!(status, StatusCode::OK);
    let session_id = header.expect("session header");

    let kinds: Vec<&str> = frames
        .iter()
        .map(|(event, _)| event.as_str())
        .collect();
    assert_eq!(kinds, vec!["thinking", "content", "content", "sources", "done"]);

    let done = done_frames(&frames);
    assert_eq!(done.len(), 1);
    assert_eq!(done[0]["session_id"], session_id.as_str());

    let messages = app.messages_for(&session_id).await?;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, ROLE_ASSISTANT);
    assert_eq!(messages[1].content, "Hello world");
    assert_eq!(messages[1].sources().len(), 1);
    Ok(())
}

#[tokio::test]
async fn stream_adds_done_when_upstream_stops_early() -> Result<()> {
    let app = TestApp::new().await?;
    let site_id = app.create_site("Docs portal", &[]).await?;
    let fake = app.orchestrator();
    fake.script_stream(vec![
        StreamChunk::content("partial"),
        StreamChunk::sources(vec![common::sample_source()]),
        StreamChunk::sources(vec![common::sample_source()]),
    ])
    .await;

    let (_, header, frames) = stream_chat(&app, &site_id, json!({"message": "go"})).await?;
    let session_id = header.expect("session header");

    let sources = frames
        .iter()
        .filter(|(event, _)| event == "sources")
        .count();
    assert_eq!(sources, 1);
    let done = done_frames(&frames);
    assert_eq!(done.len(), 1);
    assert_eq!(frames.last().unwrap().1["type"], "done");

    let messages = app.messages_for(&session_id).await?;
    assert_eq!(messages[1].content, "partial");
    Ok(())
}

#[tokio::test]
async fn stream_error_ends_turn_with_error_answer() -> Result<()> {
    let app = TestApp::new().await?;
    let site_id = app.create_site("Docs portal", &[]).await?;
    app.orchestrator()
        .script_stream(vec![
            StreamChunk::thinking("Searching"),
            StreamChunk::error("index unavailable"),
            StreamChunk::content("never delivered"),
        ])
        .await;

    let (_, header, frames) = stream_chat(&app, &site_id, json!({"message": "go"})).await?;
    let session_id = header.expect("session header");

    let kinds: Vec<&str> = frames
        .iter()
        .map(|(event, _)| event.as_str())
        .collect();
    assert_eq!(kinds, vec!["thinking", "error", "done"]);

    let messages = app.messages_for(&session_id).await?;
    assert_eq!(messages[1].content, "Error from Agent: index unavailable");
    Ok(())
}

#[tokio::test]
async fn stream_reuses_session() -> Result<()> {
    let app = TestApp::new().await?;
    let site_id = app.create_site("Docs portal", &[]).await?;

    let (_, header, _) = stream_chat(&app, &site_id, json!({"message": "one"})).await?;
    let session_id = header.expect("session header");
    let (_, again, frames) = stream_chat(
        &app,
        &site_id,
        json!({"session_id": session_id, "message": "two"}),
    )
    .await?;

    assert_eq!(again.as_deref(), Some(session_id.as_str()));
    assert_eq!(done_frames(&frames)[0]["session_id"], session_id.as_str());
    assert_eq!(app.session_count().await?, 1);
    assert_eq!(app.messages_for(&session_id).await?.len(), 4);
    Ok(())
}

#[tokio::test]
async fn placeholder_stream_reports_missing_orchestrator() -> Result<()> {
    let app = TestApp::without_orchestrator().await?;
    let site_id = app.create_site("Docs portal", &[]).await?;

    let (status, header, frames) = stream_chat(&app, &site_id, json!({"message": "hi"})).await?;
    assert_eq!(status, StatusCode::OK);
    let session_id = header.expect("session header");

    let kinds: Vec<&str> = frames
        .iter()
        .map(|(event, _)| event.as_str())
        .collect();
    assert_eq!(kinds, vec!["thinking", "content", "done"]);
    assert_eq!(frames[1].1["content"], PLACEHOLDER_NOTICE);
    assert_eq!(frames[2].1["session_id"], session_id.as_str());

    let messages = app.messages_for(&session_id).await?;
    assert_eq!(messages[1].content, PLACEHOLDER_NOTICE);
    Ok(())
}

#[tokio::test]
async fn disconnect_during_silent_upstream_still_stores_answer() -> Result<()> {
    let app = TestApp::new().await?;
    let site_id = app.create_site("Docs portal", &[]).await?;
    let fake = app.orchestrator();
    fake.script_stream(vec![StreamChunk::content("partial")]).await;
    fake.stall_after_script().await;

    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/api/widget/chat/{site_id}/stream"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&json!({"message": "hi"}))?))?;
    let response = app.send(request).await?;
    let session_id = response
        .headers()
        .get("x-session-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .expect("session header");

    let mut body = response.into_body();
    let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
        .await?
        .expect("first frame")
        .map_err(|err| anyhow::anyhow!("body error: {err}"))?;
    let data = frame.into_data().expect("data frame");
    assert!(String::from_utf8_lossy(&data).contains("partial"));
    drop(body);

    let mut messages = Vec::new();
    for _ in 0..100 {
        messages = app.messages_for(&session_id).await?;
        if messages.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(messages.len(), 2, "assistant message stored after disconnect");
    assert_eq!(messages[1].role, ROLE_ASSISTANT);
    assert_eq!(messages[1].content, "partial");
    Ok(())
}
