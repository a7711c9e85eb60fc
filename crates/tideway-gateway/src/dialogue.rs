// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dialogue ingress: long-HTTP, SSE, and the one-shot WebSocket.
//!
//! All three bind their transport to the shared pipeline; they differ only
//! in how [`PipelineEvent`]s are delivered. Client disconnection cancels the
//! fan-out side only — the upstream completion runs to the end and the
//! record is stored.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::HeaderMap,
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
    Json,
};
use futures::{SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

use tideway_core::types::{DialogueReply, DialogueRequest};
use tideway_core::TidewayError;
use tideway_engine::{DialogueTurn, PipelineEvent, ReplyMode};

use crate::handlers::{device_identity, error_response};
use crate::server::AppState;

fn turn_from_request(request: &DialogueRequest, headers: &HeaderMap, stream_mode: bool) -> DialogueTurn {
    let identity = device_identity(headers, None, None);
    DialogueTurn {
        conversation_id: request.conversation_id.clone(),
        request: request.request.clone(),
        model: request.model.clone(),
        style: request.style.clone(),
        files: request.files.clone(),
        device_fingerprint: identity.fingerprint,
        platform: identity.platform,
        stream_mode,
    }
}

/// POST /chat/dialogue/http
///
/// The classic long-timeout JSON dialogue endpoint. `keep_alive: true` only
/// touches the session TTL.
pub async fn dialogue_http(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<DialogueRequest>,
) -> Response {
    if let Err(e) = state.engine.gate.check().await {
        return error_response(e);
    }
    if request.keep_alive {
        let Some(ref conversation_id) = request.conversation_id else {
            return error_response(TidewayError::BadRequest(
                "Conversation ID required for keepalive".into(),
            ));
        };
        state.engine.sessions.touch(conversation_id).await;
        return Json(json!({
            "conversation_id": conversation_id,
            "status": "keepalive",
            "message": "Session refreshed",
        }))
        .into_response();
    }

    let turn = turn_from_request(&request, &headers, false);
    // HTTP delivers only the final text; intermediate events are dropped.
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    match state.engine.run_dialogue(turn, ReplyMode::Direct, events_tx).await {
        Ok(outcome) => Json(DialogueReply {
            conversation_id: outcome.conversation_uid,
            response: outcome.response,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /chat/dialogue/keepalive/{id}
pub async fn keepalive(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if id.is_empty() {
        return error_response(TidewayError::BadRequest("Missing conversation ID".into()));
    }
    state.engine.sessions.touch(&id).await;
    Json(json!({
        "conversation_id": id,
        "status": "keepalive",
        "message": "Session refreshed",
    }))
    .into_response()
}

/// DELETE /chat/dialogue/{id}
pub async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if id.is_empty() {
        return error_response(TidewayError::BadRequest("Missing conversation ID".into()));
    }
    state.engine.sessions.delete(&id).await;
    state.engine.publish_dialogues().await;
    Json(json!({"message": "Dialogue deleted successfully"})).into_response()
}

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    #[serde(default)]
    pub request: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
}

/// Run the pipeline and emit `(event, data)` pairs on a channel: the common
/// streaming core for SSE and the one-shot WebSocket.
fn spawn_streaming_dialogue(
    state: AppState,
    turn: DialogueTurn,
) -> mpsc::UnboundedReceiver<(&'static str, serde_json::Value)> {
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let (pipe_tx, mut pipe_rx) = mpsc::unbounded_channel::<PipelineEvent>();

    let conversation_uid: Arc<std::sync::Mutex<Option<String>>> =
        Arc::new(std::sync::Mutex::new(turn.conversation_id.clone()));

    // Fan-out: pipeline events become wire frames.
    {
        let frame_tx = frame_tx.clone();
        let conversation_uid = conversation_uid.clone();
        tokio::spawn(async move {
            while let Some(event) = pipe_rx.recv().await {
                let frame = match event {
                    PipelineEvent::ConversationId(uid) => {
                        *conversation_uid.lock().expect("uid lock poisoned") = Some(uid.clone());
                        ("conversation_id", json!({"conversation_id": uid}))
                    }
                    PipelineEvent::Content(text) => {
                        ("content", json!({"delta": text, "text": text}))
                    }
                };
                if frame_tx.send(frame).is_err() {
                    // Client went away; keep draining so the pipeline finishes.
                    debug!("stream client disconnected, continuing upstream");
                }
            }
        });
    }

    // Runner: drive the pipeline, then settle the stream.
    tokio::spawn(async move {
        let result = state
            .engine
            .run_dialogue(turn, ReplyMode::Direct, pipe_tx)
            .await;
        match result {
            Ok(outcome) => {
                let _ = frame_tx.send((
                    "done",
                    json!({
                        "conversation_id": outcome.conversation_uid,
                        "response": outcome.response,
                        "done": true,
                    }),
                ));
            }
            Err(TidewayError::UsageBlocked { reason, reset_time }) => {
                let _ = frame_tx.send((
                    "usage_blocked",
                    json!({
                        "error": "Usage limit exceeded",
                        "block_reason": reason,
                        "block_reset_time": reset_time.unwrap_or_default(),
                        "is_blocked": true,
                    }),
                ));
            }
            Err(e) => {
                let _ = frame_tx.send(("error", json!({"error": e.to_string()})));
            }
        }
        // The ingress stream is finished; let the sweeper reap the session.
        let uid = conversation_uid.lock().expect("uid lock poisoned").clone();
        if let Some(uid) = uid {
            state.engine.sessions.mark_sse_closed(&uid).await;
        }
    });

    frame_rx
}

/// GET /chat/dialogue/event — SSE streaming dialogue.
///
/// Event order: `conversation_id`, then `content` frames carrying cumulative
/// text, then `done` (or `error` / `usage_blocked`).
pub async fn dialogue_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<EventQuery>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let request = DialogueRequest {
        conversation_id: query.conversation_id,
        request: query.request,
        model: query.model,
        style: query.style,
        files: vec![],
        keep_alive: false,
    };
    let turn = turn_from_request(&request, &headers, true);
    let frame_rx = spawn_streaming_dialogue(state, turn);

    let stream = futures::stream::unfold(frame_rx, |mut rx| async move {
        rx.recv().await.map(|(event, data)| {
            (
                Ok::<_, std::convert::Infallible>(
                    Event::default().event(event).data(data.to_string()),
                ),
                rx,
            )
        })
    });
    Sse::new(stream)
}

/// GET /chat/dialogue/websocket — one-shot WebSocket dialogue.
///
/// The first client frame is the dialogue request; the reply frames use the
/// same `{type, data}` envelope as the persistent multiplexer, and the
/// connection closes after `done` or `error`.
pub async fn dialogue_websocket(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_oneshot_socket(socket, state, headers))
}

async fn handle_oneshot_socket(socket: WebSocket, state: AppState, headers: HeaderMap) {
    let (mut sender, mut receiver) = socket.split();

    let request: DialogueRequest = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                Ok(request) => break request,
                Err(_) => {
                    let _ = send_ws_frame(&mut sender, "error", json!({"error": "Invalid request format"})).await;
                    return;
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            _ => return,
        }
    };
    if request.request.is_empty() {
        let _ = send_ws_frame(&mut sender, "error", json!({"error": "Request cannot be empty"})).await;
        return;
    }

    let turn = turn_from_request(&request, &headers, true);
    let mut frame_rx = spawn_streaming_dialogue(state, turn);
    while let Some((event, data)) = frame_rx.recv().await {
        let done = matches!(event, "done" | "error" | "usage_blocked");
        if send_ws_frame(&mut sender, event, data).await.is_err() {
            // Fan-out cancelled; the pipeline still settles the record.
            break;
        }
        if done {
            break;
        }
    }
    let _ = sender.close().await;
}

async fn send_ws_frame(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    frame_type: &str,
    data: serde_json::Value,
) -> Result<(), axum::Error> {
    let envelope = json!({"type": frame_type, "data": data});
    sender.send(Message::Text(envelope.to_string().into())).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_query_defaults_are_permissive() {
        let query: EventQuery = serde_json::from_str(r#"{"request": "hi"}"#).unwrap();
        assert_eq!(query.request, "hi");
        assert!(query.conversation_id.is_none());
    }

    #[test]
    fn turn_carries_device_identity_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Device-ID", "fp-1".parse().unwrap());
        headers.insert("X-Platform", "ios".parse().unwrap());
        let request = DialogueRequest {
            conversation_id: Some("conv-1".into()),
            request: "hi".into(),
            model: None,
            style: None,
            files: vec![],
            keep_alive: false,
        };
        let turn = turn_from_request(&request, &headers, true);
        assert_eq!(turn.device_fingerprint, "fp-1");
        assert_eq!(turn.platform, "ios");
        assert!(turn.stream_mode);
        assert_eq!(turn.conversation_id.as_deref(), Some("conv-1"));
    }
}
