// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The persistent multiplexed WebSocket (`GET /data/websocket/create`).
//!
//! One long-lived socket per client carries a tagged `{type, data}` envelope
//! multiplexing dialogue, keepalive, whitelisted API queries, pings, and the
//! ack protocol. The server pings every 30 s; any inbound frame extends the
//! 120 s read deadline; writes carry 10 s (control) / 30 s (data) deadlines.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use dashmap::DashMap;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use tideway_core::{version_at_least, TidewayError};
use tideway_engine::{DialogueTurn, PipelineEvent, ReplyMode};
use tideway_store::queries::{conversations, devices, dialogues};

use crate::handlers::{config_payload, device_identity, DeviceIdentity};
use crate::server::AppState;

/// Read deadline: silence past this closes the connection.
const READ_DEADLINE: Duration = Duration::from_secs(120);

/// Server ping cadence.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Write deadline for control frames (ping, pong, acks, keepalive).
const CONTROL_WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Write deadline for data frames (content, done, responses).
const DATA_WRITE_DEADLINE: Duration = Duration::from_secs(30);

/// Ack window: a `replying` record without an ack past this fails.
const ACK_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct MuxQuery {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

/// An outbound frame with its write deadline.
struct OutboundFrame {
    message: Message,
    deadline: Duration,
}

#[derive(Clone)]
struct FrameSender {
    tx: mpsc::Sender<OutboundFrame>,
}

impl FrameSender {
    /// Enqueue a `{type, data}` envelope.
    async fn send_envelope(&self, frame_type: &str, data: Value, deadline: Duration) -> bool {
        let envelope = json!({"type": frame_type, "data": data});
        self.tx
            .send(OutboundFrame {
                message: Message::Text(envelope.to_string().into()),
                deadline,
            })
            .await
            .is_ok()
    }

    async fn send_control(&self, frame_type: &str, data: Value) -> bool {
        self.send_envelope(frame_type, data, CONTROL_WRITE_DEADLINE).await
    }

    async fn send_data(&self, frame_type: &str, data: Value) -> bool {
        self.send_envelope(frame_type, data, DATA_WRITE_DEADLINE).await
    }

    async fn send_error(&self, message: impl Into<String>) -> bool {
        self.send_data("error", json!({"error": message.into()})).await
    }

    async fn send_ping(&self) -> bool {
        self.tx
            .send(OutboundFrame {
                message: Message::Ping(Vec::new().into()),
                deadline: CONTROL_WRITE_DEADLINE,
            })
            .await
            .is_ok()
    }
}

/// GET /data/websocket/create
pub async fn persistent_websocket(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<MuxQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let identity = device_identity(
        &headers,
        query.device_id.as_deref(),
        query.platform.as_deref(),
    );
    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

async fn handle_socket(socket: WebSocket, state: AppState, identity: DeviceIdentity) {
    let (sink, mut receiver) = socket.split();
    let (out_tx, out_rx) = mpsc::channel::<OutboundFrame>(64);
    let sender = FrameSender { tx: out_tx };
    let writer = tokio::spawn(write_loop(sink, out_rx));

    // Version gate, before anything else.
    if let Some(required) = state
        .engine
        .config
        .client
        .min_client_version
        .as_deref()
        .filter(|v| !v.is_empty())
    {
        if !identity.client_version.is_empty()
            && !version_at_least(&identity.client_version, required)
        {
            info!(
                current = identity.client_version.as_str(),
                required, "outdated client refused"
            );
            sender
                .send_control(
                    "version_outdated",
                    json!({
                        "current_version": identity.client_version,
                        "required_version": required,
                        "message": "Client version is outdated, please update to continue",
                    }),
                )
                .await;
            drop(sender); // close the frame channel so the writer drains and exits
            writer.await.ok();
            return;
        }
    }

    // Ban gate on handshake.
    if !identity.fingerprint.is_empty() {
        match devices::get_or_create(&state.engine.db, &identity.fingerprint, &identity.platform)
            .await
        {
            Ok(device) if device.banned => {
                warn!(fingerprint = identity.fingerprint.as_str(), "banned device refused");
                sender
                    .send_control(
                        "banned",
                        json!({
                            "banned": true,
                            "reason": device.ban_reason.unwrap_or_default(),
                        }),
                    )
                    .await;
                drop(sender);
                writer.await.ok();
                return;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "device registration failed"),
        }
    }

    sender
        .send_control(
            "connected",
            json!({
                "status": "connected",
                "message": "WebSocket connection established",
            }),
        )
        .await;
    info!(device = identity.fingerprint.as_str(), "persistent client connected");

    // Heartbeat: ping through the shared writer so frames never interleave.
    let heartbeat = {
        let sender = sender.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PING_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                if !sender.send_ping().await {
                    break;
                }
            }
        })
    };

    let pending_acks: Arc<DashMap<i64, oneshot::Sender<()>>> = Arc::new(DashMap::new());

    loop {
        let frame = match tokio::time::timeout(READ_DEADLINE, receiver.next()).await {
            Err(_) => {
                info!("persistent client idle past deadline, closing");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(error = %e, "persistent client read error");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => {
                let envelope: Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(_) => {
                        sender.send_error("Invalid message format").await;
                        continue;
                    }
                };
                let Some(frame_type) = envelope.get("type").and_then(|t| t.as_str()) else {
                    sender.send_error("Invalid message format: missing type field").await;
                    continue;
                };
                let data = envelope.get("data").cloned().unwrap_or(Value::Null);
                match frame_type {
                    "dialogue" => {
                        handle_dialogue(&state, &sender, &pending_acks, data).await;
                    }
                    "keepalive" => handle_keepalive(&state, &sender, data).await,
                    "api_request" => handle_api_request(&state, &sender, data).await,
                    "ping" => {
                        sender
                            .send_control(
                                "pong",
                                json!({"timestamp": chrono::Utc::now().to_rfc3339()}),
                            )
                            .await;
                    }
                    "ack" => handle_ack(&state, &sender, &pending_acks, data).await,
                    other => {
                        sender
                            .send_error(format!("Unknown message type: {other}"))
                            .await;
                    }
                }
            }
            Message::Ping(payload) => {
                let _ = sender
                    .tx
                    .send(OutboundFrame {
                        message: Message::Pong(payload),
                        deadline: CONTROL_WRITE_DEADLINE,
                    })
                    .await;
            }
            Message::Pong(_) => {} // any frame resets the read deadline
            Message::Close(_) => break,
            _ => {}
        }
    }

    heartbeat.abort();
    drop(sender);
    writer.await.ok();
    debug!("persistent client loop finished");
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<OutboundFrame>,
) {
    while let Some(frame) = out_rx.recv().await {
        match tokio::time::timeout(frame.deadline, sink.send(frame.message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "persistent client write failed");
                break;
            }
            Err(_) => {
                warn!("persistent client write deadline exceeded");
                break;
            }
        }
    }
    let _ = sink.close().await;
}

/// The `dialogue` frame: run the pipeline with the ack-driven reply mode.
async fn handle_dialogue(
    state: &AppState,
    sender: &FrameSender,
    pending_acks: &Arc<DashMap<i64, oneshot::Sender<()>>>,
    data: Value,
) {
    let request = data.get("request").and_then(|v| v.as_str()).unwrap_or("");
    let conversation_id = data
        .get("conversation_id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let fingerprint = data.get("device_id").and_then(|v| v.as_str()).unwrap_or("");

    if fingerprint.is_empty() {
        sender.send_error("Device ID is required").await;
        return;
    }
    if request.is_empty() {
        sender.send_error("Request cannot be empty").await;
        return;
    }

    // Ban state re-checked per dialogue, not only at handshake.
    match devices::get_or_create(&state.engine.db, fingerprint, "windows").await {
        Ok(device) if device.banned => {
            sender
                .send_control(
                    "banned",
                    json!({"banned": true, "reason": device.ban_reason.unwrap_or_default()}),
                )
                .await;
            return;
        }
        Ok(_) => {}
        Err(_) => {
            sender.send_error("Failed to get or create device").await;
            return;
        }
    }

    let turn = DialogueTurn {
        conversation_id,
        request: request.to_string(),
        model: data.get("model").and_then(|v| v.as_str()).map(str::to_string),
        style: data.get("style").and_then(|v| v.as_str()).map(str::to_string),
        files: vec![],
        device_fingerprint: fingerprint.to_string(),
        platform: "windows".to_string(),
        stream_mode: true,
    };

    let (pipe_tx, mut pipe_rx) = mpsc::unbounded_channel::<PipelineEvent>();
    let forwarder = {
        let sender = sender.clone();
        tokio::spawn(async move {
            while let Some(event) = pipe_rx.recv().await {
                match event {
                    PipelineEvent::ConversationId(uid) => {
                        sender
                            .send_data("conversation_id", json!({"conversation_id": uid}))
                            .await;
                    }
                    PipelineEvent::Content(text) => {
                        sender
                            .send_data("content", json!({"delta": text, "text": text}))
                            .await;
                    }
                }
            }
        })
    };

    let result = state
        .engine
        .run_dialogue(turn, ReplyMode::AckRequired, pipe_tx)
        .await;
    forwarder.await.ok();

    match result {
        Ok(outcome) => {
            // Register the ack waiter before the client can possibly reply.
            let (ack_tx, ack_rx) = oneshot::channel();
            pending_acks.insert(outcome.dialogue_id, ack_tx);
            sender
                .send_data(
                    "done",
                    json!({
                        "conversation_id": outcome.conversation_uid,
                        "dialogue_id": outcome.dialogue_id,
                        "response": outcome.response,
                        "done": true,
                    }),
                )
                .await;

            let engine = state.engine.clone();
            let pending_acks = pending_acks.clone();
            let dialogue_id = outcome.dialogue_id;
            tokio::spawn(async move {
                match tokio::time::timeout(ACK_DEADLINE, ack_rx).await {
                    Ok(_) => {
                        pending_acks.remove(&dialogue_id);
                    }
                    Err(_) => {
                        pending_acks.remove(&dialogue_id);
                        // No client notification on ack timeout.
                        if let Err(e) = engine.ack_timed_out(dialogue_id).await {
                            warn!(error = %e, dialogue = dialogue_id, "ack timeout transition failed");
                        }
                    }
                }
            });
        }
        Err(TidewayError::UsageBlocked { reason, reset_time }) => {
            sender
                .send_data(
                    "usage_blocked",
                    json!({
                        "error": "Usage limit exceeded",
                        "block_reason": reason,
                        "block_reset_time": reset_time.unwrap_or_default(),
                        "is_blocked": true,
                    }),
                )
                .await;
        }
        Err(e) => {
            sender.send_error(format!("Failed to send message: {e}")).await;
        }
    }
}

/// The `keepalive` frame: touch the session TTL only.
async fn handle_keepalive(state: &AppState, sender: &FrameSender, data: Value) {
    let Some(conversation_id) = data.get("conversation_id").and_then(|v| v.as_str()) else {
        sender.send_error("Conversation ID required for keepalive").await;
        return;
    };
    state.engine.sessions.touch(conversation_id).await;
    sender
        .send_control(
            "keepalive",
            json!({
                "conversation_id": conversation_id,
                "status": "keepalive",
                "message": "Session refreshed",
            }),
        )
        .await;
}

/// The `ack` frame: settle a `replying` record and release its waiter.
async fn handle_ack(
    state: &AppState,
    sender: &FrameSender,
    pending_acks: &Arc<DashMap<i64, oneshot::Sender<()>>>,
    data: Value,
) {
    let Some(dialogue_id) = data.get("dialogue_id").and_then(|v| v.as_i64()) else {
        sender.send_error("Invalid ack request: missing dialogue_id").await;
        return;
    };
    if let Some((_, waiter)) = pending_acks.remove(&dialogue_id) {
        let _ = waiter.send(());
    }
    // An ack for an unknown or settled dialogue is a no-op success.
    if let Err(e) = state.engine.ack_dialogue(dialogue_id).await {
        warn!(error = %e, dialogue = dialogue_id, "ack transition failed");
    }
    sender
        .send_control(
            "ack_received",
            json!({"dialogue_id": dialogue_id, "status": "ok"}),
        )
        .await;
}

/// The `api_request` frame: whitelisted read-only queries.
async fn handle_api_request(state: &AppState, sender: &FrameSender, data: Value) {
    let request_id = data.get("request_id").cloned().unwrap_or(Value::from(0));
    let Some(endpoint) = data.get("endpoint").and_then(|v| v.as_str()) else {
        sender
            .send_data("error", json!({"request_id": request_id, "error": "Missing endpoint"}))
            .await;
        return;
    };

    let engine = &state.engine;
    let payload: Result<Value, String> = if endpoint == "/api/stats" {
        Ok(engine.stats_payload().await)
    } else if endpoint == "/api/usage" {
        Ok(engine.gate.payload().await)
    } else if endpoint == "/api/dialogues" {
        match conversations::list_summaries(&engine.db).await {
            Ok(summaries) => Ok(json!({"conversations": summaries})),
            Err(_) => Ok(json!({"conversations": []})),
        }
    } else if endpoint == "/api/records" {
        let limit = data
            .pointer("/body/limit")
            .and_then(|v| v.as_i64())
            .filter(|l| *l > 0)
            .unwrap_or(100);
        match dialogues::history(&engine.db, limit).await {
            Ok(messages) => Ok(json!({"messages": messages})),
            Err(_) => Ok(json!({"messages": []})),
        }
    } else if endpoint == "/api/config" {
        Ok(config_payload(state))
    } else if let Some(id) = endpoint.strip_prefix("/api/record/") {
        match id.parse::<i64>() {
            Ok(record_id) => match dialogues::get_by_id(&engine.db, record_id).await {
                Ok(Some(record)) => {
                    Ok(serde_json::to_value(record).unwrap_or(Value::Null))
                }
                _ => Err("Record not found".to_string()),
            },
            Err(_) => Err("Record not found".to_string()),
        }
    } else if let Some(rest) = endpoint.strip_prefix("/api/dialogues/") {
        if let Some(id) = rest.strip_suffix("/history") {
            let conversation_id = match id.parse::<i64>() {
                Ok(numeric) => Some(numeric),
                Err(_) => conversations::get_by_uid(&engine.db, id)
                    .await
                    .ok()
                    .flatten()
                    .map(|c| c.id),
            };
            match conversation_id {
                Some(cid) => match dialogues::get_by_conversation(&engine.db, cid).await {
                    Ok(messages) => Ok(json!({"messages": messages})),
                    Err(_) => Ok(json!({"messages": []})),
                },
                None => Ok(json!({"messages": []})),
            }
        } else if !rest.contains('/') {
            engine.sessions.delete(rest).await;
            engine.publish_dialogues().await;
            Ok(json!({"message": "Dialogue deleted successfully"}))
        } else {
            Err(format!("Unknown endpoint: {endpoint}"))
        }
    } else {
        Err(format!("Unknown endpoint: {endpoint}"))
    };

    match payload {
        Ok(value) => {
            let mut response = json!({"request_id": request_id});
            if let (Some(target), Some(fields)) = (response.as_object_mut(), value.as_object()) {
                for (key, field) in fields {
                    target.insert(key.clone(), field.clone());
                }
            } else if let Some(target) = response.as_object_mut() {
                target.insert("data".to_string(), value);
            }
            sender.send_data("response", response).await;
        }
        Err(message) => {
            sender
                .send_data("error", json!({"request_id": request_id, "error": message}))
                .await;
        }
    }
}
