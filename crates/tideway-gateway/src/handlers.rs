// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Monitoring and device API handlers, plus the shared error mapping.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    Json,
};
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use tideway_core::TidewayError;
use tideway_store::queries::{conversations, devices, dialogues, errors};

use crate::server::AppState;

/// Map a pipeline error onto an HTTP response per the error table.
pub fn error_response(err: TidewayError) -> Response {
    match err {
        TidewayError::BadRequest(message) => {
            (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
        }
        TidewayError::UsageBlocked { reason, reset_time } => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": "Usage limit exceeded",
                "block_reason": reason,
                "block_reset_time": reset_time.unwrap_or_default(),
                "is_blocked": true,
            })),
        )
            .into_response(),
        TidewayError::Overloaded => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "Server busy, try again later"})),
        )
            .into_response(),
        TidewayError::Banned { reason } => (
            StatusCode::FORBIDDEN,
            Json(json!({"banned": true, "reason": reason})),
        )
            .into_response(),
        other => {
            warn!(error = %other, "request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": other.to_string()})),
            )
                .into_response()
        }
    }
}

/// Device identity carried on ingress requests.
pub struct DeviceIdentity {
    pub fingerprint: String,
    pub platform: String,
    pub client_version: String,
}

/// Extract device identity from headers, with query-string fallbacks.
pub fn device_identity(
    headers: &HeaderMap,
    query_device: Option<&str>,
    query_platform: Option<&str>,
) -> DeviceIdentity {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };
    let mut fingerprint = header("X-Device-ID");
    if fingerprint.is_empty() {
        fingerprint = query_device.unwrap_or("").to_string();
    }
    let mut platform = header("X-Platform");
    if platform.is_empty() {
        platform = query_platform.unwrap_or("").to_string();
    }
    if platform.is_empty() {
        platform = "windows".to_string();
    }
    DeviceIdentity {
        fingerprint,
        platform,
        client_version: header("X-Client-Version"),
    }
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.engine.sessions.len().await,
    }))
}

/// GET /metrics — Prometheus text format, when the recorder is installed.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.prometheus_render {
        Some(render) => render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

/// GET /api/stats
pub async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.engine.stats_payload().await)
}

/// GET /api/usage
pub async fn usage(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.engine.gate.payload().await)
}

/// GET /api/dialogues — conversation summaries for the dashboard.
pub async fn dialogues(State(state): State<AppState>) -> Response {
    match conversations::list_summaries(&state.engine.db).await {
        Ok(summaries) => Json(json!({"conversations": summaries})).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/dialogues/{id}/history — all exchanges of one conversation,
/// ordinal ascending.
pub async fn dialogue_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let conversation = match id.parse::<i64>() {
        Ok(numeric) => Some(numeric),
        Err(_) => match conversations::get_by_uid(&state.engine.db, &id).await {
            Ok(conv) => conv.map(|c| c.id),
            Err(e) => return error_response(e),
        },
    };
    let Some(conversation_id) = conversation else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "Conversation not found"})))
            .into_response();
    };
    match dialogues::get_by_conversation(&state.engine.db, conversation_id).await {
        Ok(messages) => Json(json!({"messages": messages})).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct RecordsRequest {
    #[serde(default)]
    pub limit: Option<i64>,
}

/// POST /api/records — recent records, newest first.
pub async fn records(
    State(state): State<AppState>,
    Json(body): Json<RecordsRequest>,
) -> Response {
    list_records(&state, body.limit).await
}

/// GET /api/records?limit=N — same listing for clients that cannot POST.
pub async fn records_get(
    State(state): State<AppState>,
    Query(query): Query<RecordsRequest>,
) -> Response {
    list_records(&state, query.limit).await
}

async fn list_records(state: &AppState, limit: Option<i64>) -> Response {
    let limit = limit.filter(|l| *l > 0).unwrap_or(100);
    match dialogues::history(&state.engine.db, limit).await {
        Ok(messages) => Json(json!({"messages": messages})).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/record/{id}
pub async fn record_detail(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match dialogues::get_by_id(&state.engine.db, id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => {
            (StatusCode::NOT_FOUND, Json(json!({"error": "Record not found"}))).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// GET /api/processing — in-flight shim requests plus generating sessions.
pub async fn processing(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut requests: Vec<serde_json::Value> = state
        .engine
        .processing
        .iter()
        .map(|entry| {
            let request = entry.value();
            json!({
                "id": request.id,
                "submit_time": request.submit_time,
                "input_tokens": request.input_tokens,
                "user_message": truncate(&request.user_message, 50),
                "type": "api",
            })
        })
        .collect();
    for session in state.engine.sessions.active_generating().await {
        requests.push(json!({
            "id": session.conversation_id,
            "idle_secs": session.idle_secs,
            "type": "dialogue",
        }));
    }
    Json(json!({"requests": requests}))
}

/// GET /api/config — gateway parameters advertised to clients.
pub async fn config(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(config_payload(&state))
}

/// The /api/config payload, shared with the persistent multiplexer's
/// `api_request` channel.
pub(crate) fn config_payload(state: &AppState) -> serde_json::Value {
    let config = &state.engine.config;
    json!({
        "version": config.latest_version(),
        "thread_num": config.limits.thread_num,
        "incognito": true,
        "api_endpoint": config.server.api_endpoint,
        "max_tpm": config.limits.max_tpm,
        "max_rpm": config.limits.max_rpm,
        "max_rpd": config.limits.max_rpd,
        "request_interval_ms": config.limits.request_interval_ms,
        "models": config.models,
        "styles": config.styles.iter().map(|s| json!({
            "key": s.key,
            "name": s.name,
            "summary": s.summary,
        })).collect::<Vec<_>>(),
        "endpoints": tideway_engine::pipeline::api_catalog(),
    })
}

/// GET /api/version-changes
pub async fn version_changes(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({"changes": state.engine.config.client.version_changes}))
}

#[derive(Debug, Deserialize)]
pub struct DeviceStatusQuery {
    pub device_id: String,
    #[serde(default)]
    pub platform: Option<String>,
}

/// GET /api/device/status — registers the device and reports ban + usage state.
pub async fn device_status(
    State(state): State<AppState>,
    Query(query): Query<DeviceStatusQuery>,
) -> Response {
    if query.device_id.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "device_id required"})))
            .into_response();
    }
    let platform = query.platform.as_deref().unwrap_or("windows");
    let device = match devices::get_or_create(&state.engine.db, &query.device_id, platform).await {
        Ok(device) => device,
        Err(e) => return error_response(e),
    };
    let verdict = state.engine.gate.verdict().await;
    Json(json!({
        "is_banned": device.banned,
        "ban_reason": device.ban_reason.unwrap_or_default(),
        "notice": device.notice,
        "is_blocked": verdict.is_blocked,
        "block_reason": verdict.block_reason,
        "block_reset_time": verdict.block_reset_time,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct DeviceNoticeRequest {
    pub device_id: String,
    pub notice: String,
}

/// POST /api/device/notice
pub async fn device_notice(
    State(state): State<AppState>,
    Json(body): Json<DeviceNoticeRequest>,
) -> Response {
    if body.device_id.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "device_id required"})))
            .into_response();
    }
    match devices::update_notice(&state.engine.db, &body.device_id, &body.notice).await {
        Ok(()) => Json(json!({"message": "Notice updated"})).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ErrorReportRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub error: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// POST /api/error — client post-mortem reports.
pub async fn error_report(
    State(state): State<AppState>,
    Json(body): Json<ErrorReportRequest>,
) -> Response {
    if body.error.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "error text required"})))
            .into_response();
    }
    let result = errors::save(
        &state.engine.db,
        body.conversation_id.as_deref(),
        &body.error,
        body.device_id.as_deref(),
        body.platform.as_deref(),
        body.version.as_deref(),
    )
    .await;
    match result {
        Ok(()) => Json(json!({"message": "Error recorded"})).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/events — dashboard SSE fed by the event broker.
///
/// Sends an initial snapshot of every channel, then streams published
/// events until the client disconnects.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let engine = state.engine.clone();
    let (id, rx) = engine.broker.subscribe();

    // Initial snapshot so a fresh dashboard paints immediately.
    engine.publish_stats().await;
    engine.publish_history().await;
    engine.publish_dialogues().await;
    engine.publish_usage().await;
    engine.publish_apis().await;

    let stream = futures::stream::unfold((rx, engine, id), |(mut rx, engine, id)| async move {
        match rx.recv().await {
            Some(message) => {
                let event = Event::default().event(message.event).data(message.data);
                Some((Ok(event), (rx, engine, id)))
            }
            None => {
                engine.broker.unsubscribe(id);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub(crate) fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_len).collect();
    format!("{cut}...")
}
