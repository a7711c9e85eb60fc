// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MCP routes: the reverse WebSocket proxy, the SSE bootstrap stream, and
//! the remote-servers listing.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
    Json,
};
use futures::{SinkExt, Stream, StreamExt};
use serde_json::json;
use tracing::{debug, info, warn};

use tideway_mcp::bootstrap::bootstrap_events;
use tideway_mcp::proxy::forward_frame;

use crate::handlers::error_response;
use crate::server::AppState;

/// GET /api/ws/organizations/{org_id}/mcp/servers/{server_id}/
///
/// Hosts a non-native MCP server as if it were vendor-native: each inbound
/// JSON-RPC text frame is forwarded verbatim as an HTTP POST to the
/// connector's backend URL, and the response bytes are written back.
pub async fn mcp_proxy(
    State(state): State<AppState>,
    Path((org_id, server_id)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Response {
    debug!(org = org_id.as_str(), server = server_id.as_str(), "MCP proxy request");
    let Some(connector) = state.engine.mcp.connector(&server_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "MCP connector not found"})),
        )
            .into_response();
    };
    let Some(backend_url) = connector.url.clone() else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "MCP connector has no backend URL"})),
        )
            .into_response();
    };
    let name = connector.name.clone();
    let http = state.proxy_http.clone();
    ws.on_upgrade(move |socket| handle_proxy_socket(socket, http, backend_url, name))
}

async fn handle_proxy_socket(
    socket: WebSocket,
    http: reqwest::Client,
    backend_url: String,
    server_name: String,
) {
    info!(server = server_name.as_str(), "MCP proxy session established");
    let (mut sender, mut receiver) = socket.split();

    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "MCP proxy read error");
                break;
            }
        };
        match frame {
            Message::Text(text) => {
                let response = forward_frame(&http, &backend_url, &text).await;
                if sender.send(Message::Text(response.into())).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            Message::Ping(payload) => {
                if sender.send(Message::Pong(payload)).await.is_err() {
                    break;
                }
            }
            other => {
                warn!(?other, "MCP proxy ignoring non-text frame");
            }
        }
    }
    info!(server = server_name.as_str(), "MCP proxy session closed");
}

/// GET /api/organizations/{org_id}/mcp/bootstrap
///
/// The SSE bootstrap discovery stream: `server_base` events, `tools`
/// events, then `completed`.
pub async fn mcp_bootstrap(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    debug!(org = org_id.as_str(), "MCP bootstrap stream");
    state.engine.mcp.ensure_initialized().await;
    let events = bootstrap_events(&state.engine.mcp).await;
    let stream = futures::stream::iter(events.into_iter().map(|(event, data)| {
        Ok(Event::default().event(event).data(data.to_string()))
    }));
    Sse::new(stream)
}

/// GET /api/organizations/{org_id}/mcp/remote_servers
///
/// Proxies the upstream account's remote-servers listing, so clients see the
/// servers actually connected to the account rather than the gateway's own
/// connector config. Credential fields pass through untouched.
pub async fn mcp_remote_servers(State(state): State<AppState>) -> Response {
    match state.engine.upstream.list_remote_mcp_servers().await {
        Ok(servers) => Json(servers).into_response(),
        Err(e) => {
            warn!(error = %e, "remote MCP server listing failed");
            error_response(e)
        }
    }
}
