// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! JSON-RPC client over the vendor's MCP WebSocket tunnel.
//!
//! Each connection is used lock-step: one outstanding request at a time,
//! serialized by a socket mutex, matching the upstream tunnel's behavior.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use tideway_core::TidewayError;

use crate::types::{
    normalize_tool, ConnectionState, JsonRpcFrame, JsonRpcRequest, McpServerInfo,
    McpToolDefinition, MCP_PROTOCOL_VERSION,
};

/// Default WebSocket base of the vendor MCP tunnel.
const DEFAULT_WS_BASE: &str = "wss://claude.ai";

/// How long to wait for the optional unsolicited frame after the socket opens.
const DRAIN_DEADLINE: Duration = Duration::from_secs(1);

/// Read deadline for handshake and call responses.
const READ_DEADLINE: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dialer for MCP tunnel connections.
#[derive(Clone)]
pub struct McpClient {
    org_id: String,
    cookie: String,
    ws_base: String,
}

impl McpClient {
    pub fn new(org_id: impl Into<String>, cookie: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            cookie: cookie.into(),
            ws_base: DEFAULT_WS_BASE.to_string(),
        }
    }

    /// Override the WebSocket base (local mock servers).
    pub fn with_ws_base(mut self, base: impl Into<String>) -> Self {
        self.ws_base = base.into();
        self
    }

    /// Dial the tunnel for one server and return the raw connection.
    pub async fn connect(&self, server: McpServerInfo) -> Result<McpConnection, TidewayError> {
        let url = format!(
            "{}/api/ws/organizations/{}/mcp/servers/{}/",
            self.ws_base, self.org_id, server.uuid
        );
        debug!(server = server.name.as_str(), url = url.as_str(), "dialing MCP tunnel");

        let mut request = url
            .clone()
            .into_client_request()
            .map_err(|e| TidewayError::Mcp {
                message: format!("invalid MCP url {url}: {e}"),
                source: Some(Box::new(e)),
            })?;
        {
            let headers = request.headers_mut();
            let mut insert = |name: &'static str, value: &str| {
                if let Ok(v) = value.parse() {
                    headers.insert(name, v);
                }
            };
            insert("Origin", "https://claude.ai");
            insert("Cookie", &self.cookie);
            insert("Sec-WebSocket-Protocol", "mcp");
            insert(
                "User-Agent",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/141.0.0.0 Safari/537.36",
            );
            insert("Cache-Control", "no-cache");
        }

        let (stream, response) = tokio::time::timeout(
            Duration::from_secs(30),
            tokio_tungstenite::connect_async(request),
        )
        .await
        .map_err(|_| TidewayError::Timeout {
            duration: Duration::from_secs(30),
        })?
        .map_err(|e| TidewayError::Mcp {
            message: format!("websocket dial failed for {}: {e}", server.name),
            source: Some(Box::new(e)),
        })?;

        debug!(status = %response.status(), "MCP tunnel connected");
        Ok(McpConnection {
            server,
            ws: Mutex::new(stream),
            next_id: AtomicI64::new(0),
            state: RwLock::new(ConnectionState::Connected),
        })
    }
}

/// One live MCP tunnel connection.
#[derive(Debug)]
pub struct McpConnection {
    server: McpServerInfo,
    ws: Mutex<WsStream>,
    next_id: AtomicI64,
    state: RwLock<ConnectionState>,
}

impl McpConnection {
    pub fn server(&self) -> &McpServerInfo {
        &self.server
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    /// Perform the MCP initialize handshake.
    ///
    /// Sequence: drain one optional unsolicited frame (1 s deadline), send
    /// `initialize`, read up to two inbound frames (the order of the
    /// `connected` notification and the initialize result is not fixed),
    /// then send `notifications/initialized`.
    pub async fn initialize(&self) -> Result<(), TidewayError> {
        self.set_state(ConnectionState::Initializing).await;
        let result = self.initialize_inner().await;
        match &result {
            Ok(()) => {
                self.set_state(ConnectionState::Ready).await;
                info!(server = self.server.name.as_str(), "MCP initialization completed");
            }
            Err(e) => {
                self.set_state(ConnectionState::Error).await;
                warn!(server = self.server.name.as_str(), error = %e, "MCP initialization failed");
            }
        }
        result
    }

    async fn initialize_inner(&self) -> Result<(), TidewayError> {
        let mut ws = self.ws.lock().await;

        // Some servers emit an unsolicited message right after the upgrade.
        if let Ok(Some(Ok(frame))) = tokio::time::timeout(DRAIN_DEADLINE, ws.next()).await {
            if let Message::Text(text) = frame {
                debug!(bytes = text.len(), "drained unsolicited frame before initialize");
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let init = JsonRpcRequest::call(
            id,
            "initialize",
            serde_json::json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "claude-ai", "version": "0.1.0"},
            }),
        );
        send_frame(&mut ws, &init).await?;

        for _ in 0..2 {
            let frame = read_frame(&mut ws, READ_DEADLINE).await?;
            if frame.method.as_deref() == Some("connected") {
                debug!("received connected notification");
            } else if frame.result.is_some() {
                debug!("received initialize result");
            } else if let Some(error) = frame.error {
                return Err(TidewayError::Mcp {
                    message: format!("initialize rejected: {} ({})", error.message, error.code),
                    source: None,
                });
            }
        }

        send_frame(&mut ws, &JsonRpcRequest::notification("notifications/initialized")).await?;
        Ok(())
    }

    /// Issue `tools/list` and normalize the results for completion requests.
    pub async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, TidewayError> {
        let result = self.request("tools/list", serde_json::json!({})).await?;
        let raw_tools = result
            .get("tools")
            .and_then(|t| t.as_array())
            .ok_or_else(|| TidewayError::Mcp {
                message: "tools/list result has no tools array".into(),
                source: None,
            })?;
        let tools: Vec<McpToolDefinition> = raw_tools
            .iter()
            .filter_map(|raw| normalize_tool(raw, &self.server))
            .collect();
        info!(
            server = self.server.name.as_str(),
            count = tools.len(),
            "discovered MCP tools"
        );
        Ok(tools)
    }

    /// Issue `tools/call` and return the raw result map.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<Value, TidewayError> {
        debug!(server = self.server.name.as_str(), tool = name, "calling MCP tool");
        self.request(
            "tools/call",
            serde_json::json!({"name": name, "arguments": arguments}),
        )
        .await
    }

    /// One lock-step JSON-RPC call: send, then read until a response frame.
    ///
    /// Server-initiated notifications arriving in between are skipped.
    async fn request(&self, method: &str, params: Value) -> Result<Value, TidewayError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut ws = self.ws.lock().await;
        send_frame(&mut ws, &JsonRpcRequest::call(id, method, params)).await?;

        loop {
            let frame = read_frame(&mut ws, READ_DEADLINE).await?;
            if frame.is_notification() {
                continue;
            }
            if let Some(error) = frame.error {
                return Err(TidewayError::Mcp {
                    message: format!("{method} error: {} ({})", error.message, error.code),
                    source: None,
                });
            }
            return frame.result.ok_or_else(|| TidewayError::Mcp {
                message: format!("{method} response has no result"),
                source: None,
            });
        }
    }

    /// Close the socket and mark the connection closed.
    pub async fn close(&self) {
        let mut ws = self.ws.lock().await;
        let _ = ws.close(None).await;
        drop(ws);
        self.set_state(ConnectionState::Closed).await;
    }
}

async fn send_frame(ws: &mut WsStream, request: &JsonRpcRequest) -> Result<(), TidewayError> {
    let text = serde_json::to_string(request).map_err(|e| TidewayError::Mcp {
        message: format!("encode frame failed: {e}"),
        source: Some(Box::new(e)),
    })?;
    ws.send(Message::Text(text.into()))
        .await
        .map_err(|e| TidewayError::Mcp {
            message: format!("send frame failed: {e}"),
            source: Some(Box::new(e)),
        })
}

async fn read_frame(ws: &mut WsStream, deadline: Duration) -> Result<JsonRpcFrame, TidewayError> {
    loop {
        let message = tokio::time::timeout(deadline, ws.next())
            .await
            .map_err(|_| TidewayError::Timeout { duration: deadline })?
            .ok_or_else(|| TidewayError::Mcp {
                message: "connection closed mid-read".into(),
                source: None,
            })?
            .map_err(|e| TidewayError::Mcp {
                message: format!("read frame failed: {e}"),
                source: Some(Box::new(e)),
            })?;
        match message {
            Message::Text(text) => {
                return serde_json::from_str(&text).map_err(|e| TidewayError::Mcp {
                    message: format!("parse frame failed: {e}"),
                    source: Some(Box::new(e)),
                });
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => {
                return Err(TidewayError::Mcp {
                    message: "connection closed by server".into(),
                    source: None,
                });
            }
            _ => continue,
        }
    }
}
