// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire types for the MCP JSON-RPC channel and tool normalization.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP protocol version sent in the initialize handshake.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Lifecycle of one connector's WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Dialing,
    Connected,
    Initializing,
    Ready,
    Error,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Dialing => "dialing",
            ConnectionState::Connected => "connected",
            ConnectionState::Initializing => "initializing",
            ConnectionState::Ready => "ready",
            ConnectionState::Error => "error",
            ConnectionState::Closed => "closed",
        };
        write!(f, "{name}")
    }
}

/// A JSON-RPC 2.0 request frame. Notifications omit the id.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

impl JsonRpcRequest {
    pub fn call(id: i64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params: Some(params),
            id: Some(id),
        }
    }

    pub fn notification(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params: None,
            id: None,
        }
    }
}

/// A JSON-RPC 2.0 response or server-initiated notification frame.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcFrame {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcFrame {
    /// A frame without an id is a notification, not a call response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Identity of an MCP connector as configured plus its vendor-side url.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerInfo {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub url: String,
}

/// A normalized tool definition as carried in completion requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub input_schema: Value,
    pub integration_name: String,
    pub mcp_server_uuid: String,
    #[serde(default)]
    pub mcp_server_url: String,
    pub needs_approval: bool,
    pub backend_execution: bool,
}

/// Normalize one raw `tools/list` entry for a given server.
///
/// Connectors are pre-approved by configuration, so `needs_approval` is
/// always false.
pub fn normalize_tool(raw: &Value, server: &McpServerInfo) -> Option<McpToolDefinition> {
    let name = raw.get("name")?.as_str()?.to_string();
    Some(McpToolDefinition {
        name,
        description: raw
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or_default()
            .to_string(),
        input_schema: raw.get("inputSchema").cloned().unwrap_or(Value::Null),
        integration_name: server.name.clone(),
        mcp_server_uuid: server.uuid.clone(),
        mcp_server_url: server.url.clone(),
        needs_approval: false,
        backend_execution: false,
    })
}
