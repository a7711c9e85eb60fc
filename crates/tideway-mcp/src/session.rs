// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-connector MCP session manager with a shared tool cache.
//!
//! The manager owns one connection per enabled connector. Initialization is
//! lazy, runs once, and suppresses per-connector failures: a dialogue always
//! proceeds, falling back to the built-in tool list when no connector is
//! ready. Tool lists are cached for five minutes per server; a refresh
//! failure serves the stale cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tideway_config::model::McpConnectorConfig;
use tideway_core::TidewayError;
use tideway_upstream::types::builtin_tools;

use crate::client::{McpClient, McpConnection};
use crate::types::{McpServerInfo, McpToolDefinition};

/// How long a cached tool list stays fresh.
const TOOL_CACHE_TTL: Duration = Duration::from_secs(300);

struct CachedTools {
    fetched_at: Instant,
    tools: Vec<McpToolDefinition>,
}

/// Owns the MCP connections and the per-server tool cache.
pub struct McpSessionManager {
    client: McpClient,
    connectors: Vec<McpConnectorConfig>,
    connections: RwLock<HashMap<String, Arc<McpConnection>>>,
    tool_cache: RwLock<HashMap<String, CachedTools>>,
    init_lock: Mutex<bool>,
    cache_ttl: Duration,
}

impl McpSessionManager {
    pub fn new(client: McpClient, connectors: Vec<McpConnectorConfig>) -> Self {
        Self {
            client,
            connectors,
            connections: RwLock::new(HashMap::new()),
            tool_cache: RwLock::new(HashMap::new()),
            init_lock: Mutex::new(false),
            cache_ttl: TOOL_CACHE_TTL,
        }
    }

    #[cfg(test)]
    fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Connector config by server uuid (enabled or not).
    pub fn connector(&self, uuid: &str) -> Option<&McpConnectorConfig> {
        self.connectors.iter().find(|c| c.uuid == uuid)
    }

    /// Dial and initialize every enabled connector, once.
    ///
    /// Per-connector failures are logged and suppressed; the gateway keeps
    /// serving dialogues with built-in tools only.
    pub async fn ensure_initialized(&self) {
        let mut initialized = self.init_lock.lock().await;
        if *initialized {
            return;
        }

        let enabled: Vec<McpConnectorConfig> = self
            .connectors
            .iter()
            .filter(|c| c.enabled)
            .cloned()
            .collect();
        if enabled.is_empty() {
            debug!("no enabled MCP connectors");
            *initialized = true;
            return;
        }
        info!(count = enabled.len(), "initializing MCP sessions");

        let mut handles = Vec::new();
        for connector in enabled {
            let client = self.client.clone();
            handles.push(tokio::spawn(async move {
                let server = McpServerInfo {
                    uuid: connector.uuid.clone(),
                    name: connector.name.clone(),
                    url: connector.url.clone().unwrap_or_default(),
                };
                let connection = client.connect(server).await?;
                connection.initialize().await?;
                let tools = connection.list_tools().await?;
                Ok::<_, TidewayError>((connector.uuid, connection, tools))
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Ok((uuid, connection, tools))) => {
                    info!(server = uuid.as_str(), tools = tools.len(), "MCP connector ready");
                    self.connections
                        .write()
                        .await
                        .insert(uuid.clone(), Arc::new(connection));
                    self.tool_cache.write().await.insert(
                        uuid,
                        CachedTools {
                            fetched_at: Instant::now(),
                            tools,
                        },
                    );
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "MCP connector initialization failed (continuing without it)");
                }
                Err(e) => {
                    warn!(error = %e, "MCP connector task panicked");
                }
            }
        }

        *initialized = true;
    }

    /// The tool list to carry on a completion request.
    ///
    /// MCP tools from every ready server plus the two built-ins; with no MCP
    /// tools available the list is exactly the two built-ins.
    pub async fn tools_for_request(&self) -> Vec<Value> {
        let mut tools: Vec<Value> = Vec::new();
        let connections = self.connections.read().await;
        for (uuid, connection) in connections.iter() {
            let cached = self.cached_tools(uuid).await;
            let fresh = match cached {
                Some((tools, age)) if age < self.cache_ttl => Some(tools),
                stale => match connection.list_tools().await {
                    Ok(tools) => {
                        self.tool_cache.write().await.insert(
                            uuid.clone(),
                            CachedTools {
                                fetched_at: Instant::now(),
                                tools: tools.clone(),
                            },
                        );
                        Some(tools)
                    }
                    Err(e) => {
                        warn!(server = uuid.as_str(), error = %e,
                              "tool list refresh failed, serving cached tools");
                        stale.map(|(tools, _)| tools)
                    }
                },
            };
            if let Some(server_tools) = fresh {
                for tool in server_tools {
                    if let Ok(value) = serde_json::to_value(&tool) {
                        tools.push(value);
                    }
                }
            }
        }
        drop(connections);

        tools.extend(builtin_tools());
        tools
    }

    async fn cached_tools(&self, uuid: &str) -> Option<(Vec<McpToolDefinition>, Duration)> {
        let cache = self.tool_cache.read().await;
        cache
            .get(uuid)
            .map(|c| (c.tools.clone(), c.fetched_at.elapsed()))
    }

    /// Invoke a tool on its live connection.
    pub async fn call_tool(
        &self,
        server_uuid: &str,
        name: &str,
        arguments: Value,
    ) -> Result<Value, TidewayError> {
        let connection = {
            let connections = self.connections.read().await;
            connections.get(server_uuid).cloned()
        };
        let connection = connection.ok_or_else(|| TidewayError::Mcp {
            message: format!("MCP connection not found: {server_uuid}"),
            source: None,
        })?;
        connection.call_tool(name, arguments).await
    }

    /// Cached tool definitions per server, for the bootstrap stream.
    pub async fn cached_tool_map(&self) -> HashMap<String, Vec<McpToolDefinition>> {
        let cache = self.tool_cache.read().await;
        cache
            .iter()
            .map(|(uuid, cached)| (uuid.clone(), cached.tools.clone()))
            .collect()
    }

    /// Status snapshot for diagnostics endpoints.
    pub async fn status(&self) -> Value {
        let connections = self.connections.read().await;
        let mut sessions = Vec::new();
        for (uuid, connection) in connections.iter() {
            sessions.push(serde_json::json!({
                "uuid": uuid,
                "server_name": connection.server().name,
                "state": connection.state().await.to_string(),
            }));
        }
        let cache = self.tool_cache.read().await;
        let total_tools: usize = cache.values().map(|c| c.tools.len()).sum();
        serde_json::json!({
            "total_sessions": connections.len(),
            "total_tools": total_tools,
            "sessions": sessions,
        })
    }

    /// Close every connection and drop the cache.
    pub async fn shutdown(&self) {
        info!("shutting down MCP sessions");
        let mut connections = self.connections.write().await;
        for (_, connection) in connections.drain() {
            connection.close().await;
        }
        self.tool_cache.write().await.clear();
    }

    #[cfg(test)]
    pub(crate) async fn test_seed_cache(&self, uuid: &str, tools: Vec<McpToolDefinition>) {
        self.tool_cache.write().await.insert(
            uuid.to_string(),
            CachedTools {
                fetched_at: Instant::now(),
                tools,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::normalize_tool;

    fn manager_without_connectors() -> McpSessionManager {
        McpSessionManager::new(McpClient::new("org-1", "sessionKey=sk"), vec![])
    }

    #[tokio::test]
    async fn no_connectors_yields_exactly_the_builtins() {
        let manager = manager_without_connectors();
        manager.ensure_initialized().await;
        let tools = manager.tools_for_request().await;
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0]["type"], "web_search_v0");
        assert_eq!(tools[1]["type"], "artifacts_v0");
    }

    #[tokio::test]
    async fn failed_connector_is_suppressed() {
        // Connector points at a dead address; initialization must not error.
        let manager = McpSessionManager::new(
            McpClient::new("org-1", "sessionKey=sk").with_ws_base("ws://127.0.0.1:1".to_string()),
            vec![McpConnectorConfig {
                name: "dead".into(),
                uuid: "srv-dead".into(),
                enabled: true,
                url: None,
            }],
        );
        manager.ensure_initialized().await;
        let tools = manager.tools_for_request().await;
        assert_eq!(tools.len(), 2, "dialogues proceed with built-ins only");
    }

    #[tokio::test]
    async fn cached_tools_surface_ahead_of_builtins() {
        let manager = manager_without_connectors().with_cache_ttl(Duration::from_secs(300));
        let server = McpServerInfo {
            uuid: "srv-1".into(),
            name: "Shell".into(),
            url: String::new(),
        };
        let tool = normalize_tool(
            &serde_json::json!({"name": "run", "inputSchema": {}}),
            &server,
        )
        .unwrap();
        manager.test_seed_cache("srv-1", vec![tool]).await;

        let map = manager.cached_tool_map().await;
        assert_eq!(map["srv-1"].len(), 1);
        assert_eq!(map["srv-1"][0].name, "run");
    }

    #[tokio::test]
    async fn call_tool_without_connection_errors() {
        let manager = manager_without_connectors();
        let err = manager
            .call_tool("srv-missing", "run", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"), "got: {err}");
    }

    #[tokio::test]
    async fn connector_lookup_by_uuid() {
        let manager = McpSessionManager::new(
            McpClient::new("org-1", "c"),
            vec![McpConnectorConfig {
                name: "shell".into(),
                uuid: "srv-1".into(),
                enabled: true,
                url: Some("https://mcp.example/rpc".into()),
            }],
        );
        assert_eq!(manager.connector("srv-1").unwrap().name, "shell");
        assert!(manager.connector("srv-2").is_none());
    }
}
