// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SSE bootstrap discovery: the alternative tool-discovery path used when a
//! WebSocket handshake is unavailable.
//!
//! Emits `server_base` events (one per server), `tools` events (grouped per
//! server), then a final `completed` event. The data comes from the session
//! manager's shared tool cache, so both discovery paths agree.

use serde_json::Value;

use crate::session::McpSessionManager;

/// One SSE event of the bootstrap stream: `(event name, data payload)`.
pub type BootstrapEvent = (&'static str, Value);

/// Build the full bootstrap event sequence from the shared cache.
pub async fn bootstrap_events(manager: &McpSessionManager) -> Vec<BootstrapEvent> {
    let cached = manager.cached_tool_map().await;
    let mut events: Vec<BootstrapEvent> = Vec::new();

    let mut server_uuids: Vec<&String> = cached.keys().collect();
    server_uuids.sort();

    for uuid in &server_uuids {
        let tools = &cached[*uuid];
        let (name, url) = tools
            .first()
            .map(|t| (t.integration_name.clone(), t.mcp_server_url.clone()))
            .or_else(|| {
                manager
                    .connector(uuid)
                    .map(|c| (c.name.clone(), c.url.clone().unwrap_or_default()))
            })
            .unwrap_or_default();
        events.push((
            "server_base",
            serde_json::json!({"uuid": uuid, "name": name, "url": url}),
        ));
    }

    for uuid in &server_uuids {
        let tools: Vec<Value> = cached[*uuid]
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "inputSchema": t.input_schema,
                })
            })
            .collect();
        events.push((
            "tools",
            serde_json::json!({"server_uuid": uuid, "tools": tools}),
        ));
    }

    events.push(("completed", serde_json::json!({})));
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::McpClient;
    use crate::types::{normalize_tool, McpServerInfo};

    #[tokio::test]
    async fn empty_cache_emits_only_completed() {
        let manager = McpSessionManager::new(McpClient::new("org-1", "c"), vec![]);
        let events = bootstrap_events(&manager).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "completed");
    }

    #[tokio::test]
    async fn events_follow_server_base_tools_completed_order() {
        let manager = McpSessionManager::new(McpClient::new("org-1", "c"), vec![]);
        let server = McpServerInfo {
            uuid: "srv-1".into(),
            name: "Shell".into(),
            url: "https://mcp.example/rpc".into(),
        };
        let tool = normalize_tool(
            &serde_json::json!({
                "name": "run",
                "description": "Run a command",
                "inputSchema": {"type": "object"}
            }),
            &server,
        )
        .unwrap();
        manager.test_seed_cache("srv-1", vec![tool]).await;

        let events = bootstrap_events(&manager).await;
        let names: Vec<&str> = events.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["server_base", "tools", "completed"]);

        assert_eq!(events[0].1["uuid"], "srv-1");
        assert_eq!(events[0].1["name"], "Shell");
        assert_eq!(events[1].1["server_uuid"], "srv-1");
        assert_eq!(events[1].1["tools"][0]["name"], "run");
        assert_eq!(events[1].1["tools"][0]["inputSchema"]["type"], "object");
    }
}
