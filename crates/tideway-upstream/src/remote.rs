// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Remote MCP server listing from the vendor account.
//!
//! The gateway re-exposes the upstream's remote-servers endpoint so clients
//! see the servers actually connected to the account, not the gateway's own
//! connector config. OAuth flows against those servers are out of scope; the
//! credential fields are passed through untouched.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tideway_core::TidewayError;

use crate::client::UpstreamClient;

/// One remote MCP server as reported by the vendor account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteMcpServer {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub custom_oauth_client_id: Option<String>,
    #[serde(default)]
    pub has_custom_oauth_credentials: bool,
    #[serde(default)]
    pub is_authenticated: bool,
}

impl UpstreamClient {
    /// Fetch the remote MCP servers connected to the upstream account.
    pub async fn list_remote_mcp_servers(&self) -> Result<Vec<RemoteMcpServer>, TidewayError> {
        self.pace().await;

        let response = self
            .http()
            .get(self.org_url("/mcp/remote_servers"))
            .header("Cookie", self.cookie().to_string())
            .header("Accept", "application/json, text/plain, */*")
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| TidewayError::Upstream {
                message: format!("remote servers request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if status != reqwest::StatusCode::OK {
            return Err(TidewayError::Upstream {
                message: format!("remote servers returned {status}: {text}"),
                source: None,
            });
        }

        serde_json::from_str(&text).map_err(|e| TidewayError::Upstream {
            message: format!("remote servers response unparseable: {e}"),
            source: Some(Box::new(e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacer::RatePacer;
    use std::sync::Arc;
    use tideway_config::TidewayConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> UpstreamClient {
        let mut config = TidewayConfig::default();
        config.tokens.organization_id = Some("org-test".into());
        config.tokens.session_key = Some("sk-test".into());
        UpstreamClient::new(&config, Arc::new(RatePacer::new(0)))
            .unwrap()
            .with_base_url(base_url.to_string())
    }

    #[tokio::test]
    async fn lists_account_servers_with_credential_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/organizations/org-test/mcp/remote_servers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "uuid": "srv-1",
                    "name": "Shell",
                    "url": "https://mcp.example/rpc",
                    "created_at": "2026-05-01T00:00:00Z",
                    "updated_at": "2026-06-01T00:00:00Z",
                    "custom_oauth_client_id": null,
                    "has_custom_oauth_credentials": false,
                    "is_authenticated": true
                }
            ])))
            .mount(&server)
            .await;

        let servers = test_client(&server.uri())
            .list_remote_mcp_servers()
            .await
            .unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].uuid, "srv-1");
        assert_eq!(servers[0].name, "Shell");
        assert!(servers[0].is_authenticated);
        assert!(!servers[0].has_custom_oauth_credentials);
        assert_eq!(servers[0].created_at.as_deref(), Some("2026-05-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn sparse_entries_fill_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([{"uuid": "srv-2", "name": "Bare"}])),
            )
            .mount(&server)
            .await;

        let servers = test_client(&server.uri())
            .list_remote_mcp_servers()
            .await
            .unwrap();
        assert_eq!(servers[0].url, "");
        assert!(servers[0].created_at.is_none());
        assert!(!servers[0].is_authenticated);
    }

    #[tokio::test]
    async fn non_200_surfaces_the_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let err = test_client(&server.uri())
            .list_remote_mcp_servers()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("403"), "got: {err}");
    }
}
