// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Tideway gateway.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Tideway configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable
/// overrides. All sections are optional and default to sensible values;
/// validation enforces the handful of fields that must be filled in
/// (organization id, session key).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TidewayConfig {
    /// Upstream credential fragments (cookie components).
    #[serde(default)]
    pub tokens: TokensConfig,

    /// Outbound proxy settings.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Listen address and advertised endpoint.
    #[serde(default)]
    pub server: ServerConfig,

    /// Concurrency, pacing and quota limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Client version gate and release notes.
    #[serde(default)]
    pub client: ClientConfig,

    /// SQLite storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Models advertised on the OpenAI/Ollama shims.
    #[serde(default)]
    pub models: Vec<ModelEntry>,

    /// Default model key applied when a request does not name one.
    #[serde(default)]
    pub default_model: Option<String>,

    /// Style presets selectable per request.
    #[serde(default)]
    pub styles: Vec<StyleEntry>,

    /// Default style key; empty means no style payload.
    #[serde(default)]
    pub default_style: Option<String>,

    /// MCP connectors to dial at initialization.
    #[serde(default)]
    pub mcp_connectors: Vec<McpConnectorConfig>,

    /// Optional system-prompt template prefixed to every dialogue prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Upstream cookie fragments, all optional.
///
/// Missing fragments are silently omitted from the assembled cookie; the
/// emission order is fixed (see [`crate::cookie`]) because the upstream is
/// order-sensitive.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TokensConfig {
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub session_key: Option<String>,
    #[serde(default)]
    pub cf_clearance: Option<String>,
    #[serde(default)]
    pub cf_bm: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub anonymous_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub activity_session_id: Option<String>,
    #[serde(default)]
    pub intercom_device_id: Option<String>,
    #[serde(default)]
    pub intercom_session_id: Option<String>,
}

/// Outbound proxy configuration for all upstream HTTP and WebSocket calls.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub http: Option<String>,
    #[serde(default)]
    pub https: Option<String>,
}

/// Listen address configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Endpoint advertised to clients on /api/config.
    #[serde(default)]
    pub api_endpoint: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_endpoint: None,
        }
    }
}

/// Concurrency, pacing and quota limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Admission pool capacity (concurrent upstream completions).
    #[serde(default = "default_thread_num")]
    pub thread_num: usize,
    /// Advertised token-per-minute ceiling.
    #[serde(default)]
    pub max_tpm: i64,
    /// Advertised request-per-minute ceiling.
    #[serde(default)]
    pub max_rpm: i64,
    /// Advertised request-per-day ceiling.
    #[serde(default)]
    pub max_rpd: i64,
    /// Minimum wall-clock gap between outbound upstream calls.
    #[serde(default)]
    pub request_interval_ms: u64,
    /// Five-hour utilization percentage at which the usage gate trips. 0 disables.
    #[serde(default)]
    pub usage_limit_five_hour: i64,
    /// Seven-day utilization percentage at which the usage gate trips. 0 disables.
    #[serde(default)]
    pub usage_limit_seven_day: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            thread_num: default_thread_num(),
            max_tpm: 0,
            max_rpm: 0,
            max_rpd: 0,
            request_interval_ms: 0,
            usage_limit_five_hour: 0,
            usage_limit_seven_day: 0,
        }
    }
}

/// Client version gate and release notes served on /api/version-changes.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Minimum accepted client version (three numeric components). Empty disables the gate.
    #[serde(default)]
    pub min_client_version: Option<String>,
    /// Release notes, newest first.
    #[serde(default)]
    pub version_changes: Vec<VersionChange>,
}

/// One entry of the version-changes list.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VersionChange {
    pub version: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// SQLite storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// A model advertised on the shim model-list endpoints.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModelEntry {
    pub id: String,
    #[serde(default = "default_owned_by")]
    pub owned_by: String,
}

/// A named style preset; when selected, a `personalized_styles` payload is
/// attached to the completion request.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StyleEntry {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub summary: String,
    pub prompt: String,
}

/// One MCP connector the session manager dials at initialization.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct McpConnectorConfig {
    pub name: String,
    pub uuid: String,
    #[serde(default)]
    pub enabled: bool,
    /// Backend JSON-RPC URL for servers the gateway hosts via the reverse
    /// WebSocket proxy. Absent for vendor-native connectors.
    #[serde(default)]
    pub url: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_thread_num() -> usize {
    5
}

fn default_database_path() -> String {
    "tideway.db".to_string()
}

fn default_owned_by() -> String {
    "anthropic".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TidewayConfig {
    /// The organization id, or empty when unset (validation rejects that).
    pub fn organization_id(&self) -> &str {
        self.tokens.organization_id.as_deref().unwrap_or("")
    }

    /// Enabled MCP connectors in declaration order.
    pub fn enabled_connectors(&self) -> Vec<&McpConnectorConfig> {
        self.mcp_connectors.iter().filter(|c| c.enabled).collect()
    }

    /// Look up a style preset by key.
    pub fn style(&self, key: &str) -> Option<&StyleEntry> {
        self.styles.iter().find(|s| s.key == key)
    }

    /// Latest version from the changes list, or "1.0.0" when none recorded.
    pub fn latest_version(&self) -> String {
        self.client
            .version_changes
            .first()
            .map(|c| c.version.clone())
            .unwrap_or_else(|| "1.0.0".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = TidewayConfig::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.limits.thread_num, 5);
        assert_eq!(config.storage.database_path, "tideway.db");
        assert_eq!(config.log_level, "info");
        assert!(config.mcp_connectors.is_empty());
    }

    #[test]
    fn enabled_connectors_filters_disabled() {
        let mut config = TidewayConfig::default();
        config.mcp_connectors = vec![
            McpConnectorConfig {
                name: "on".into(),
                uuid: "u1".into(),
                enabled: true,
                url: None,
            },
            McpConnectorConfig {
                name: "off".into(),
                uuid: "u2".into(),
                enabled: false,
                url: None,
            },
        ];
        let enabled = config.enabled_connectors();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name, "on");
    }

    #[test]
    fn style_lookup_by_key() {
        let mut config = TidewayConfig::default();
        config.styles.push(StyleEntry {
            key: "concise".into(),
            name: "Concise".into(),
            summary: "Shorter responses".into(),
            prompt: "Keep it short.".into(),
        });
        assert!(config.style("concise").is_some());
        assert!(config.style("verbose").is_none());
    }

    #[test]
    fn latest_version_falls_back() {
        let config = TidewayConfig::default();
        assert_eq!(config.latest_version(), "1.0.0");
    }
}
