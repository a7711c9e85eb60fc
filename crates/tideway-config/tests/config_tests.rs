// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Tideway configuration system.

use tideway_config::{load_config_from_str, validate_config};

/// Valid TOML with all known sections deserializes successfully.
#[test]
fn valid_toml_deserializes_into_tideway_config() {
    let toml = r#"
log_level = "debug"
default_model = "sonnet-4.5"
default_style = "concise"
system_prompt = "Answer in English."

[tokens]
organization_id = "11111111-2222-3333-4444-555555555555"
session_key = "sk-ant-sid01-abc"
cf_clearance = "cfc"
device_id = "dev-1"

[proxy]
enable = true
http = "http://127.0.0.1:7890"
https = "http://127.0.0.1:7890"

[server]
host = "127.0.0.1"
port = 5100
api_endpoint = "http://localhost:5100"

[limits]
thread_num = 3
max_tpm = 100000
max_rpm = 50
max_rpd = 3000
request_interval_ms = 500
usage_limit_five_hour = 90
usage_limit_seven_day = 85

[client]
min_client_version = "1.2.0"

[[client.version_changes]]
version = "1.2.0"
date = "2026-05-01"
notes = ["persistent websocket ack protocol"]

[storage]
database_path = "/var/lib/tideway/tideway.db"

[[models]]
id = "claude-sonnet-4.5"

[[models]]
id = "claude-opus-4.1"

[[styles]]
key = "concise"
name = "Concise"
summary = "Shorter responses & more messages"
prompt = "Keep replies short."

[[mcp_connectors]]
name = "shell"
uuid = "fc8fdf60-9a35-43ff-97e0-a5ca4b0047ea"
enabled = true
"#;

    let config = load_config_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.server.port, 5100);
    assert_eq!(config.limits.thread_num, 3);
    assert_eq!(config.limits.usage_limit_five_hour, 90);
    assert_eq!(config.client.min_client_version.as_deref(), Some("1.2.0"));
    assert_eq!(config.models.len(), 2);
    assert_eq!(config.styles.len(), 1);
    assert_eq!(config.enabled_connectors().len(), 1);
    assert_eq!(config.latest_version(), "1.2.0");
    assert_eq!(config.organization_id(), "11111111-2222-3333-4444-555555555555");

    validate_config(&config).expect("valid config should validate");
}

/// Unknown keys in any section are rejected at load time.
#[test]
fn unknown_field_in_limits_produces_error() {
    let toml = r#"
[limits]
thead_num = 5
"#;
    let err = load_config_from_str(toml).expect_err("should reject unknown field");
    let text = format!("{err}");
    assert!(
        text.contains("unknown field") || text.contains("thead_num"),
        "error should mention the bad key, got: {text}"
    );
}

/// Missing optional sections fall back to defaults without error.
#[test]
fn missing_optional_sections_use_defaults() {
    let config = load_config_from_str("").expect("empty TOML should use defaults");
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 5000);
    assert_eq!(config.limits.thread_num, 5);
    assert!(config.tokens.session_key.is_none());
    assert!(config.mcp_connectors.is_empty());
}

/// A config without credentials deserializes but fails validation.
#[test]
fn missing_credentials_fail_validation_not_parsing() {
    let config = load_config_from_str("[server]\nport = 6000\n").unwrap();
    let errors = validate_config(&config).unwrap_err();
    assert_eq!(errors.len(), 2);
}

/// Cookie assembly from a loaded token block is deterministic and ordered.
#[test]
fn cookie_assembly_from_loaded_config() {
    let toml = r#"
[tokens]
organization_id = "org-9"
session_key = "sk-1"
cf_bm = "bm-1"
"#;
    let config = load_config_from_str(toml).unwrap();
    assert_eq!(
        config.tokens.build_cookie(),
        "sessionKey=sk-1; __cf_bm=bm-1; lastActiveOrg=org-9"
    );
}
