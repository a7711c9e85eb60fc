// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde
//! attributes: required credentials, positive pool sizes, unique style keys.
//! Validation failure is fatal at startup.

use std::collections::HashSet;

use thiserror::Error;

use crate::model::TidewayConfig;

/// A single configuration validation failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{message}")]
    Validation { message: String },
}

impl ConfigError {
    fn new(message: impl Into<String>) -> Self {
        ConfigError::Validation {
            message: message.into(),
        }
    }
}

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &TidewayConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config
        .tokens
        .organization_id
        .as_deref()
        .unwrap_or("")
        .trim()
        .is_empty()
    {
        errors.push(ConfigError::new(
            "tokens.organization_id is required (copy the UUID after /organizations/ in the claude.ai URL)",
        ));
    }

    if config
        .tokens
        .session_key
        .as_deref()
        .unwrap_or("")
        .trim()
        .is_empty()
    {
        errors.push(ConfigError::new(
            "tokens.session_key is required (the sessionKey cookie from a logged-in browser)",
        ));
    }

    if config.limits.thread_num == 0 {
        errors.push(ConfigError::new("limits.thread_num must be at least 1"));
    }

    if config.server.port == 0 {
        errors.push(ConfigError::new("server.port must be non-zero"));
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::new("storage.database_path must not be empty"));
    }

    let mut seen_styles = HashSet::new();
    for style in &config.styles {
        if !seen_styles.insert(style.key.as_str()) {
            errors.push(ConfigError::new(format!(
                "duplicate style key `{}`",
                style.key
            )));
        }
    }

    for connector in &config.mcp_connectors {
        if connector.uuid.trim().is_empty() {
            errors.push(ConfigError::new(format!(
                "mcp connector `{}` has an empty uuid",
                connector.name
            )));
        }
    }

    if let Some(ref min) = config.client.min_client_version {
        if !min.is_empty() && min.split('.').any(|p| p.parse::<u64>().is_err()) {
            errors.push(ConfigError::new(format!(
                "client.min_client_version `{min}` is not a dotted numeric version"
            )));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{McpConnectorConfig, StyleEntry};

    fn valid_config() -> TidewayConfig {
        let mut config = TidewayConfig::default();
        config.tokens.organization_id = Some("11111111-2222-3333-4444-555555555555".into());
        config.tokens.session_key = Some("sk-ant-sid01-xyz".into());
        config
    }

    #[test]
    fn valid_config_passes() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn missing_credentials_collect_both_errors() {
        let config = TidewayConfig::default();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].to_string().contains("organization_id"));
        assert!(errors[1].to_string().contains("session_key"));
    }

    #[test]
    fn zero_thread_num_rejected() {
        let mut config = valid_config();
        config.limits.thread_num = 0;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.to_string().contains("thread_num")));
    }

    #[test]
    fn duplicate_style_keys_rejected() {
        let mut config = valid_config();
        for _ in 0..2 {
            config.styles.push(StyleEntry {
                key: "concise".into(),
                name: "Concise".into(),
                summary: String::new(),
                prompt: "p".into(),
            });
        }
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.to_string().contains("duplicate style")));
    }

    #[test]
    fn empty_connector_uuid_rejected() {
        let mut config = valid_config();
        config.mcp_connectors.push(McpConnectorConfig {
            name: "shell".into(),
            uuid: " ".into(),
            enabled: true,
            url: None,
        });
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.to_string().contains("empty uuid")));
    }

    #[test]
    fn bad_min_client_version_rejected() {
        let mut config = valid_config();
        config.client.min_client_version = Some("1.x.0".into());
        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.to_string().contains("min_client_version")));
    }
}
