// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the Tideway gateway.
//!
//! Configuration is loaded from TOML files following the XDG hierarchy with
//! environment variable overrides, then validated. The token block also
//! assembles the upstream session cookie — the one credential this gateway
//! carries.

pub mod cookie;
pub mod loader;
pub mod model;
pub mod validation;

pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::TidewayConfig;
pub use validation::{validate_config, ConfigError};

/// Load from the default hierarchy and validate, collecting all errors.
pub fn load_and_validate() -> Result<TidewayConfig, tideway_core::TidewayError> {
    let config = load_config().map_err(|e| tideway_core::TidewayError::Config(e.to_string()))?;
    validate_config(&config).map_err(|errors| {
        let joined = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        tideway_core::TidewayError::Config(joined)
    })?;
    Ok(config)
}
