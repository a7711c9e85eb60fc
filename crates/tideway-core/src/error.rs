// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Tideway gateway.

use thiserror::Error;

/// The primary error type used across all Tideway crates.
///
/// Ingress handlers map these variants onto HTTP status codes and WebSocket
/// error frames; the mapping is documented on each variant.
#[derive(Debug, Error)]
pub enum TidewayError {
    /// Configuration errors (invalid TOML, missing required fields). Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (connection, query failure, constraint violation).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Upstream protocol errors (non-2xx, SSE `error` event, malformed response). Surfaces as 500.
    #[error("upstream error: {message}")]
    Upstream {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// MCP connection or JSON-RPC errors. Suppressed during initialization;
    /// dialogues fall back to the built-in tool list.
    #[error("mcp error: {message}")]
    Mcp {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transport-level errors on an ingress channel (bind failure, broken socket).
    #[error("channel error: {message}")]
    Channel {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The usage gate is tripped. Surfaces as 429 / `usage_blocked` frame.
    #[error("usage blocked: {reason}")]
    UsageBlocked {
        reason: String,
        reset_time: Option<String>,
    },

    /// The admission pool is at capacity. Surfaces as 503 / `error` frame;
    /// the dialogue record is marked `send_failed`.
    #[error("server busy, try again later")]
    Overloaded,

    /// The requesting device is banned. Surfaces as a `banned` frame.
    #[error("device banned: {reason}")]
    Banned { reason: String },

    /// The client version is below the configured minimum. Surfaces as a
    /// `version_outdated` frame followed by connection close.
    #[error("client version {current} is below required {required}")]
    VersionOutdated { current: String, required: String },

    /// Malformed or empty client input. Surfaces as 400 / `error` frame.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors. Surfaces as 500.
    #[error("internal error: {0}")]
    Internal(String),
}
