// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MCP (Model Context Protocol) integration for the Tideway gateway.
//!
//! Three pieces live here:
//! - the JSON-RPC-over-WebSocket client that dials the vendor's MCP tunnel
//!   and performs the initialize handshake,
//! - the session manager that owns one connection per enabled connector and
//!   caches normalized tool lists,
//! - the reverse proxy core that bridges a vendor-facing WebSocket to an
//!   HTTP POST JSON-RPC backend.

pub mod bootstrap;
pub mod client;
pub mod proxy;
pub mod session;
pub mod types;

pub use client::{McpClient, McpConnection};
pub use session::McpSessionManager;
pub use types::{ConnectionState, McpToolDefinition};
