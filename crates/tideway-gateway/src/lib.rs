// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! axum ingress for the Tideway gateway.
//!
//! Binds every transport to the shared dialogue pipeline: the long-HTTP
//! dialogue endpoint, the SSE stream, the one-shot WebSocket, the persistent
//! multiplexed WebSocket, the OpenAI/Ollama shims, the monitoring API, and
//! the MCP reverse proxy and bootstrap routes.

pub mod dialogue;
pub mod handlers;
pub mod mcp_routes;
pub mod mux;
pub mod server;
pub mod shims;

pub use server::{start_server, AppState};
