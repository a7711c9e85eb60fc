// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, CORS, and shared state, and serves until the
//! cancellation token fires.

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use tideway_core::TidewayError;
use tideway_engine::Engine;

use crate::{dialogue, handlers, mcp_routes, mux, shims};

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The request-lifecycle engine (sessions, admission, gate, pipeline).
    pub engine: Arc<Engine>,
    /// Optional Prometheus render function for GET /metrics.
    pub prometheus_render: Option<Arc<dyn Fn() -> String + Send + Sync>>,
    /// Plain HTTP client for the MCP reverse proxy backend calls.
    pub proxy_http: reqwest::Client,
}

impl AppState {
    pub fn new(
        engine: Arc<Engine>,
        prometheus_render: Option<Arc<dyn Fn() -> String + Send + Sync>>,
    ) -> Self {
        Self {
            engine,
            prometheus_render,
            proxy_http: reqwest::Client::new(),
        }
    }
}

/// Assemble the full route table.
pub fn build_router(state: AppState) -> Router {
    let chat_routes = Router::new()
        .route("/chat/dialogue/http", post(dialogue::dialogue_http))
        .route("/chat/dialogue/event", get(dialogue::dialogue_event))
        .route("/chat/dialogue/websocket", get(dialogue::dialogue_websocket))
        .route("/chat/dialogue/keepalive/{id}", post(dialogue::keepalive))
        .route("/chat/dialogue/{id}", delete(dialogue::delete_session));

    let data_routes = Router::new().route("/data/websocket/create", get(mux::persistent_websocket));

    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/api/stats", get(handlers::stats))
        .route("/api/usage", get(handlers::usage))
        .route("/api/dialogues", get(handlers::dialogues))
        .route("/api/dialogues/{id}/history", get(handlers::dialogue_history))
        .route(
            "/api/records",
            get(handlers::records_get).post(handlers::records),
        )
        .route("/api/record/{id}", get(handlers::record_detail))
        .route("/api/processing", get(handlers::processing))
        .route("/api/config", get(handlers::config))
        .route("/api/version-changes", get(handlers::version_changes))
        .route("/api/device/status", get(handlers::device_status))
        .route("/api/device/notice", post(handlers::device_notice))
        .route("/api/error", post(handlers::error_report))
        .route("/api/events", get(handlers::events));

    let shim_routes = Router::new()
        .route("/v1/chat/completions", post(shims::openai_chat))
        .route("/v1/models", get(shims::openai_models))
        .route("/api/chat", post(shims::ollama_chat))
        .route("/api/tags", get(shims::ollama_tags));

    let mcp = Router::new()
        .route(
            "/api/ws/organizations/{org_id}/mcp/servers/{server_id}/",
            get(mcp_routes::mcp_proxy),
        )
        .route(
            "/api/organizations/{org_id}/mcp/bootstrap",
            get(mcp_routes::mcp_bootstrap),
        )
        .route(
            "/api/organizations/{org_id}/mcp/remote_servers",
            get(mcp_routes::mcp_remote_servers),
        );

    Router::new()
        .merge(chat_routes)
        .merge(data_routes)
        .merge(api_routes)
        .merge(shim_routes)
        .merge(mcp)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the cancellation token fires.
pub async fn start_server(
    host: &str,
    port: u16,
    state: AppState,
    cancel: CancellationToken,
) -> Result<(), TidewayError> {
    let app = build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TidewayError::Channel {
            message: format!("failed to bind gateway to {addr}: {e}"),
            source: Some(Box::new(e)),
        })?;

    info!(addr = addr.as_str(), "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| TidewayError::Channel {
            message: format!("gateway server error: {e}"),
            source: Some(Box::new(e)),
        })?;

    info!("gateway stopped");
    Ok(())
}
