// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tideway serve` command implementation.
//!
//! Wires the full gateway: SQLite store, upstream client with the rate
//! pacer, MCP session manager, request-lifecycle engine, background tasks
//! (session sweeper, usage poller), Prometheus exporter, and the axum
//! server. Supports graceful shutdown via signal handlers.

use std::sync::Arc;

use tracing::{info, warn};

use tideway_config::TidewayConfig;
use tideway_core::TidewayError;
use tideway_engine::{AdmissionPool, Engine, EventBroker, SessionManager, UsageGate};
use tideway_gateway::{start_server, AppState};
use tideway_mcp::{McpClient, McpSessionManager};
use tideway_store::Database;
use tideway_upstream::{RatePacer, UpstreamClient};

use crate::shutdown;

/// Runs the `tideway serve` command.
pub async fn run_serve(config: TidewayConfig) -> Result<(), TidewayError> {
    init_tracing(&config.log_level);
    info!("starting tideway serve");
    let config = Arc::new(config);

    // Storage, with the stats counters reloaded from terminal row counts.
    let db = Arc::new(Database::open(&config.storage.database_path).await?);
    if let Err(e) = db.load_stats().await {
        warn!(error = %e, "stats reload failed, counters start at zero");
    }

    // Upstream client behind the process-wide rate pacer.
    let pacer = Arc::new(RatePacer::new(config.limits.request_interval_ms));
    let upstream = Arc::new(UpstreamClient::new(&config, pacer)?);

    // MCP sessions: dialed lazily on the first dialogue.
    let mcp = Arc::new(McpSessionManager::new(
        McpClient::new(config.organization_id(), config.tokens.build_cookie()),
        config.mcp_connectors.clone(),
    ));

    let sessions = Arc::new(SessionManager::new());
    let admission = Arc::new(AdmissionPool::new(config.limits.thread_num));
    let gate = Arc::new(UsageGate::new(
        config.limits.usage_limit_five_hour,
        config.limits.usage_limit_seven_day,
    ));
    let broker = Arc::new(EventBroker::new());

    let engine = Arc::new(Engine::new(
        config.clone(),
        db,
        sessions.clone(),
        admission,
        gate.clone(),
        upstream.clone(),
        mcp,
        broker.clone(),
    ));

    // Prometheus exporter; a failed install degrades to no metrics.
    let prometheus_render = match tideway_prometheus::PrometheusAdapter::new() {
        Ok(adapter) => {
            info!("prometheus metrics enabled");
            let handle = adapter.handle();
            Some(Arc::new(move || handle.render()) as Arc<dyn Fn() -> String + Send + Sync>)
        }
        Err(e) => {
            warn!(error = %e, "prometheus initialization failed, continuing without metrics");
            None
        }
    };

    let cancel = shutdown::shutdown_token();

    // Background tasks: session sweeper and usage poller.
    sessions.spawn_sweeper(cancel.clone());
    {
        let engine = engine.clone();
        gate.spawn_poller(upstream, cancel.clone(), move || {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine.publish_usage().await;
            });
        });
    }

    info!(
        org = config.organization_id(),
        port = config.server.port,
        thread_num = config.limits.thread_num,
        request_interval_ms = config.limits.request_interval_ms,
        connectors = config.mcp_connectors.len(),
        "gateway configured"
    );

    let state = AppState::new(engine, prometheus_render);
    start_server(&config.server.host, config.server.port, state, cancel).await?;

    // Give in-flight generations a grace window before the process exits.
    shutdown::drain_generating_sessions(&sessions, std::time::Duration::from_secs(30)).await;

    info!("tideway serve shutdown complete");
    Ok(())
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tideway={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
