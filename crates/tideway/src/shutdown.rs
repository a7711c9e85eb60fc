// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shutdown coordination: the signal-wired cancellation token and the
//! generation drain.
//!
//! SIGINT/SIGTERM cancels the token the server and background tasks watch.
//! Before the process exits, in-flight generations get a grace window to
//! settle, observed through the same `active_generating()` view the session
//! sweeper works from. Upstream SSE reads cannot be preempted; a generation
//! still running when the window closes settles its record on its own error
//! path.

use std::sync::Arc;
use std::time::Duration;

use tideway_engine::SessionManager;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Poll cadence while waiting for in-flight generations to settle.
const DRAIN_POLL: Duration = Duration::from_millis(500);

/// A cancellation token wired to SIGINT and SIGTERM.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        info!(signal, "shutdown requested");
        trigger.cancel();
    });
    token
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, watching Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
}

/// Wait up to `grace` for every in-flight generation to settle.
pub async fn drain_generating_sessions(sessions: &Arc<SessionManager>, grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        let active = sessions.active_generating().await;
        if active.is_empty() {
            info!("no generations in flight, drain complete");
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(
                remaining = active.len(),
                "drain grace expired with generations still in flight"
            );
            return;
        }
        info!(in_flight = active.len(), "waiting for generations to settle");
        tokio::time::sleep(DRAIN_POLL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_returns_immediately_with_nothing_in_flight() {
        let sessions = Arc::new(SessionManager::new());
        sessions.get_or_create("conv-idle").await;
        drain_generating_sessions(&sessions, Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn drain_waits_for_a_generation_to_settle() {
        let sessions = Arc::new(SessionManager::new());
        sessions.get_or_create("conv-busy").await;
        sessions.set_generating("conv-busy", true).await;

        let settler = {
            let sessions = sessions.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                sessions.set_generating("conv-busy", false).await;
            })
        };
        drain_generating_sessions(&sessions, Duration::from_secs(5)).await;
        settler.await.unwrap();
        assert!(sessions.active_generating().await.is_empty());
    }

    #[tokio::test]
    async fn drain_gives_up_when_the_grace_window_closes() {
        tokio::time::pause();
        let sessions = Arc::new(SessionManager::new());
        sessions.get_or_create("conv-stuck").await;
        sessions.set_generating("conv-stuck", true).await;

        drain_generating_sessions(&sessions, Duration::from_secs(2)).await;
        // Still generating: the drain returned on the deadline, not the work.
        assert_eq!(sessions.active_generating().await.len(), 1);
    }
}
