// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory dialogue session manager.
//!
//! One session per upstream conversation uid carries the parent-message
//! cursor, the generating flag, and the stream bookkeeping the sweeper uses.
//! The map lock and the per-session lock are separate so map iteration never
//! blocks a generation in progress.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tideway_core::SENTINEL_PARENT_UUID;

/// Idle TTL after which a non-generating session is evicted.
const SESSION_TTL: Duration = Duration::from_secs(60);

/// Sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct SessionState {
    last_message_uuid: String,
    last_used_time: Instant,
    is_generating: bool,
    stream_mode: bool,
    sse_closed: bool,
}

/// Coordination state for one upstream conversation.
#[derive(Debug)]
pub struct Session {
    conversation_uid: String,
    state: RwLock<SessionState>,
}

impl Session {
    fn new(conversation_uid: String) -> Self {
        Self {
            conversation_uid,
            state: RwLock::new(SessionState {
                last_message_uuid: SENTINEL_PARENT_UUID.to_string(),
                last_used_time: Instant::now(),
                is_generating: false,
                stream_mode: false,
                sse_closed: false,
            }),
        }
    }

    pub fn conversation_uid(&self) -> &str {
        &self.conversation_uid
    }

    /// The parent-message cursor anchoring the next completion.
    pub async fn parent_cursor(&self) -> String {
        self.state.read().await.last_message_uuid.clone()
    }

    pub async fn is_generating(&self) -> bool {
        self.state.read().await.is_generating
    }
}

/// Snapshot row for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub conversation_id: String,
    pub is_generating: bool,
    pub stream_mode: bool,
    pub idle_secs: u64,
}

/// The map of live sessions plus the eviction sweeper.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    ttl: Duration,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: SESSION_TTL,
        }
    }

    /// Return the existing session (touching its TTL) or create one with the
    /// sentinel parent cursor.
    pub async fn get_or_create(&self, conversation_uid: &str) -> Arc<Session> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(conversation_uid) {
                session.state.write().await.last_used_time = Instant::now();
                return session.clone();
            }
        }
        let mut sessions = self.sessions.write().await;
        // Re-check under the write lock: a racing creator may have won.
        if let Some(session) = sessions.get(conversation_uid) {
            session.state.write().await.last_used_time = Instant::now();
            return session.clone();
        }
        let session = Arc::new(Session::new(conversation_uid.to_string()));
        sessions.insert(conversation_uid.to_string(), session.clone());
        debug!(conversation = conversation_uid, "session created");
        session
    }

    /// Set the parent cursor and touch the session.
    pub async fn update_cursor(&self, conversation_uid: &str, last_message_uuid: &str) {
        if let Some(session) = self.get(conversation_uid).await {
            let mut state = session.state.write().await;
            state.last_message_uuid = last_message_uuid.to_string();
            state.last_used_time = Instant::now();
        }
    }

    /// Refresh the TTL only. Never alters the cursor or the generating flag.
    pub async fn touch(&self, conversation_uid: &str) {
        if let Some(session) = self.get(conversation_uid).await {
            session.state.write().await.last_used_time = Instant::now();
            debug!(conversation = conversation_uid, "session touched");
        }
    }

    pub async fn set_generating(&self, conversation_uid: &str, generating: bool) {
        if let Some(session) = self.get(conversation_uid).await {
            let mut state = session.state.write().await;
            state.is_generating = generating;
            state.last_used_time = Instant::now();
        }
    }

    pub async fn set_stream_mode(&self, conversation_uid: &str, stream_mode: bool) {
        if let Some(session) = self.get(conversation_uid).await {
            let mut state = session.state.write().await;
            state.stream_mode = stream_mode;
            state.last_used_time = Instant::now();
        }
    }

    /// Mark the ingress stream closed; the sweeper evicts such sessions.
    pub async fn mark_sse_closed(&self, conversation_uid: &str) {
        if let Some(session) = self.get(conversation_uid).await {
            let mut state = session.state.write().await;
            state.sse_closed = true;
            state.last_used_time = Instant::now();
        }
    }

    pub async fn delete(&self, conversation_uid: &str) {
        self.sessions.write().await.remove(conversation_uid);
        debug!(conversation = conversation_uid, "session deleted");
    }

    async fn get(&self, conversation_uid: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(conversation_uid).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Snapshot of sessions currently generating, for dashboards.
    pub async fn active_generating(&self) -> Vec<SessionSnapshot> {
        let sessions = self.sessions.read().await;
        let mut snapshots = Vec::new();
        for (uid, session) in sessions.iter() {
            let state = session.state.read().await;
            if state.is_generating {
                snapshots.push(SessionSnapshot {
                    conversation_id: uid.clone(),
                    is_generating: true,
                    stream_mode: state.stream_mode,
                    idle_secs: state.last_used_time.elapsed().as_secs(),
                });
            }
        }
        snapshots
    }

    /// One sweep pass: evict closed-stream sessions and idle non-generating
    /// sessions past the TTL.
    pub async fn sweep(&self) {
        let mut evict = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for (uid, session) in sessions.iter() {
                let state = session.state.read().await;
                if state.stream_mode && state.sse_closed {
                    evict.push(uid.clone());
                } else if !state.is_generating && state.last_used_time.elapsed() > self.ttl {
                    evict.push(uid.clone());
                }
            }
        }
        if evict.is_empty() {
            return;
        }
        let mut sessions = self.sessions.write().await;
        for uid in evict {
            sessions.remove(&uid);
            debug!(conversation = uid.as_str(), "session evicted");
        }
    }

    /// Background sweeper, one pass per minute until cancelled.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await; // skip the immediate tick
            loop {
                tokio::select! {
                    _ = interval.tick() => manager.sweep().await,
                    _ = cancel.cancelled() => {
                        info!("session sweeper shutting down");
                        break;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_returns_the_same_session_until_eviction() {
        let manager = SessionManager::new();
        let first = manager.get_or_create("conv-1").await;
        let second = manager.get_or_create("conv-1").await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.parent_cursor().await, SENTINEL_PARENT_UUID);
    }

    #[tokio::test]
    async fn update_cursor_sets_parent_and_touch_does_not() {
        let manager = SessionManager::new();
        let session = manager.get_or_create("conv-1").await;
        manager.update_cursor("conv-1", "msg-9").await;
        assert_eq!(session.parent_cursor().await, "msg-9");

        manager.set_generating("conv-1", true).await;
        manager.touch("conv-1").await;
        assert_eq!(session.parent_cursor().await, "msg-9");
        assert!(session.is_generating().await);
    }

    #[tokio::test]
    async fn sweep_evicts_idle_non_generating_sessions() {
        tokio::time::pause();
        let manager = SessionManager::new();
        manager.get_or_create("conv-idle").await;
        manager.get_or_create("conv-busy").await;
        manager.set_generating("conv-busy", true).await;

        tokio::time::advance(Duration::from_secs(61)).await;
        manager.sweep().await;

        assert!(manager.get("conv-idle").await.is_none());
        assert!(manager.get("conv-busy").await.is_some(), "generating sessions survive");
    }

    #[tokio::test]
    async fn sweep_evicts_closed_stream_sessions_immediately() {
        let manager = SessionManager::new();
        manager.get_or_create("conv-1").await;
        manager.set_stream_mode("conv-1", true).await;
        manager.mark_sse_closed("conv-1").await;

        manager.sweep().await;
        assert!(manager.get("conv-1").await.is_none());
    }

    #[tokio::test]
    async fn touch_keeps_a_session_alive_past_the_ttl() {
        tokio::time::pause();
        let manager = SessionManager::new();
        manager.get_or_create("conv-1").await;

        tokio::time::advance(Duration::from_secs(45)).await;
        manager.touch("conv-1").await;
        tokio::time::advance(Duration::from_secs(45)).await;
        manager.sweep().await;

        assert!(manager.get("conv-1").await.is_some());
    }

    #[tokio::test]
    async fn active_generating_lists_only_generating_sessions() {
        let manager = SessionManager::new();
        manager.get_or_create("conv-a").await;
        manager.get_or_create("conv-b").await;
        manager.set_generating("conv-b", true).await;

        let active = manager.active_generating().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].conversation_id, "conv-b");
    }

    #[tokio::test]
    async fn delete_removes_the_entry() {
        let manager = SessionManager::new();
        manager.get_or_create("conv-1").await;
        manager.delete("conv-1").await;
        assert!(manager.is_empty().await);
    }
}
