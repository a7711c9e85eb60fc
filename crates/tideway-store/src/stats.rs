// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-local stats counters and the latched shutdown flag.
//!
//! These counters are a fast path for dashboards and the stats endpoint;
//! they drift from the store after a crash and are reloaded from terminal
//! row counts at startup.

use std::sync::RwLock;

use tideway_core::types::StatsCounters;

#[derive(Debug, Default)]
struct StatsInner {
    processing: i64,
    completed: i64,
    failed: i64,
    service_shutdown: bool,
    shutdown_reason: String,
}

/// Shared counter handle. Mutated only under its own lock.
#[derive(Debug, Default)]
pub struct StatsHandle {
    inner: RwLock<StatsInner>,
}

impl StatsHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_processing(&self) {
        self.inner.write().expect("stats lock poisoned").processing += 1;
    }

    pub fn decrement_processing(&self) {
        let mut inner = self.inner.write().expect("stats lock poisoned");
        inner.processing = (inner.processing - 1).max(0);
    }

    pub fn increment_completed(&self) {
        self.inner.write().expect("stats lock poisoned").completed += 1;
    }

    pub fn increment_failed(&self) {
        self.inner.write().expect("stats lock poisoned").failed += 1;
    }

    /// Latch the shutdown flag with a reason; once set it stays set.
    pub fn set_shutdown(&self, reason: impl Into<String>) {
        let mut inner = self.inner.write().expect("stats lock poisoned");
        inner.service_shutdown = true;
        inner.shutdown_reason = reason.into();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.read().expect("stats lock poisoned").service_shutdown
    }

    pub fn shutdown_reason(&self) -> String {
        self.inner
            .read()
            .expect("stats lock poisoned")
            .shutdown_reason
            .clone()
    }

    /// Replace the completed/failed counters (startup reload from the store).
    pub fn reload(&self, completed: i64, failed: i64) {
        let mut inner = self.inner.write().expect("stats lock poisoned");
        inner.completed = completed;
        inner.failed = failed;
    }

    pub fn snapshot(&self) -> StatsCounters {
        let inner = self.inner.read().expect("stats lock poisoned");
        StatsCounters {
            processing: inner.processing,
            completed: inner.completed,
            failed: inner.failed,
            service_shutdown: inner.service_shutdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_and_decrement() {
        let stats = StatsHandle::new();
        stats.increment_processing();
        stats.increment_processing();
        stats.decrement_processing();
        stats.increment_completed();
        stats.increment_failed();
        let snap = stats.snapshot();
        assert_eq!(snap.processing, 1);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.failed, 1);
    }

    #[test]
    fn processing_never_goes_negative() {
        let stats = StatsHandle::new();
        stats.decrement_processing();
        assert_eq!(stats.snapshot().processing, 0);
    }

    #[test]
    fn shutdown_latches() {
        let stats = StatsHandle::new();
        assert!(!stats.is_shutdown());
        stats.set_shutdown("session expired");
        assert!(stats.is_shutdown());
        assert_eq!(stats.shutdown_reason(), "session expired");
    }

    #[test]
    fn reload_replaces_terminal_counters() {
        let stats = StatsHandle::new();
        stats.increment_completed();
        stats.reload(42, 7);
        let snap = stats.snapshot();
        assert_eq!(snap.completed, 42);
        assert_eq!(snap.failed, 7);
    }
}
