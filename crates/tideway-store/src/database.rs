// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background
//! thread. The [`Database`] struct IS the single writer: query modules accept
//! `&Database` and go through `connection().call()`. Do NOT create
//! additional Connection instances for writes.

use tideway_core::TidewayError;
use tokio_rusqlite::Connection;
use tracing::info;

use crate::migrations;
use crate::stats::StatsHandle;

/// Handle to the SQLite database plus the process-local stats counters.
pub struct Database {
    conn: Connection,
    stats: StatsHandle,
}

impl Database {
    /// Open (or create) the database at `path`, apply PRAGMAs and migrations.
    pub async fn open(path: &str) -> Result<Self, TidewayError> {
        let conn = Connection::open(path).await.map_err(map_tr_err)?;
        conn.call(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            migrations::run_migrations(conn)
                .map_err(|e| rusqlite::Error::ModuleError(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        info!(path, "database initialized");
        Ok(Self {
            conn,
            stats: StatsHandle::new(),
        })
    }

    /// An in-memory database for tests.
    pub async fn open_in_memory() -> Result<Self, TidewayError> {
        let conn = Connection::open_in_memory().await.map_err(map_tr_err)?;
        conn.call(|conn| {
            conn.pragma_update(None, "foreign_keys", "ON")?;
            migrations::run_migrations(conn)
                .map_err(|e| rusqlite::Error::ModuleError(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;
        Ok(Self {
            conn,
            stats: StatsHandle::new(),
        })
    }

    /// The underlying single-writer connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Process-local stats counters (processing/completed/failed + shutdown latch).
    pub fn stats(&self) -> &StatsHandle {
        &self.stats
    }

    /// Reload the completed/failed counters from terminal-status row counts.
    ///
    /// The in-memory counters are a fast path and drift from the store after
    /// a crash; this runs once at startup.
    pub async fn load_stats(&self) -> Result<(), TidewayError> {
        let (completed, failed) = crate::queries::dialogues::terminal_counts(self).await?;
        self.stats.reload(completed, failed);
        info!(completed, failed, "stats counters reloaded from store");
        Ok(())
    }
}

/// Map a tokio-rusqlite error into the workspace storage error.
pub(crate) fn map_tr_err(e: tokio_rusqlite::Error) -> TidewayError {
    TidewayError::Storage {
        source: Box::new(e),
    }
}
