// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client-submitted post-mortem error reports.

use rusqlite::params;
use tideway_core::TidewayError;

use crate::database::{map_tr_err, Database};
use crate::models::ErrorReport;
use crate::queries::dialogues::now_rfc3339;

/// Store a client error report.
pub async fn save(
    db: &Database,
    conversation_id: Option<&str>,
    error: &str,
    device_id: Option<&str>,
    platform: Option<&str>,
    version: Option<&str>,
) -> Result<(), TidewayError> {
    let conversation_id = conversation_id.map(str::to_string);
    let error = error.to_string();
    let device_id = device_id.map(str::to_string);
    let platform = platform.map(str::to_string);
    let version = version.map(str::to_string);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO cld_error (conversation_id, error, device_id, platform, version, create_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![conversation_id, error, device_id, platform, version, now_rfc3339()],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Recent reports, newest first.
pub async fn recent(db: &Database, limit: i64) -> Result<Vec<ErrorReport>, TidewayError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, error, device_id, platform, version, create_time
                 FROM cld_error ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], |row| {
                Ok(ErrorReport {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    error: row.get(2)?,
                    device_id: row.get(3)?,
                    platform: row.get(4)?,
                    version: row.get(5)?,
                    create_time: row.get(6)?,
                })
            })?;
            let mut reports = Vec::new();
            for row in rows {
                reports.push(row?);
            }
            Ok(reports)
        })
        .await
        .map_err(map_tr_err)
}
