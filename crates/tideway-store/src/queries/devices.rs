// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Device registry operations.
//!
//! Devices are created on first appearance of a fingerprint and never
//! deleted; ban state mutates in place.

use rusqlite::params;
use tideway_core::TidewayError;

use crate::database::{map_tr_err, Database};
use crate::models::Device;

fn row_to_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        id: row.get(0)?,
        fingerprint: row.get(1)?,
        platform: row.get(2)?,
        create_time: row.get(3)?,
        update_time: row.get(4)?,
        notice: row.get(5)?,
        banned: row.get(6)?,
        ban_reason: row.get(7)?,
        admin: row.get(8)?,
        admin_password: row.get(9)?,
    })
}

const DEVICE_COLUMNS: &str = "id, fingerprint, platform, create_time, update_time, notice, \
                              banned, ban_reason, admin, admin_password";

/// Get the device for `fingerprint`, creating it on first appearance.
///
/// An existing device has its `update_time` touched; a changed platform tag
/// is written through.
pub async fn get_or_create(
    db: &Database,
    fingerprint: &str,
    platform: &str,
) -> Result<Device, TidewayError> {
    let fingerprint = fingerprint.to_string();
    let platform = platform.to_string();
    db.connection()
        .call(move |conn| {
            let now = chrono::Utc::now().to_rfc3339();
            let existing = conn
                .query_row(
                    &format!("SELECT {DEVICE_COLUMNS} FROM cld_device WHERE fingerprint = ?1"),
                    params![fingerprint],
                    row_to_device,
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;

            if let Some(mut device) = existing {
                conn.execute(
                    "UPDATE cld_device SET update_time = ?1 WHERE id = ?2",
                    params![now, device.id],
                )?;
                if !platform.is_empty() && device.platform != platform {
                    conn.execute(
                        "UPDATE cld_device SET platform = ?1 WHERE id = ?2",
                        params![platform, device.id],
                    )?;
                    device.platform = platform;
                }
                device.update_time = now;
                return Ok(device);
            }

            conn.execute(
                "INSERT INTO cld_device (fingerprint, platform, create_time, update_time, banned, admin, admin_password)
                 VALUES (?1, ?2, ?3, ?3, 0, 0, '')",
                params![fingerprint, platform, now],
            )?;
            let id = conn.last_insert_rowid();
            Ok(Device {
                id,
                fingerprint,
                platform,
                create_time: now.clone(),
                update_time: now,
                notice: None,
                banned: false,
                ban_reason: None,
                admin: false,
                admin_password: String::new(),
            })
        })
        .await
        .map_err(map_tr_err)
}

/// Get a device by fingerprint without creating one.
pub async fn get_by_fingerprint(
    db: &Database,
    fingerprint: &str,
) -> Result<Option<Device>, TidewayError> {
    let fingerprint = fingerprint.to_string();
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                &format!("SELECT {DEVICE_COLUMNS} FROM cld_device WHERE fingerprint = ?1"),
                params![fingerprint],
                row_to_device,
            );
            match result {
                Ok(device) => Ok(Some(device)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Ban check by device id. An unknown id counts as not banned.
pub async fn is_banned(db: &Database, device_id: i64) -> Result<(bool, String), TidewayError> {
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                "SELECT banned, ban_reason FROM cld_device WHERE id = ?1",
                params![device_id],
                |row| {
                    let banned: bool = row.get(0)?;
                    let reason: Option<String> = row.get(1)?;
                    Ok((banned, reason.unwrap_or_default()))
                },
            );
            match result {
                Ok(pair) => Ok(pair),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok((false, String::new())),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Set the ban flag with a reason.
pub async fn ban(db: &Database, device_id: i64, reason: &str) -> Result<(), TidewayError> {
    let reason = reason.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE cld_device SET banned = 1, ban_reason = ?1 WHERE id = ?2",
                params![reason, device_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Clear the ban flag and reason.
pub async fn unban(db: &Database, device_id: i64) -> Result<(), TidewayError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE cld_device SET banned = 0, ban_reason = NULL WHERE id = ?1",
                params![device_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Update the notice shown to a device on its next status check.
pub async fn update_notice(
    db: &Database,
    fingerprint: &str,
    notice: &str,
) -> Result<(), TidewayError> {
    let fingerprint = fingerprint.to_string();
    let notice = notice.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE cld_device SET notice = ?1 WHERE fingerprint = ?2",
                params![notice, fingerprint],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Admin check: the fingerprint must carry the admin flag and a matching password.
pub async fn is_admin(
    db: &Database,
    fingerprint: &str,
    password: &str,
) -> Result<bool, TidewayError> {
    let device = get_by_fingerprint(db, fingerprint).await?;
    Ok(device
        .map(|d| d.admin && d.admin_password == password)
        .unwrap_or(false))
}
