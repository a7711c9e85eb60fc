// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation ownership rows: `(device, upstream conversation uid)`.

use rusqlite::params;
use tideway_core::TidewayError;

use crate::database::{map_tr_err, Database};
use crate::models::{Conversation, ConversationSummary};

/// Get the conversation row for `uid`, creating it for `device_id` when absent.
///
/// Adopting an existing upstream conversation and creating a fresh one go
/// through the same path; the uid is unique, so a concurrent create resolves
/// to the already-inserted row.
pub async fn get_or_create(
    db: &Database,
    device_id: i64,
    uid: &str,
) -> Result<Conversation, TidewayError> {
    let uid = uid.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO cld_conversation (uid, device_id) VALUES (?1, ?2)",
                params![uid, device_id],
            )?;
            let conv = conn.query_row(
                "SELECT id, uid, device_id FROM cld_conversation WHERE uid = ?1",
                params![uid],
                |row| {
                    Ok(Conversation {
                        id: row.get(0)?,
                        uid: row.get(1)?,
                        device_id: row.get(2)?,
                    })
                },
            )?;
            Ok(conv)
        })
        .await
        .map_err(map_tr_err)
}

/// Look up a conversation by its upstream uid.
pub async fn get_by_uid(db: &Database, uid: &str) -> Result<Option<Conversation>, TidewayError> {
    let uid = uid.to_string();
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                "SELECT id, uid, device_id FROM cld_conversation WHERE uid = ?1",
                params![uid],
                |row| {
                    Ok(Conversation {
                        id: row.get(0)?,
                        uid: row.get(1)?,
                        device_id: row.get(2)?,
                    })
                },
            );
            match result {
                Ok(conv) => Ok(Some(conv)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Delete a conversation; its dialogues cascade.
pub async fn delete(db: &Database, conversation_id: i64) -> Result<(), TidewayError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "DELETE FROM cld_conversation WHERE id = ?1",
                params![conversation_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Per-conversation summaries (last message, updated time, dialogue count),
/// most recently active first.
pub async fn list_summaries(db: &Database) -> Result<Vec<ConversationSummary>, TidewayError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT
                     c.id,
                     c.uid,
                     c.device_id,
                     (SELECT user_message FROM cld_dialogue
                      WHERE conversation_id = c.id ORDER BY ordinal DESC LIMIT 1),
                     (SELECT create_time FROM cld_dialogue
                      WHERE conversation_id = c.id ORDER BY ordinal DESC LIMIT 1),
                     (SELECT COUNT(*) FROM cld_dialogue WHERE conversation_id = c.id)
                 FROM cld_conversation c
                 ORDER BY 5 DESC NULLS LAST",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(ConversationSummary {
                    id: row.get(0)?,
                    uid: row.get(1)?,
                    device_id: row.get(2)?,
                    last_message: row.get(3)?,
                    updated_at: row.get(4)?,
                    dialogue_count: row.get(5)?,
                })
            })?;
            let mut summaries = Vec::new();
            for row in rows {
                summaries.push(row?);
            }
            Ok(summaries)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::devices;

    #[tokio::test]
    async fn create_then_adopt_returns_same_row() {
        let db = Database::open_in_memory().await.unwrap();
        let device = devices::get_or_create(&db, "fp-1", "windows").await.unwrap();
        let first = get_or_create(&db, device.id, "conv-uid-1").await.unwrap();
        let second = get_or_create(&db, device.id, "conv-uid-1").await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn delete_cascades_to_dialogues() {
        let db = Database::open_in_memory().await.unwrap();
        let device = devices::get_or_create(&db, "fp-1", "windows").await.unwrap();
        let conv = get_or_create(&db, device.id, "conv-uid-1").await.unwrap();
        crate::queries::dialogues::create(&db, conv.id, "d-1", "hello", None)
            .await
            .unwrap();

        delete(&db, conv.id).await.unwrap();

        let remaining = crate::queries::dialogues::get_by_conversation(&db, conv.id)
            .await
            .unwrap();
        assert!(remaining.is_empty());
        assert!(get_by_uid(&db, "conv-uid-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn summaries_carry_last_message_and_count() {
        let db = Database::open_in_memory().await.unwrap();
        let device = devices::get_or_create(&db, "fp-1", "windows").await.unwrap();
        let conv = get_or_create(&db, device.id, "conv-uid-1").await.unwrap();
        crate::queries::dialogues::create(&db, conv.id, "d-1", "first", None)
            .await
            .unwrap();
        crate::queries::dialogues::create(&db, conv.id, "d-2", "second", None)
            .await
            .unwrap();

        let summaries = list_summaries(&db).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].dialogue_count, 2);
        assert_eq!(summaries[0].last_message.as_deref(), Some("second"));
    }
}
