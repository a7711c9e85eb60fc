// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dialogue record operations and the status state machine.
//!
//! Ordinal assignment happens inside the same serialized write transaction
//! as the insert, so ordinals within a conversation are gap-free 1..n even
//! under concurrent creators. The `UNIQUE(conversation_id, ordinal)`
//! constraint stands as a backstop.

use std::str::FromStr;

use chrono::{Duration, SecondsFormat, Utc};
use rusqlite::params;
use tideway_core::types::RateTriple;
use tideway_core::{DialogueStatus, TidewayError};

use crate::database::{map_tr_err, Database};
use crate::models::Dialogue;

const DIALOGUE_COLUMNS: &str = "id, uid, conversation_id, ordinal, user_message, \
                                assistant_message, create_time, request_time, finish_time, \
                                duration_ms, tokens, status, prompt_id";

/// Fixed-width RFC 3339 UTC timestamp; lexicographic order equals time order.
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_dialogue(row: &rusqlite::Row<'_>) -> rusqlite::Result<Dialogue> {
    let status_text: String = row.get(11)?;
    Ok(Dialogue {
        id: row.get(0)?,
        uid: row.get(1)?,
        conversation_id: row.get(2)?,
        ordinal: row.get(3)?,
        user_message: row.get(4)?,
        assistant_message: row.get(5)?,
        create_time: row.get(6)?,
        request_time: row.get(7)?,
        finish_time: row.get(8)?,
        duration_ms: row.get(9)?,
        tokens: row.get(10)?,
        status: DialogueStatus::from_str(&status_text)
            .unwrap_or(DialogueStatus::SendFailed),
        prompt_id: row.get(12)?,
    })
}

/// Create a dialogue in status `waiting`, assigning the next ordinal for its
/// conversation inside one transaction.
pub async fn create(
    db: &Database,
    conversation_id: i64,
    uid: &str,
    user_message: &str,
    prompt_id: Option<i64>,
) -> Result<Dialogue, TidewayError> {
    let uid = uid.to_string();
    let user_message = user_message.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let ordinal: i64 = tx.query_row(
                "SELECT COALESCE(MAX(ordinal), 0) + 1 FROM cld_dialogue WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )?;
            let create_time = now_rfc3339();
            tx.execute(
                "INSERT INTO cld_dialogue
                     (uid, conversation_id, ordinal, user_message, create_time, status, prompt_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'waiting', ?6)",
                params![uid, conversation_id, ordinal, user_message, create_time, prompt_id],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(Dialogue {
                id,
                uid,
                conversation_id,
                ordinal,
                user_message,
                assistant_message: None,
                create_time,
                request_time: None,
                finish_time: None,
                duration_ms: None,
                tokens: None,
                status: DialogueStatus::Waiting,
                prompt_id,
            })
        })
        .await
        .map_err(map_tr_err)
}

/// Mark the upstream request as sent: status `processing`, request_time stamped.
pub async fn mark_processing(db: &Database, id: i64) -> Result<(), TidewayError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE cld_dialogue SET status = 'processing', request_time = ?1 WHERE id = ?2",
                params![now_rfc3339(), id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Finish a dialogue: assistant text, finish_time, duration, and the target
/// status (`done`, `replying`, or a terminal failure).
pub async fn finish(
    db: &Database,
    id: i64,
    assistant_message: Option<&str>,
    status: DialogueStatus,
) -> Result<(), TidewayError> {
    let assistant_message = assistant_message.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let finish_time = now_rfc3339();
            conn.execute(
                "UPDATE cld_dialogue SET
                     assistant_message = ?1,
                     finish_time = ?2,
                     duration_ms = CAST(
                         (julianday(?2) - julianday(create_time)) * 86400000 AS INTEGER),
                     status = ?3
                 WHERE id = ?4",
                params![assistant_message, finish_time, status.to_string(), id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Transition `replying -> done` on client ack. A no-op for any other
/// current status, so a late or duplicate ack never mutates a settled record.
pub async fn ack_done(db: &Database, id: i64) -> Result<bool, TidewayError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE cld_dialogue SET status = 'done' WHERE id = ?1 AND status = 'replying'",
                params![id],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Transition `replying -> reply_failed` after the ack window expires.
pub async fn ack_timeout(db: &Database, id: i64) -> Result<bool, TidewayError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE cld_dialogue SET status = 'reply_failed'
                 WHERE id = ?1 AND status = 'replying'",
                params![id],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Fetch a dialogue by primary key.
pub async fn get_by_id(db: &Database, id: i64) -> Result<Option<Dialogue>, TidewayError> {
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                &format!("SELECT {DIALOGUE_COLUMNS} FROM cld_dialogue WHERE id = ?1"),
                params![id],
                row_to_dialogue,
            );
            match result {
                Ok(dialogue) => Ok(Some(dialogue)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// All dialogues of a conversation, ordinal ascending.
pub async fn get_by_conversation(
    db: &Database,
    conversation_id: i64,
) -> Result<Vec<Dialogue>, TidewayError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DIALOGUE_COLUMNS} FROM cld_dialogue
                 WHERE conversation_id = ?1 ORDER BY ordinal ASC, create_time ASC"
            ))?;
            let rows = stmt.query_map(params![conversation_id], row_to_dialogue)?;
            let mut dialogues = Vec::new();
            for row in rows {
                dialogues.push(row?);
            }
            Ok(dialogues)
        })
        .await
        .map_err(map_tr_err)
}

/// Most recent dialogues across all conversations, newest first.
pub async fn history(db: &Database, limit: i64) -> Result<Vec<Dialogue>, TidewayError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DIALOGUE_COLUMNS} FROM cld_dialogue
                 ORDER BY create_time DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit], row_to_dialogue)?;
            let mut dialogues = Vec::new();
            for row in rows {
                dialogues.push(row?);
            }
            Ok(dialogues)
        })
        .await
        .map_err(map_tr_err)
}

/// The `(rpm, rpd, tpm)` triple over dialogue creation times.
///
/// `tpm` sums the token column of `done` rows in the last minute; rows from
/// the dialogue path carry NULL tokens and coalesce to zero (known gap).
pub async fn rate_triple(db: &Database) -> Result<RateTriple, TidewayError> {
    db.connection()
        .call(move |conn| {
            let now = Utc::now();
            let one_minute_ago = (now - Duration::minutes(1))
                .to_rfc3339_opts(SecondsFormat::Micros, true);
            let one_day_ago =
                (now - Duration::hours(24)).to_rfc3339_opts(SecondsFormat::Micros, true);

            let rpm: i64 = conn.query_row(
                "SELECT COUNT(*) FROM cld_dialogue WHERE create_time >= ?1",
                params![one_minute_ago],
                |row| row.get(0),
            )?;
            let rpd: i64 = conn.query_row(
                "SELECT COUNT(*) FROM cld_dialogue WHERE create_time >= ?1",
                params![one_day_ago],
                |row| row.get(0),
            )?;
            let tpm: i64 = conn.query_row(
                "SELECT COALESCE(SUM(COALESCE(tokens, 0)), 0) FROM cld_dialogue
                 WHERE status = 'done' AND create_time >= ?1",
                params![one_minute_ago],
                |row| row.get(0),
            )?;
            Ok(RateTriple {
                rpm: rpm as f64,
                rpd: rpd as f64,
                tpm: tpm as f64,
            })
        })
        .await
        .map_err(map_tr_err)
}

/// `(completed, failed)` row counts for the startup stats reload.
pub async fn terminal_counts(db: &Database) -> Result<(i64, i64), TidewayError> {
    db.connection()
        .call(|conn| {
            let completed: i64 = conn.query_row(
                "SELECT COUNT(*) FROM cld_dialogue WHERE status = 'done'",
                [],
                |row| row.get(0),
            )?;
            let failed: i64 = conn.query_row(
                "SELECT COUNT(*) FROM cld_dialogue
                 WHERE status IN ('send_failed', 'reply_failed')",
                [],
                |row| row.get(0),
            )?;
            Ok((completed, failed))
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::{conversations, devices};

    async fn test_conversation(db: &Database) -> i64 {
        let device = devices::get_or_create(db, "fp-1", "windows").await.unwrap();
        conversations::get_or_create(db, device.id, "conv-uid-1")
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn ordinals_are_gap_free_and_monotone() {
        let db = Database::open_in_memory().await.unwrap();
        let conv = test_conversation(&db).await;
        for i in 1..=5 {
            let dialogue = create(&db, conv, &format!("d-{i}"), "msg", None)
                .await
                .unwrap();
            assert_eq!(dialogue.ordinal, i);
        }
        let all = get_by_conversation(&db, conv).await.unwrap();
        let ordinals: Vec<i64> = all.iter().map(|d| d.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn concurrent_creates_never_collide() {
        let db = std::sync::Arc::new(Database::open_in_memory().await.unwrap());
        let conv = test_conversation(&db).await;
        let mut handles = Vec::new();
        for i in 0..8 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                create(&db, conv, &format!("d-{i}"), "msg", None).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let all = get_by_conversation(&db, conv).await.unwrap();
        let ordinals: Vec<i64> = all.iter().map(|d| d.ordinal).collect();
        assert_eq!(ordinals, (1..=8).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn status_walks_the_happy_path() {
        let db = Database::open_in_memory().await.unwrap();
        let conv = test_conversation(&db).await;
        let dialogue = create(&db, conv, "d-1", "hi", None).await.unwrap();
        assert_eq!(dialogue.status, DialogueStatus::Waiting);

        mark_processing(&db, dialogue.id).await.unwrap();
        let row = get_by_id(&db, dialogue.id).await.unwrap().unwrap();
        assert_eq!(row.status, DialogueStatus::Processing);
        assert!(row.request_time.is_some());

        finish(&db, dialogue.id, Some("hello!"), DialogueStatus::Done)
            .await
            .unwrap();
        let row = get_by_id(&db, dialogue.id).await.unwrap().unwrap();
        assert_eq!(row.status, DialogueStatus::Done);
        assert_eq!(row.assistant_message.as_deref(), Some("hello!"));
        assert!(row.finish_time.is_some());
        assert!(row.duration_ms.is_some());
    }

    #[tokio::test]
    async fn ack_transitions_only_from_replying() {
        let db = Database::open_in_memory().await.unwrap();
        let conv = test_conversation(&db).await;
        let dialogue = create(&db, conv, "d-1", "hi", None).await.unwrap();

        // Not replying yet: ack is a no-op.
        assert!(!ack_done(&db, dialogue.id).await.unwrap());

        finish(&db, dialogue.id, Some("resp"), DialogueStatus::Replying)
            .await
            .unwrap();
        assert!(ack_done(&db, dialogue.id).await.unwrap());

        // Done is never mutated again: neither a second ack nor a timeout.
        assert!(!ack_done(&db, dialogue.id).await.unwrap());
        assert!(!ack_timeout(&db, dialogue.id).await.unwrap());
        let row = get_by_id(&db, dialogue.id).await.unwrap().unwrap();
        assert_eq!(row.status, DialogueStatus::Done);
    }

    #[tokio::test]
    async fn ack_timeout_fails_the_reply() {
        let db = Database::open_in_memory().await.unwrap();
        let conv = test_conversation(&db).await;
        let dialogue = create(&db, conv, "d-1", "hi", None).await.unwrap();
        finish(&db, dialogue.id, Some("resp"), DialogueStatus::Replying)
            .await
            .unwrap();
        assert!(ack_timeout(&db, dialogue.id).await.unwrap());
        let row = get_by_id(&db, dialogue.id).await.unwrap().unwrap();
        assert_eq!(row.status, DialogueStatus::ReplyFailed);
    }

    #[tokio::test]
    async fn rate_triple_counts_recent_rows() {
        let db = Database::open_in_memory().await.unwrap();
        let conv = test_conversation(&db).await;
        for i in 0..3 {
            let dialogue = create(&db, conv, &format!("d-{i}"), "m", None)
                .await
                .unwrap();
            finish(&db, dialogue.id, Some("r"), DialogueStatus::Done)
                .await
                .unwrap();
        }
        let triple = rate_triple(&db).await.unwrap();
        assert_eq!(triple.rpm, 3.0);
        assert_eq!(triple.rpd, 3.0);
        assert_eq!(triple.tpm, 0.0); // dialogue path records no token counts
    }

    #[tokio::test]
    async fn terminal_counts_split_done_and_failed() {
        let db = Database::open_in_memory().await.unwrap();
        let conv = test_conversation(&db).await;
        let a = create(&db, conv, "d-a", "m", None).await.unwrap();
        let b = create(&db, conv, "d-b", "m", None).await.unwrap();
        let c = create(&db, conv, "d-c", "m", None).await.unwrap();
        finish(&db, a.id, Some("r"), DialogueStatus::Done).await.unwrap();
        finish(&db, b.id, None, DialogueStatus::SendFailed).await.unwrap();
        finish(&db, c.id, Some("r"), DialogueStatus::ReplyFailed)
            .await
            .unwrap();
        let (completed, failed) = terminal_counts(&db).await.unwrap();
        assert_eq!(completed, 1);
        assert_eq!(failed, 2);
    }

    #[tokio::test]
    async fn history_is_newest_first_and_limited() {
        let db = Database::open_in_memory().await.unwrap();
        let conv = test_conversation(&db).await;
        for i in 0..5 {
            create(&db, conv, &format!("d-{i}"), &format!("m-{i}"), None)
                .await
                .unwrap();
        }
        let recent = history(&db, 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent[0].create_time >= recent[1].create_time);
        assert!(recent[1].create_time >= recent[2].create_time);
    }
}
