// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only versioned system-prompt templates.
//!
//! Each dialogue records the template id active at its creation, so old
//! records stay attributable to the prompt text they actually ran with.

use rusqlite::params;
use tideway_core::TidewayError;

use crate::database::{map_tr_err, Database};
use crate::models::PromptTemplate;
use crate::queries::dialogues::now_rfc3339;

/// Append a new template version.
pub async fn create(db: &Database, prompt: &str) -> Result<PromptTemplate, TidewayError> {
    let prompt = prompt.to_string();
    db.connection()
        .call(move |conn| {
            let update_time = now_rfc3339();
            conn.execute(
                "INSERT INTO cld_prompt (prompt, update_time) VALUES (?1, ?2)",
                params![prompt, update_time],
            )?;
            Ok(PromptTemplate {
                id: conn.last_insert_rowid(),
                prompt,
                update_time,
            })
        })
        .await
        .map_err(map_tr_err)
}

/// The latest template, if any exists.
pub async fn latest(db: &Database) -> Result<Option<PromptTemplate>, TidewayError> {
    db.connection()
        .call(|conn| {
            let result = conn.query_row(
                "SELECT id, prompt, update_time FROM cld_prompt ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok(PromptTemplate {
                        id: row.get(0)?,
                        prompt: row.get(1)?,
                        update_time: row.get(2)?,
                    })
                },
            );
            match result {
                Ok(prompt) => Ok(Some(prompt)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// The id of the latest template, for snapshotting onto new dialogues.
pub async fn current_id(db: &Database) -> Result<Option<i64>, TidewayError> {
    Ok(latest(db).await?.map(|p| p.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_table_has_no_current_id() {
        let db = Database::open_in_memory().await.unwrap();
        assert!(current_id(&db).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn versions_append_and_latest_wins() {
        let db = Database::open_in_memory().await.unwrap();
        let first = create(&db, "Answer briefly.").await.unwrap();
        let second = create(&db, "Answer in French.").await.unwrap();
        assert!(second.id > first.id);
        let latest = latest(&db).await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        assert_eq!(latest.prompt, "Answer in French.");
        assert_eq!(current_id(&db).await.unwrap(), Some(second.id));
    }
}
