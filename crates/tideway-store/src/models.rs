// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain model types for storage entities.
//!
//! These types represent rows in the SQLite database. Timestamps are stored
//! as RFC 3339 UTC strings, which compare lexicographically for the rate
//! window queries.

use serde::{Deserialize, Serialize};
use tideway_core::DialogueStatus;

/// A client device, identified by its opaque fingerprint. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub fingerprint: String,
    /// One of windows, android, linux, macos, ios (enforced by a check constraint).
    pub platform: String,
    pub create_time: String,
    pub update_time: String,
    /// Optional notice pushed to the device on status checks.
    pub notice: Option<String>,
    pub banned: bool,
    pub ban_reason: Option<String>,
    pub admin: bool,
    #[serde(skip_serializing)]
    pub admin_password: String,
}

/// An owned pairing of a device and an upstream conversation uid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub uid: String,
    pub device_id: i64,
}

/// One exchange: a user message and its (possibly absent) assistant reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dialogue {
    pub id: i64,
    pub uid: String,
    pub conversation_id: i64,
    /// Monotone position within the conversation, 1-based and gap-free.
    pub ordinal: i64,
    pub user_message: String,
    pub assistant_message: Option<String>,
    pub create_time: String,
    pub request_time: Option<String>,
    pub finish_time: Option<String>,
    pub duration_ms: Option<i64>,
    pub tokens: Option<i64>,
    pub status: DialogueStatus,
    /// Prompt-template version active when the dialogue was created.
    pub prompt_id: Option<i64>,
}

/// An append-only versioned system-prompt template row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: i64,
    pub prompt: String,
    pub update_time: String,
}

/// A client-submitted post-mortem error report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub id: i64,
    pub conversation_id: Option<String>,
    pub error: String,
    pub device_id: Option<String>,
    pub platform: Option<String>,
    pub version: Option<String>,
    pub create_time: String,
}

/// Per-conversation summary row for the dashboard dialogue list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: i64,
    pub uid: String,
    pub device_id: i64,
    pub last_message: Option<String>,
    pub updated_at: Option<String>,
    pub dialogue_count: i64,
}
