// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared across the Tideway workspace.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Parent-message cursor sentinel accepted by the upstream as "start of chain".
///
/// This is a valid payload, not a null: a completion anchored to the sentinel
/// begins a new message chain in the conversation.
pub const SENTINEL_PARENT_UUID: &str = "00000000-0000-4000-8000-000000000000";

/// Lifecycle status of a dialogue record.
///
/// `waiting -> processing -> replying -> done`, or terminally
/// `send_failed` / `reply_failed`. Once `done`, a record is never mutated.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DialogueStatus {
    Waiting,
    Processing,
    Replying,
    Done,
    SendFailed,
    ReplyFailed,
}

impl DialogueStatus {
    /// Whether this status is terminal (the record will not change again).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DialogueStatus::Done | DialogueStatus::SendFailed | DialogueStatus::ReplyFailed
        )
    }
}

/// Client platform tag carried on device registration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Windows,
    Android,
    Linux,
    Macos,
    Ios,
}

impl Default for Platform {
    fn default() -> Self {
        Platform::Windows
    }
}

/// A dialogue request as received on any ingress shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueRequest {
    /// Existing upstream conversation uid; absent means "create a new one".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// The user prompt text.
    #[serde(default)]
    pub request: String,
    /// Model key override (e.g. "opus-4.1"); empty or "default" means upstream default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Style preset key (e.g. "concise"); unknown or empty styles are omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Base64-encoded file payloads to upload before the completion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<RequestFile>,
    /// When true the request only touches the session TTL.
    #[serde(default)]
    pub keep_alive: bool,
}

/// A file carried in a dialogue request, base64-encoded by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFile {
    pub name: String,
    /// Base64-encoded content.
    pub content: String,
    /// MIME type as declared by the client.
    #[serde(rename = "type")]
    pub file_type: String,
}

/// The final response for a non-streaming dialogue request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueReply {
    pub conversation_id: String,
    pub response: String,
}

/// One utilization window from the upstream usage endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageWindow {
    /// Utilization as an integer percentage (0-100).
    pub utilization: i64,
    /// RFC 3339 reset timestamp, if the upstream reported one.
    pub resets_at: Option<String>,
}

/// Snapshot of upstream quota utilization, refreshed by the usage poller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub five_hour: UsageWindow,
    pub seven_day: UsageWindow,
    pub seven_day_opus: UsageWindow,
}

/// Gate verdict derived from a [`UsageSnapshot`] and the configured limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageVerdict {
    pub is_blocked: bool,
    pub block_reason: String,
    pub block_reset_time: String,
}

/// Process-local counters exposed on the stats endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsCounters {
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub service_shutdown: bool,
}

/// The `(rpm, rpd, tpm)` triple computed from dialogue creation times.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RateTriple {
    pub rpm: f64,
    pub rpd: f64,
    pub tpm: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn dialogue_status_round_trips_through_strings() {
        for (status, text) in [
            (DialogueStatus::Waiting, "waiting"),
            (DialogueStatus::Processing, "processing"),
            (DialogueStatus::Replying, "replying"),
            (DialogueStatus::Done, "done"),
            (DialogueStatus::SendFailed, "send_failed"),
            (DialogueStatus::ReplyFailed, "reply_failed"),
        ] {
            assert_eq!(status.to_string(), text);
            assert_eq!(DialogueStatus::from_str(text).unwrap(), status);
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(DialogueStatus::Done.is_terminal());
        assert!(DialogueStatus::SendFailed.is_terminal());
        assert!(DialogueStatus::ReplyFailed.is_terminal());
        assert!(!DialogueStatus::Waiting.is_terminal());
        assert!(!DialogueStatus::Processing.is_terminal());
        assert!(!DialogueStatus::Replying.is_terminal());
    }

    #[test]
    fn platform_defaults_to_windows() {
        assert_eq!(Platform::default(), Platform::Windows);
        assert_eq!(Platform::from_str("macos").unwrap(), Platform::Macos);
    }

    #[test]
    fn dialogue_request_deserializes_minimal() {
        let req: DialogueRequest = serde_json::from_str(r#"{"request": "hi"}"#).unwrap();
        assert_eq!(req.request, "hi");
        assert!(req.conversation_id.is_none());
        assert!(req.files.is_empty());
        assert!(!req.keep_alive);
    }

    #[test]
    fn dialogue_request_deserializes_with_files() {
        let req: DialogueRequest = serde_json::from_str(
            r#"{"request": "look at this", "files": [{"name": "a.txt", "content": "aGk=", "type": "text/plain"}]}"#,
        )
        .unwrap();
        assert_eq!(req.files.len(), 1);
        assert_eq!(req.files[0].file_type, "text/plain");
    }
}
