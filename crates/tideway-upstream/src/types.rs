// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request and response types for the vendor web protocol.

use serde::{Deserialize, Serialize};

/// An attachment descriptor carried in a completion request, built from a
/// prior upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAttachment {
    pub file_uuid: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    #[serde(default)]
    pub extracted_content: String,
}

/// Response body of the multipart file upload endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedFile {
    #[serde(default)]
    pub file_uuid: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub sanitized_name: String,
    #[serde(default)]
    pub size_bytes: i64,
}

/// Everything needed to issue one completion against an upstream conversation.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub conversation_uid: String,
    /// Prompt text, already prefixed with the system template when one is set.
    pub prompt: String,
    /// Parent cursor anchoring the chain; the sentinel starts a new chain.
    pub parent_message_uuid: String,
    /// Model key from the client request; empty or "default" means upstream default.
    pub model_key: Option<String>,
    /// Resolved `personalized_styles` payload, already built; None omits it.
    pub style_payload: Option<serde_json::Value>,
    /// Tool list: MCP tools when available, else exactly the two built-ins.
    pub tools: Vec<serde_json::Value>,
    pub attachments: Vec<FileAttachment>,
}

/// Map a client-facing model key onto the upstream model identifier.
///
/// Only keys in the closed mapping produce a `model` field; the upstream
/// default model is selected by omitting the field.
pub fn upstream_model_id(model_key: &str) -> Option<&'static str> {
    match model_key {
        "opus-4.1" | "claude-opus-4.1" => Some("claude-opus-4-1-20250805"),
        _ => None,
    }
}

/// The two synthetic tools always appended to the completion tool list.
pub fn builtin_tools() -> Vec<serde_json::Value> {
    vec![
        serde_json::json!({"type": "web_search_v0", "name": "web_search"}),
        serde_json::json!({"type": "artifacts_v0", "name": "artifacts"}),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_mapping_is_closed() {
        assert_eq!(upstream_model_id("opus-4.1"), Some("claude-opus-4-1-20250805"));
        assert_eq!(upstream_model_id("sonnet-4.5"), None);
        assert_eq!(upstream_model_id("default"), None);
        assert_eq!(upstream_model_id(""), None);
    }

    #[test]
    fn builtin_tools_are_exactly_two() {
        let tools = builtin_tools();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0]["type"], "web_search_v0");
        assert_eq!(tools[1]["type"], "artifacts_v0");
    }

    #[test]
    fn upload_response_tolerates_missing_fields() {
        let parsed: UploadedFile = serde_json::from_str(r#"{"file_uuid": "f-1"}"#).unwrap();
        assert_eq!(parsed.file_uuid, "f-1");
        assert_eq!(parsed.size_bytes, 0);
    }
}
