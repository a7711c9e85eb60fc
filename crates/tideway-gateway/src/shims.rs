// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! OpenAI- and Ollama-compatible shims.
//!
//! Both map onto the dialogue pipeline with a fresh upstream conversation
//! per request. The upstream completion path produces no token counts, so
//! usage fields are zero — a known gap carried over deliberately.

use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;

use tideway_core::TidewayError;
use tideway_engine::pipeline::ProcessingRequest;
use tideway_engine::{DialogueTurn, ReplyMode};

use crate::handlers::{device_identity, error_response};
use crate::server::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiChatRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct OpenAiUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Deserialize)]
pub struct OllamaChatRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
}

/// First user message in the list, the prompt the pipeline carries.
fn user_message(messages: &[ChatMessage]) -> Option<String> {
    messages
        .iter()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
}

/// Run one shim request through the pipeline, tracking it in the
/// processing map for the dashboard.
async fn run_shim_dialogue(
    state: &AppState,
    headers: &HeaderMap,
    model: &str,
    prompt: String,
) -> Result<String, TidewayError> {
    let request_id = uuid::Uuid::new_v4().to_string();
    state.engine.processing.insert(
        request_id.clone(),
        ProcessingRequest {
            id: request_id.clone(),
            submit_time: chrono::Utc::now().to_rfc3339(),
            input_tokens: 0,
            user_message: prompt.clone(),
        },
    );

    let identity = device_identity(headers, None, None);
    let turn = DialogueTurn {
        conversation_id: None,
        request: prompt,
        model: if model.is_empty() || model == "default" {
            None
        } else {
            Some(model.to_string())
        },
        style: None,
        files: vec![],
        device_fingerprint: identity.fingerprint,
        platform: identity.platform,
        stream_mode: false,
    };

    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let result = state
        .engine
        .run_dialogue(turn, ReplyMode::Direct, events_tx)
        .await;
    state.engine.processing.remove(&request_id);
    result.map(|outcome| outcome.response)
}

/// POST /v1/chat/completions
pub async fn openai_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<OpenAiChatRequest>,
) -> Response {
    let Some(prompt) = user_message(&request.messages) else {
        return error_response(TidewayError::BadRequest("Messages cannot be empty".into()));
    };
    match run_shim_dialogue(&state, &headers, &request.model, prompt).await {
        Ok(content) => Json(json!({
            "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            "object": "chat.completion",
            "created": chrono::Utc::now().timestamp(),
            "model": request.model,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop",
            }],
            "usage": OpenAiUsage {
                prompt_tokens: 0,
                completion_tokens: 0,
                total_tokens: 0,
            },
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /v1/models
pub async fn openai_models(State(state): State<AppState>) -> Json<serde_json::Value> {
    let data: Vec<serde_json::Value> = state
        .engine
        .config
        .models
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "object": "model",
                "created": 0,
                "owned_by": m.owned_by,
            })
        })
        .collect();
    Json(json!({"object": "list", "data": data}))
}

/// POST /api/chat (Ollama shim)
pub async fn ollama_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<OllamaChatRequest>,
) -> Response {
    let Some(prompt) = user_message(&request.messages) else {
        return error_response(TidewayError::BadRequest("Messages cannot be empty".into()));
    };
    match run_shim_dialogue(&state, &headers, &request.model, prompt).await {
        Ok(content) => Json(json!({
            "model": request.model,
            "created_at": chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            "message": ChatMessage {
                role: "assistant".into(),
                content,
            },
            "done": true,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/tags (Ollama shim)
pub async fn ollama_tags(State(state): State<AppState>) -> Json<serde_json::Value> {
    let models: Vec<serde_json::Value> = state
        .engine
        .config
        .models
        .iter()
        .map(|m| {
            json!({
                "name": m.id,
                "modified_at": chrono::Utc::now().to_rfc3339(),
                "size": 0,
                "digest": "",
            })
        })
        .collect();
    Json(json!({"models": models}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_picks_the_first_user_role() {
        let messages = vec![
            ChatMessage {
                role: "system".into(),
                content: "be brief".into(),
            },
            ChatMessage {
                role: "user".into(),
                content: "hello".into(),
            },
            ChatMessage {
                role: "user".into(),
                content: "second".into(),
            },
        ];
        assert_eq!(user_message(&messages).as_deref(), Some("hello"));
    }

    #[test]
    fn user_message_none_without_user_roles() {
        let messages = vec![ChatMessage {
            role: "assistant".into(),
            content: "hi".into(),
        }];
        assert!(user_message(&messages).is_none());
    }

    #[test]
    fn openai_request_deserializes() {
        let request: OpenAiChatRequest = serde_json::from_str(
            r#"{"model": "claude-sonnet-4.5", "messages": [{"role": "user", "content": "hi"}]}"#,
        )
        .unwrap();
        assert_eq!(request.model, "claude-sonnet-4.5");
        assert_eq!(request.messages.len(), 1);
        assert!(!request.stream);
    }
}
