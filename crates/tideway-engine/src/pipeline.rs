// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The shared dialogue pipeline.
//!
//! Every ingress shape funnels into [`Engine::run_dialogue`]: usage gate,
//! conversation resolution, record creation, admission, file upload,
//! completion streaming, status transitions, and broker fan-out. Transports
//! differ only in how they deliver [`PipelineEvent`]s and in their
//! [`ReplyMode`].

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tideway_config::TidewayConfig;
use tideway_core::types::RequestFile;
use tideway_core::{DialogueStatus, TidewayError, SENTINEL_PARENT_UUID};
use tideway_mcp::McpSessionManager;
use tideway_store::queries::{conversations, devices, dialogues, prompts};
use tideway_store::Database;
use tideway_upstream::styles::style_payload;
use tideway_upstream::{CompletionRequest, UpstreamClient};

use crate::admission::AdmissionPool;
use crate::broker::EventBroker;
use crate::gate::UsageGate;
use crate::session::SessionManager;

/// How long a resuming request waits for the conversation's in-flight
/// generation before giving up.
const BUSY_WAIT_LIMIT: std::time::Duration = std::time::Duration::from_secs(60);
const BUSY_WAIT_STEP: std::time::Duration = std::time::Duration::from_millis(250);

/// How a transport settles the record after the upstream completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    /// HTTP, SSE, one-shot WebSocket: `processing -> done` directly.
    Direct,
    /// Persistent multiplexer: `processing -> replying`, then `done` only on
    /// a client ack.
    AckRequired,
}

/// One dialogue request, transport-independent.
#[derive(Debug, Clone, Default)]
pub struct DialogueTurn {
    pub conversation_id: Option<String>,
    pub request: String,
    pub model: Option<String>,
    pub style: Option<String>,
    pub files: Vec<RequestFile>,
    pub device_fingerprint: String,
    pub platform: String,
    /// Streaming transports set this so the sweeper can reap closed streams.
    pub stream_mode: bool,
}

/// Events delivered to the transport while the pipeline runs.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// The resolved (possibly freshly created) conversation uid.
    ConversationId(String),
    /// Cumulative assistant text after each delta.
    Content(String),
}

/// Final result of a successful dialogue.
#[derive(Debug, Clone)]
pub struct DialogueOutcome {
    pub conversation_uid: String,
    pub dialogue_id: i64,
    pub response: String,
}

/// A running non-dialogue completion (API shims), indexed by request id.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProcessingRequest {
    pub id: String,
    pub submit_time: String,
    pub input_tokens: i64,
    pub user_message: String,
}

/// Shared handles for the request-lifecycle engine.
pub struct Engine {
    pub config: Arc<TidewayConfig>,
    pub db: Arc<Database>,
    pub sessions: Arc<SessionManager>,
    pub admission: Arc<AdmissionPool>,
    pub gate: Arc<UsageGate>,
    pub upstream: Arc<UpstreamClient>,
    pub mcp: Arc<McpSessionManager>,
    pub broker: Arc<EventBroker>,
    /// Ephemeral descriptors for running shim completions.
    pub processing: DashMap<String, ProcessingRequest>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<TidewayConfig>,
        db: Arc<Database>,
        sessions: Arc<SessionManager>,
        admission: Arc<AdmissionPool>,
        gate: Arc<UsageGate>,
        upstream: Arc<UpstreamClient>,
        mcp: Arc<McpSessionManager>,
        broker: Arc<EventBroker>,
    ) -> Self {
        Self {
            config,
            db,
            sessions,
            admission,
            gate,
            upstream,
            mcp,
            broker,
            processing: DashMap::new(),
        }
    }

    /// Run one dialogue through the full lifecycle.
    ///
    /// `events` receives the conversation id and cumulative content; a
    /// dropped receiver only cancels the fan-out — the upstream completion
    /// still runs to the end and the record is stored.
    pub async fn run_dialogue(
        &self,
        turn: DialogueTurn,
        reply_mode: ReplyMode,
        events: mpsc::UnboundedSender<PipelineEvent>,
    ) -> Result<DialogueOutcome, TidewayError> {
        if turn.request.trim().is_empty() {
            return Err(TidewayError::BadRequest("Request cannot be empty".into()));
        }
        self.gate.check().await?;
        self.mcp.ensure_initialized().await;

        // Resolve the conversation and the parent cursor.
        let conversation_uid = match turn.conversation_id.as_deref() {
            Some(uid) if !uid.is_empty() => uid.to_string(),
            _ => self.upstream.create_conversation().await?,
        };
        let session = self.sessions.get_or_create(&conversation_uid).await;
        if turn.stream_mode {
            self.sessions.set_stream_mode(&conversation_uid, true).await;
        }
        let resuming = turn
            .conversation_id
            .as_deref()
            .is_some_and(|uid| !uid.is_empty());

        // Serialize generation within a conversation: wait for an in-flight
        // completion to settle, then give up as overloaded.
        if resuming {
            let mut waited = std::time::Duration::ZERO;
            while session.is_generating().await {
                if waited >= BUSY_WAIT_LIMIT {
                    return Err(TidewayError::Overloaded);
                }
                tokio::time::sleep(BUSY_WAIT_STEP).await;
                waited += BUSY_WAIT_STEP;
            }
        }

        let mut parent_message_uuid = session.parent_cursor().await;
        if resuming && parent_message_uuid == SENTINEL_PARENT_UUID {
            parent_message_uuid = self.upstream.get_history(&conversation_uid).await?;
            self.sessions
                .update_cursor(&conversation_uid, &parent_message_uuid)
                .await;
        }
        let _ = events.send(PipelineEvent::ConversationId(conversation_uid.clone()));

        // Durable rows: device, conversation, dialogue in `waiting`.
        let platform = if turn.platform.is_empty() {
            "windows".to_string()
        } else {
            turn.platform.clone()
        };
        let device = devices::get_or_create(&self.db, &turn.device_fingerprint, &platform).await?;
        let conversation =
            conversations::get_or_create(&self.db, device.id, &conversation_uid).await?;
        let prompt_id = prompts::current_id(&self.db).await.unwrap_or(None);
        let dialogue = dialogues::create(
            &self.db,
            conversation.id,
            &uuid::Uuid::new_v4().to_string(),
            &turn.request,
            prompt_id,
        )
        .await?;
        debug!(
            conversation = conversation_uid.as_str(),
            dialogue = dialogue.id,
            ordinal = dialogue.ordinal,
            "dialogue created"
        );

        self.sessions.set_generating(&conversation_uid, true).await;
        self.db.stats().increment_processing();
        self.publish_dialogues().await;
        self.publish_stats().await;

        let result = self
            .execute(&turn, reply_mode, &conversation_uid, &parent_message_uuid, dialogue.id, &events)
            .await;

        // Release on every exit path.
        self.sessions.set_generating(&conversation_uid, false).await;
        self.db.stats().decrement_processing();
        self.publish_dialogues().await;
        self.publish_stats().await;

        result
    }

    /// Admission onward: everything that must release the slot when done.
    async fn execute(
        &self,
        turn: &DialogueTurn,
        reply_mode: ReplyMode,
        conversation_uid: &str,
        parent_message_uuid: &str,
        dialogue_id: i64,
        events: &mpsc::UnboundedSender<PipelineEvent>,
    ) -> Result<DialogueOutcome, TidewayError> {
        let _permit = match self.admission.try_acquire() {
            Ok(permit) => permit,
            Err(e) => {
                self.fail_dialogue(dialogue_id).await;
                return Err(e);
            }
        };

        dialogues::mark_processing(&self.db, dialogue_id).await?;

        // Upload attachments before the completion.
        let mut attachments = Vec::new();
        for file in &turn.files {
            match self.upstream.upload_file(conversation_uid, file).await {
                Ok(attachment) => attachments.push(attachment),
                Err(e) => {
                    warn!(error = %e, file = file.name.as_str(), "file upload failed");
                    self.fail_dialogue(dialogue_id).await;
                    return Err(e);
                }
            }
        }

        let tools = self.mcp.tools_for_request().await;
        let prompt = match self.system_template().await {
            Some(template) => format!("{template}\n\n{}", turn.request),
            None => turn.request.clone(),
        };
        let style_key = turn
            .style
            .clone()
            .or_else(|| self.config.default_style.clone())
            .unwrap_or_default();
        let request = CompletionRequest {
            conversation_uid: conversation_uid.to_string(),
            prompt,
            parent_message_uuid: parent_message_uuid.to_string(),
            model_key: turn.model.clone().or_else(|| self.config.default_model.clone()),
            style_payload: style_payload(&self.config, &style_key),
            tools,
            attachments,
        };

        let events_tx = events.clone();
        let completion = self
            .upstream
            .send_completion(&request, move |cumulative| {
                let _ = events_tx.send(PipelineEvent::Content(cumulative.to_string()));
            })
            .await;

        let response = match completion {
            Ok(text) => text,
            Err(e) => {
                self.fail_dialogue(dialogue_id).await;
                return Err(e);
            }
        };

        // Refresh the parent cursor; a failure here only affects the next
        // resume, not this dialogue.
        match self.upstream.get_history(conversation_uid).await {
            Ok(cursor) => self.sessions.update_cursor(conversation_uid, &cursor).await,
            Err(e) => warn!(error = %e, "parent cursor refresh failed"),
        }

        let final_status = match reply_mode {
            ReplyMode::Direct => DialogueStatus::Done,
            ReplyMode::AckRequired => DialogueStatus::Replying,
        };
        dialogues::finish(&self.db, dialogue_id, Some(&response), final_status).await?;
        if final_status == DialogueStatus::Done {
            self.db.stats().increment_completed();
        }
        self.publish_history().await;
        self.publish_stats().await;
        info!(
            dialogue = dialogue_id,
            status = %final_status,
            chars = response.len(),
            "dialogue completed"
        );

        Ok(DialogueOutcome {
            conversation_uid: conversation_uid.to_string(),
            dialogue_id,
            response,
        })
    }

    /// Terminal failure bookkeeping shared by every error path.
    async fn fail_dialogue(&self, dialogue_id: i64) {
        if let Err(e) =
            dialogues::finish(&self.db, dialogue_id, None, DialogueStatus::SendFailed).await
        {
            warn!(error = %e, dialogue = dialogue_id, "failed to mark dialogue send_failed");
        }
        self.db.stats().increment_failed();
        self.publish_history().await;
        self.publish_stats().await;
    }

    /// Client ack for a `replying` dialogue: transition to `done`.
    ///
    /// An ack for an unknown or already-settled dialogue is a no-op success.
    pub async fn ack_dialogue(&self, dialogue_id: i64) -> Result<bool, TidewayError> {
        let transitioned = dialogues::ack_done(&self.db, dialogue_id).await?;
        if transitioned {
            self.db.stats().increment_completed();
            self.publish_history().await;
            self.publish_stats().await;
        }
        Ok(transitioned)
    }

    /// Ack window expired: transition `replying -> reply_failed`.
    pub async fn ack_timed_out(&self, dialogue_id: i64) -> Result<bool, TidewayError> {
        let transitioned = dialogues::ack_timeout(&self.db, dialogue_id).await?;
        if transitioned {
            warn!(dialogue = dialogue_id, "ack window expired, reply_failed");
            self.db.stats().increment_failed();
            self.publish_history().await;
            self.publish_stats().await;
        }
        Ok(transitioned)
    }

    /// System template: latest stored prompt version, else the config value.
    async fn system_template(&self) -> Option<String> {
        if let Ok(Some(prompt)) = prompts::latest(&self.db).await {
            if !prompt.prompt.trim().is_empty() {
                return Some(prompt.prompt);
            }
        }
        self.config
            .system_prompt
            .clone()
            .filter(|s| !s.trim().is_empty())
    }

    // --- Broker payloads -------------------------------------------------

    /// Counters, rates, and the shutdown latch in one payload.
    pub async fn stats_payload(&self) -> serde_json::Value {
        let counters = self.db.stats().snapshot();
        let rates = dialogues::rate_triple(&self.db).await.unwrap_or_default();
        serde_json::json!({
            "processing": counters.processing,
            "completed": counters.completed,
            "failed": counters.failed,
            "tpm": rates.tpm,
            "rpm": rates.rpm,
            "rpd": rates.rpd,
            "service_shutdown": counters.service_shutdown,
            "shutdown_reason": self.db.stats().shutdown_reason(),
        })
    }

    pub async fn publish_stats(&self) {
        let payload = self.stats_payload().await;
        self.broker.publish("stats", payload.to_string());
    }

    pub async fn publish_history(&self) {
        if let Ok(history) = dialogues::history(&self.db, 100).await {
            if let Ok(data) = serde_json::to_string(&history) {
                self.broker.publish("history", data);
            }
        }
    }

    pub async fn publish_dialogues(&self) {
        if let Ok(summaries) = conversations::list_summaries(&self.db).await {
            if let Ok(data) = serde_json::to_string(&summaries) {
                self.broker.publish("dialogues", data);
            }
        }
    }

    pub async fn publish_usage(&self) {
        let payload = self.gate.payload().await;
        self.broker.publish("usage", payload.to_string());
    }

    pub async fn publish_apis(&self) {
        self.broker.publish("apis", api_catalog().to_string());
    }
}

/// The API catalog served on the dashboard `apis` channel.
pub fn api_catalog() -> serde_json::Value {
    serde_json::json!([
        {"path": "/v1/chat/completions", "description": "OpenAI-compatible chat API", "method": "POST"},
        {"path": "/v1/models", "description": "List available models", "method": "GET"},
        {"path": "/api/chat", "description": "Ollama-compatible chat API", "method": "POST"},
        {"path": "/api/tags", "description": "Ollama-compatible model list", "method": "GET"},
        {"path": "/health", "description": "Health check", "method": "GET"},
        {"path": "/api/stats", "description": "Gateway statistics", "method": "GET"},
        {"path": "/api/records", "description": "Recent dialogue records", "method": "POST"},
        {"path": "/api/record/:id", "description": "Single record detail", "method": "GET"},
        {"path": "/api/processing", "description": "In-flight requests", "method": "GET"},
        {"path": "/api/usage", "description": "Upstream quota usage", "method": "GET"},
        {"path": "/api/dialogues", "description": "Conversation list", "method": "GET"},
        {"path": "/api/dialogues/:id/history", "description": "Conversation history", "method": "GET"},
        {"path": "/chat/dialogue/http", "description": "Dialogue chat with long timeout", "method": "POST"},
        {"path": "/chat/dialogue/event", "description": "Dialogue SSE streaming", "method": "GET"},
        {"path": "/chat/dialogue/websocket", "description": "Dialogue WebSocket streaming", "method": "GET"},
        {"path": "/data/websocket/create", "description": "Persistent multiplexed WebSocket", "method": "GET"},
    ])
}
