// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the vendor web API.
//!
//! Provides [`UpstreamClient`] which handles request construction, the cookie
//! credential, proxy routing, conversation creation retry, and completion
//! streaming.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use tideway_config::TidewayConfig;
use tideway_core::{TidewayError, SENTINEL_PARENT_UUID};
use tracing::{debug, warn};

use crate::pacer::RatePacer;
use crate::sse;
use crate::types::{upstream_model_id, CompletionRequest};

/// Default base URL of the vendor web API.
const DEFAULT_BASE_URL: &str = "https://claude.ai";

/// Browser-shaped User-Agent the upstream expects.
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/141.0.0.0 Safari/537.36";

/// Timezone tag carried on completion requests.
const REQUEST_TIMEZONE: &str = "Asia/Shanghai";

const CREATE_RETRIES: u32 = 3;

/// Client for all upstream HTTP operations.
///
/// Shares one reqwest connection pool; every call waits on the rate pacer
/// before issue and carries the assembled cookie.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    org_id: String,
    cookie: String,
    pacer: Arc<RatePacer>,
}

impl UpstreamClient {
    /// Build a client from config: proxy settings, token block, pacing gap.
    pub fn new(config: &TidewayConfig, pacer: Arc<RatePacer>) -> Result<Self, TidewayError> {
        let mut headers = HeaderMap::new();
        headers.insert("User-Agent", HeaderValue::from_static(USER_AGENT));
        headers.insert("Accept-Language", HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"));
        headers.insert("Origin", HeaderValue::from_static("https://claude.ai"));
        headers.insert("Referer", HeaderValue::from_static("https://claude.ai/"));

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if config.proxy.enable {
            if let Some(ref https) = config.proxy.https {
                builder = builder.proxy(reqwest::Proxy::https(https).map_err(|e| {
                    TidewayError::Config(format!("invalid https proxy: {e}"))
                })?);
            }
            if let Some(ref http) = config.proxy.http {
                builder = builder.proxy(reqwest::Proxy::http(http).map_err(|e| {
                    TidewayError::Config(format!("invalid http proxy: {e}"))
                })?);
            }
        }
        let http = builder.build().map_err(|e| TidewayError::Upstream {
            message: format!("failed to build HTTP client: {e}"),
            source: Some(Box::new(e)),
        })?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            org_id: config.organization_id().to_string(),
            cookie: config.tokens.build_cookie(),
            pacer,
        })
    }

    /// Override the base URL (local mock servers, alternative frontends).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn cookie(&self) -> &str {
        &self.cookie
    }

    pub(crate) fn org_url(&self, suffix: &str) -> String {
        format!("{}/api/organizations/{}{}", self.base_url, self.org_id, suffix)
    }

    pub(crate) async fn pace(&self) {
        self.pacer.wait().await;
    }

    /// Create a temporary upstream conversation and return its uuid.
    ///
    /// Up to 3 attempts with linear backoff (attempt i sleeps i seconds).
    pub async fn create_conversation(&self) -> Result<String, TidewayError> {
        let mut last_error: Option<TidewayError> = None;

        for attempt in 0..CREATE_RETRIES {
            if attempt > 0 {
                warn!(attempt, "retrying conversation create");
                tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
            }
            self.pace().await;

            let body = serde_json::json!({
                "uuid": uuid::Uuid::new_v4().to_string(),
                "name": "",
                "is_temporary": true,
                "include_conversation_preferences": true,
            });
            let result = self
                .http
                .post(self.org_url("/chat_conversations"))
                .header("Cookie", &self.cookie)
                .timeout(Duration::from_secs(30))
                .json(&body)
                .send()
                .await;

            let response = match result {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(TidewayError::Upstream {
                        message: format!("conversation create request failed: {e}"),
                        source: Some(Box::new(e)),
                    });
                    continue;
                }
            };

            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            debug!(status = %status, attempt, "conversation create response");
            if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::CREATED {
                last_error = Some(TidewayError::Upstream {
                    message: format!("conversation create returned {status}: {text}"),
                    source: None,
                });
                continue;
            }

            let parsed: serde_json::Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(e) => {
                    last_error = Some(TidewayError::Upstream {
                        message: format!("conversation create response unparseable: {e}"),
                        source: Some(Box::new(e)),
                    });
                    continue;
                }
            };
            match parsed.get("uuid").and_then(|v| v.as_str()) {
                Some(uid) => return Ok(uid.to_string()),
                None => {
                    let fields: Vec<&str> = parsed
                        .as_object()
                        .map(|o| o.keys().map(String::as_str).collect())
                        .unwrap_or_default();
                    last_error = Some(TidewayError::Upstream {
                        message: format!(
                            "conversation create response has no uuid field (available fields: {fields:?})"
                        ),
                        source: None,
                    });
                }
            }
        }

        Err(last_error.unwrap_or_else(|| TidewayError::Upstream {
            message: format!("conversation create failed after {CREATE_RETRIES} attempts"),
            source: None,
        }))
    }

    /// Issue a completion and stream it to the end.
    ///
    /// `on_cumulative` is called with the full accumulated text after every
    /// delta; the returned string is the authoritative assistant text.
    pub async fn send_completion(
        &self,
        request: &CompletionRequest,
        on_cumulative: impl FnMut(&str),
    ) -> Result<String, TidewayError> {
        self.pace().await;

        let mut body = serde_json::json!({
            "prompt": request.prompt,
            "parent_message_uuid": request.parent_message_uuid,
            "timezone": REQUEST_TIMEZONE,
            "rendering_mode": "messages",
            "tools": request.tools,
            "attachments": request.attachments,
            "files": [],
        });
        if let Some(model_id) = request
            .model_key
            .as_deref()
            .and_then(upstream_model_id)
        {
            body["model"] = serde_json::Value::String(model_id.to_string());
        }
        if let Some(ref styles) = request.style_payload {
            body["personalized_styles"] = styles.clone();
        }

        let url = self.org_url(&format!(
            "/chat_conversations/{}/completion",
            request.conversation_uid
        ));
        let response = self
            .http
            .post(url)
            .header("Cookie", &self.cookie)
            .header("Accept", "text/event-stream")
            .header(
                "Referer",
                format!("https://claude.ai/chat/{}", request.conversation_uid),
            )
            .timeout(Duration::from_secs(300))
            .json(&body)
            .send()
            .await
            .map_err(|e| TidewayError::Upstream {
                message: format!("completion request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TidewayError::Upstream {
                message: format!("completion returned {status}: {text}"),
                source: None,
            });
        }

        sse::accumulate(sse::parse_completion_stream(response), on_cumulative).await
    }

    /// Fetch the conversation and return the uuid of its last message.
    ///
    /// An empty or absent message list returns the sentinel, which the
    /// upstream accepts as "start of chain".
    pub async fn get_history(&self, conversation_uid: &str) -> Result<String, TidewayError> {
        self.pace().await;

        let url = self.org_url(&format!("/chat_conversations/{conversation_uid}"));
        let response = self
            .http
            .get(url)
            .header("Cookie", &self.cookie)
            .header("Accept", "application/json, text/plain, */*")
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| TidewayError::Upstream {
                message: format!("history request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if status != reqwest::StatusCode::OK {
            return Err(TidewayError::Upstream {
                message: format!("history returned {status}: {text}"),
                source: None,
            });
        }

        let parsed: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| TidewayError::Upstream {
                message: format!("history response unparseable: {e}"),
                source: Some(Box::new(e)),
            })?;
        let cursor = parsed
            .get("chat_messages")
            .and_then(|m| m.as_array())
            .and_then(|m| m.last())
            .and_then(|m| m.get("uuid"))
            .and_then(|u| u.as_str())
            .unwrap_or(SENTINEL_PARENT_UUID);
        Ok(cursor.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> TidewayConfig {
        let mut config = TidewayConfig::default();
        config.tokens.organization_id = Some("org-test".into());
        config.tokens.session_key = Some("sk-test".into());
        config
    }

    fn test_client(base_url: &str) -> UpstreamClient {
        UpstreamClient::new(&test_config(), Arc::new(RatePacer::new(0)))
            .unwrap()
            .with_base_url(base_url.to_string())
    }

    #[tokio::test]
    async fn create_conversation_returns_uuid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/organizations/org-test/chat_conversations"))
            .and(header("Cookie", "sessionKey=sk-test; lastActiveOrg=org-test"))
            .and(body_partial_json(serde_json::json!({"is_temporary": true})))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(serde_json::json!({"uuid": "conv-1"})),
            )
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        assert_eq!(client.create_conversation().await.unwrap(), "conv-1");
    }

    #[tokio::test]
    async fn create_conversation_retries_transient_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/organizations/org-test/chat_conversations"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/organizations/org-test/chat_conversations"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"uuid": "conv-2"})),
            )
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        assert_eq!(client.create_conversation().await.unwrap(), "conv-2");
    }

    #[tokio::test]
    async fn create_conversation_reports_missing_uuid_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/organizations/org-test/chat_conversations"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"name": "x", "model": "m"})),
            )
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client.create_conversation().await.unwrap_err();
        let text = err.to_string();
        assert!(text.contains("no uuid field"), "got: {text}");
        assert!(text.contains("name"), "diagnostic should list fields, got: {text}");
    }

    #[tokio::test]
    async fn send_completion_posts_tools_and_decodes_stream() {
        let server = MockServer::start().await;
        let sse = "event: content_block_delta\n\
                   data: {\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n\n\
                   event: message_stop\ndata: {}\n\n";
        Mock::given(method("POST"))
            .and(path(
                "/api/organizations/org-test/chat_conversations/conv-1/completion",
            ))
            .and(body_partial_json(serde_json::json!({
                "parent_message_uuid": SENTINEL_PARENT_UUID,
                "rendering_mode": "messages",
                "tools": [
                    {"type": "web_search_v0", "name": "web_search"},
                    {"type": "artifacts_v0", "name": "artifacts"}
                ],
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse),
            )
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let request = CompletionRequest {
            conversation_uid: "conv-1".into(),
            prompt: "hello".into(),
            parent_message_uuid: SENTINEL_PARENT_UUID.into(),
            model_key: None,
            style_payload: None,
            tools: crate::types::builtin_tools(),
            attachments: vec![],
        };
        let text = client.send_completion(&request, |_| {}).await.unwrap();
        assert_eq!(text, "hi");
    }

    #[tokio::test]
    async fn send_completion_maps_model_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(
                serde_json::json!({"model": "claude-opus-4-1-20250805"}),
            ))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string("event: message_stop\ndata: {}\n\n"),
            )
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let request = CompletionRequest {
            conversation_uid: "conv-1".into(),
            prompt: "hello".into(),
            parent_message_uuid: SENTINEL_PARENT_UUID.into(),
            model_key: Some("opus-4.1".into()),
            style_payload: None,
            tools: crate::types::builtin_tools(),
            attachments: vec![],
        };
        client.send_completion(&request, |_| {}).await.unwrap();
    }

    #[tokio::test]
    async fn send_completion_fails_on_non_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let request = CompletionRequest {
            conversation_uid: "conv-1".into(),
            prompt: "hello".into(),
            parent_message_uuid: SENTINEL_PARENT_UUID.into(),
            model_key: None,
            style_payload: None,
            tools: vec![],
            attachments: vec![],
        };
        let err = client.send_completion(&request, |_| {}).await.unwrap_err();
        assert!(err.to_string().contains("403"), "got: {err}");
    }

    #[tokio::test]
    async fn history_extracts_last_message_uuid() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/organizations/org-test/chat_conversations/conv-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "chat_messages": [
                    {"uuid": "m-1"},
                    {"uuid": "m-2"}
                ]
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        assert_eq!(client.get_history("conv-1").await.unwrap(), "m-2");
    }

    #[tokio::test]
    async fn history_without_messages_returns_sentinel() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"chat_messages": []})),
            )
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        assert_eq!(
            client.get_history("conv-1").await.unwrap(),
            SENTINEL_PARENT_UUID
        );
    }
}
