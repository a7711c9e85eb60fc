// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reverse-path MCP bridging: WebSocket JSON-RPC frames to an HTTP backend.
//!
//! The gateway hosts an MCP server endpoint by upgrading a vendor-facing
//! WebSocket and forwarding each inbound JSON-RPC text frame verbatim as an
//! HTTP POST to the connector's backend URL. This module is the
//! transport-agnostic core: the gateway's WebSocket route feeds frames in
//! and writes the returned bytes back.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

/// Truncation bound for backend bodies echoed into JSON-RPC error data.
const ERROR_DATA_LIMIT: usize = 500;

/// Forward one inbound frame to the backend and produce the bytes to write
/// back on the WebSocket.
///
/// Error mapping: unparseable frame -> `-32700`, transport failure ->
/// `-32603`, non-200 backend status -> `-32000` carrying the status and a
/// truncated body.
pub async fn forward_frame(
    http: &reqwest::Client,
    backend_url: &str,
    frame: &str,
) -> String {
    let parsed: Result<Value, _> = serde_json::from_str(frame);
    let request = match parsed {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "unparseable JSON-RPC frame");
            return error_response(Value::from(0), -32700, "Parse error", None);
        }
    };
    let id = request.get("id").cloned().unwrap_or(Value::from(0));
    let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
    debug!(method, "forwarding JSON-RPC frame to backend");

    let response = http
        .post(backend_url)
        .header("Content-Type", "application/json")
        .header("Accept", "application/json")
        .timeout(Duration::from_secs(60))
        .body(frame.to_string())
        .send()
        .await;

    let response = match response {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "backend forward failed");
            return error_response(id, -32603, &format!("Internal error: {e}"), None);
        }
    };

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status != reqwest::StatusCode::OK {
        warn!(status = %status, "backend returned error status");
        return error_response(
            id,
            -32000,
            &format!("MCP server error: status {}", status.as_u16()),
            Some(truncate(&body, ERROR_DATA_LIMIT)),
        );
    }
    body
}

fn error_response(id: Value, code: i64, message: &str, data: Option<String>) -> String {
    let mut error = serde_json::json!({
        "code": code,
        "message": message,
    });
    if let Some(data) = data {
        error["data"] = Value::String(data);
    }
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": error,
    })
    .to_string()
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn forwards_frame_bytes_verbatim() {
        let server = MockServer::start().await;
        let frame = r#"{"jsonrpc":"2.0","id":7,"method":"tools/list","params":{}}"#;
        Mock::given(method("POST"))
            .and(body_string(frame))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"jsonrpc":"2.0","id":7,"result":{"tools":[]}}"#),
            )
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let response = forward_frame(&http, &server.uri(), frame).await;
        let parsed: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(parsed["id"], 7);
        assert!(parsed["result"]["tools"].is_array());
    }

    #[tokio::test]
    async fn parse_error_is_32700() {
        let http = reqwest::Client::new();
        let response = forward_frame(&http, "http://127.0.0.1:1", "{not json").await;
        let parsed: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(parsed["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn transport_failure_is_32603_with_request_id() {
        let http = reqwest::Client::new();
        let frame = r#"{"jsonrpc":"2.0","id":9,"method":"tools/call"}"#;
        let response = forward_frame(&http, "http://127.0.0.1:1", frame).await;
        let parsed: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(parsed["error"]["code"], -32603);
        assert_eq!(parsed["id"], 9);
    }

    #[tokio::test]
    async fn backend_error_status_is_32000_with_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let frame = r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#;
        let response = forward_frame(&http, &server.uri(), frame).await;
        let parsed: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(parsed["error"]["code"], -32000);
        assert!(parsed["error"]["message"]
            .as_str()
            .unwrap()
            .contains("502"));
        assert_eq!(parsed["error"]["data"], "bad gateway");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "héllo wörld".repeat(100);
        let cut = truncate(&text, 500);
        assert!(cut.len() <= 504);
        assert!(cut.ends_with("..."));
    }
}
