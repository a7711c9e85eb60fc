// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SSE decoder for the vendor completion stream.
//!
//! Converts a reqwest response byte stream into typed [`CompletionEvent`]s
//! using the `eventsource-stream` crate, and drives the cumulative-text
//! accumulator that is the authoritative assistant-message text.

use std::pin::Pin;

use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use tideway_core::TidewayError;

/// Typed events from the vendor completion stream.
#[derive(Debug, Clone)]
pub enum CompletionEvent {
    /// Incremental text from a `content_block_delta` event.
    Delta(String),
    /// The completion finished successfully.
    MessageStop,
    /// The upstream reported an error mid-stream; payload is the raw data.
    Error(String),
}

#[derive(Debug, Deserialize)]
struct DeltaEvent {
    #[serde(default)]
    delta: DeltaPayload,
}

#[derive(Debug, Default, Deserialize)]
struct DeltaPayload {
    #[serde(default)]
    text: Option<String>,
}

/// Parse a streaming response into completion events.
///
/// Event types other than `content_block_delta`, `message_stop`, and `error`
/// are silently skipped per the upstream's versioning behavior. A delta
/// without text (e.g. a tool-use delta) is also skipped.
pub fn parse_completion_stream(
    response: reqwest::Response,
) -> Pin<Box<dyn Stream<Item = Result<CompletionEvent, TidewayError>> + Send>> {
    let event_stream = response.bytes_stream().eventsource();

    let mapped = event_stream.filter_map(|result| async move {
        match result {
            Ok(event) => match event.event.as_str() {
                "content_block_delta" => {
                    match serde_json::from_str::<DeltaEvent>(&event.data) {
                        Ok(parsed) => parsed
                            .delta
                            .text
                            .map(|text| Ok(CompletionEvent::Delta(text))),
                        // Non-text deltas and malformed payloads are skipped,
                        // matching the lenient upstream decode.
                        Err(_) => None,
                    }
                }
                "message_stop" => Some(Ok(CompletionEvent::MessageStop)),
                "error" => Some(Ok(CompletionEvent::Error(event.data))),
                _ => None,
            },
            Err(e) => Some(Err(TidewayError::Upstream {
                message: format!("SSE stream error: {e}"),
                source: None,
            })),
        }
    });

    Box::pin(mapped)
}

/// Drive a completion stream to its end, invoking `on_cumulative` with the
/// full accumulated text after every delta.
///
/// Returns the accumulator on `message_stop`. A stream that ends without
/// `message_stop`, or that emits an `error` event, fails — the accumulated
/// text is discarded by the caller in that case.
pub async fn accumulate(
    mut stream: Pin<Box<dyn Stream<Item = Result<CompletionEvent, TidewayError>> + Send>>,
    mut on_cumulative: impl FnMut(&str),
) -> Result<String, TidewayError> {
    let mut full_text = String::new();
    while let Some(event) = stream.next().await {
        match event? {
            CompletionEvent::Delta(text) => {
                full_text.push_str(&text);
                on_cumulative(&full_text);
            }
            CompletionEvent::MessageStop => return Ok(full_text),
            CompletionEvent::Error(data) => {
                return Err(TidewayError::Upstream {
                    message: format!("received error event: {data}"),
                    source: None,
                });
            }
        }
    }
    Err(TidewayError::Upstream {
        message: "completion stream ended without message_stop".into(),
        source: None,
    })
}
