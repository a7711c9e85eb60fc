// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Upstream quota usage fetch with a tolerant response parse.
//!
//! The usage endpoint has been observed in two shapes: `five_hour` /
//! `seven_day` blocks and older `daily` / `monthly` blocks, with utilization
//! either as a 0..1 `usage` fraction or a 0..100 `utilization` percentage.
//! Both are normalized to integer percentages.

use std::time::Duration;

use tideway_core::types::{UsageSnapshot, UsageWindow};
use tideway_core::TidewayError;

use crate::client::UpstreamClient;

impl UpstreamClient {
    /// Fetch the current usage snapshot from the upstream.
    pub async fn fetch_usage(&self) -> Result<UsageSnapshot, TidewayError> {
        self.pace().await;

        let response = self
            .http()
            .get(self.org_url("/usage"))
            .header("Cookie", self.cookie().to_string())
            .header("Accept", "*/*")
            .header("anthropic-client-platform", "web_claude_ai")
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| TidewayError::Upstream {
                message: format!("usage request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if status != reqwest::StatusCode::OK {
            return Err(TidewayError::Upstream {
                message: format!("usage returned {status}: {text}"),
                source: None,
            });
        }

        let raw: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| TidewayError::Upstream {
                message: format!("usage response unparseable: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(parse_usage(&raw))
    }
}

/// Normalize a raw usage body into a snapshot, tolerating both observed shapes.
pub fn parse_usage(raw: &serde_json::Value) -> UsageSnapshot {
    UsageSnapshot {
        five_hour: parse_window(raw, &["five_hour", "daily"]),
        seven_day: parse_window(raw, &["seven_day", "monthly"]),
        seven_day_opus: parse_window(raw, &["seven_day_opus"]),
    }
}

fn parse_window(raw: &serde_json::Value, keys: &[&str]) -> UsageWindow {
    for key in keys {
        if let Some(block) = raw.get(key).filter(|b| b.is_object()) {
            let utilization = if let Some(fraction) = block.get("usage").and_then(|v| v.as_f64()) {
                (fraction * 100.0) as i64
            } else {
                block
                    .get("utilization")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0) as i64
            };
            let resets_at = block
                .get("resets_at")
                .or_else(|| block.get("reset_at"))
                .and_then(|v| v.as_str())
                .map(str::to_string);
            return UsageWindow {
                utilization,
                resets_at,
            };
        }
    }
    UsageWindow::default()
}
