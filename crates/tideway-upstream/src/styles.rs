// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Style presets attached as `personalized_styles` payloads.
//!
//! The preset set is closed: config-defined styles first, then the two
//! compiled-in presets. An unknown or empty style key omits the payload.

use tideway_config::model::StyleEntry;
use tideway_config::TidewayConfig;

/// The compiled-in presets, available without configuration.
pub fn builtin_styles() -> Vec<StyleEntry> {
    vec![
        StyleEntry {
            key: "concise".into(),
            name: "Concise".into(),
            summary: "Shorter responses & more messages".into(),
            prompt: "Claude is operating in Concise Mode. In this mode, Claude aims to reduce \
                     its output tokens while maintaining its helpfulness, quality, completeness, \
                     and accuracy. Claude provides answers without much unneeded preamble or \
                     postamble, focusing on the specific query at hand. Claude does not \
                     compromise on completeness, correctness, appropriateness, or helpfulness \
                     for the sake of brevity."
                .into(),
        },
        StyleEntry {
            key: "explanatory".into(),
            name: "Explanatory".into(),
            summary: "Educational responses for learning".into(),
            prompt: "Claude aims to give clear, thorough explanations that help the human \
                     deeply understand complex topics. Claude approaches questions like a \
                     teacher would, breaking down ideas into easier parts and building up to \
                     harder concepts, using comparisons, examples, and step-by-step \
                     explanations."
                .into(),
        },
    ]
}

/// Resolve a style key against config-defined styles, then the built-ins.
///
/// Returns the `personalized_styles` payload, or None for unknown/empty keys
/// and the "normal" default.
pub fn style_payload(config: &TidewayConfig, style_key: &str) -> Option<serde_json::Value> {
    if style_key.is_empty() || style_key == "normal" {
        return None;
    }
    let entry = config
        .style(style_key)
        .cloned()
        .or_else(|| builtin_styles().into_iter().find(|s| s.key == style_key))?;
    Some(serde_json::json!([{
        "type": "preset",
        "key": entry.name,
        "name": entry.name,
        "prompt": entry.prompt,
    }]))
}
