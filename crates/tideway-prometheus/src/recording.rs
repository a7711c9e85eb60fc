// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so any recorder (Prometheus, statsd, etc.)
//! can collect these metrics.

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// Register all Tideway metric descriptions.
///
/// Called once at startup after the recorder is installed.
pub fn register_metrics() {
    describe_counter!(
        "tideway_dialogues_total",
        "Dialogues settled, labeled by terminal status"
    );
    describe_counter!(
        "tideway_admission_rejected_total",
        "Requests rejected by the admission pool"
    );
    describe_gauge!("tideway_active_sessions", "Live in-memory dialogue sessions");
    describe_gauge!(
        "tideway_usage_utilization_percent",
        "Upstream quota utilization per window"
    );
    describe_histogram!(
        "tideway_dialogue_duration_seconds",
        "Wall-clock dialogue duration"
    );
}

/// Record a settled dialogue with its terminal status.
pub fn record_dialogue(status: &str) {
    metrics::counter!("tideway_dialogues_total", "status" => status.to_string()).increment(1);
}

/// Record an admission-pool rejection.
pub fn record_admission_rejected() {
    metrics::counter!("tideway_admission_rejected_total").increment(1);
}

/// Set the live session count.
pub fn set_active_sessions(count: f64) {
    metrics::gauge!("tideway_active_sessions").set(count);
}

/// Set one usage window's utilization percentage.
pub fn set_usage_utilization(window: &str, percent: f64) {
    metrics::gauge!("tideway_usage_utilization_percent", "window" => window.to_string())
        .set(percent);
}

/// Observe one dialogue's duration.
pub fn observe_dialogue_duration(seconds: f64) {
    metrics::histogram!("tideway_dialogue_duration_seconds").record(seconds);
}
