// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prometheus metrics adapter for the Tideway gateway.
//!
//! Uses the metrics-rs facade with the Prometheus exporter. Metrics are
//! rendered as Prometheus text format via `render()`, exposed through the
//! gateway's /metrics endpoint.

pub mod recording;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tideway_core::TidewayError;

pub use recording::{
    observe_dialogue_duration, record_admission_rejected, record_dialogue, set_active_sessions,
    set_usage_utilization,
};

/// Prometheus metrics adapter.
///
/// Installs the Prometheus recorder and exposes a handle for rendering
/// metrics in Prometheus text format.
pub struct PrometheusAdapter {
    handle: PrometheusHandle,
}

impl PrometheusAdapter {
    /// Create a new adapter, installing the global recorder.
    ///
    /// Only one recorder can be installed per process; a second install
    /// returns an error.
    pub fn new() -> Result<Self, TidewayError> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            TidewayError::Internal(format!("failed to install Prometheus recorder: {e}"))
        })?;
        recording::register_metrics();
        tracing::info!("prometheus metrics recorder installed");
        Ok(Self { handle })
    }

    /// Render all collected metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Get a clone of the render handle for the /metrics endpoint.
    pub fn handle(&self) -> PrometheusHandle {
        self.handle.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_installs_once_and_renders() {
        // Only one recorder per process: run everything in a single test.
        let adapter = PrometheusAdapter::new().expect("first install succeeds");
        assert!(PrometheusAdapter::new().is_err(), "second install rejected");

        record_dialogue("done");
        record_admission_rejected();
        set_active_sessions(3.0);
        set_usage_utilization("five_hour", 42.0);
        observe_dialogue_duration(1.25);

        let rendered = adapter.render();
        assert!(rendered.contains("tideway_dialogues_total"));
        assert!(rendered.contains("tideway_active_sessions"));
    }
}
