// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Usage gate: the quota-based admission predicate evaluated before each
//! dialogue.
//!
//! A background poller refreshes the upstream usage snapshot every three
//! minutes; the gate itself only reads the cached snapshot, so the per-
//! request check never touches the network.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tideway_core::types::{UsageSnapshot, UsageVerdict};
use tideway_core::TidewayError;
use tideway_upstream::UpstreamClient;

/// Poll cadence for the upstream usage endpoint.
const POLL_INTERVAL: Duration = Duration::from_secs(180);

/// Cached usage snapshot plus the configured limits.
pub struct UsageGate {
    snapshot: RwLock<UsageSnapshot>,
    limit_five_hour: i64,
    limit_seven_day: i64,
}

impl UsageGate {
    /// Limits of 0 disable the corresponding window.
    pub fn new(limit_five_hour: i64, limit_seven_day: i64) -> Self {
        Self {
            snapshot: RwLock::new(UsageSnapshot::default()),
            limit_five_hour,
            limit_seven_day,
        }
    }

    /// Replace the cached snapshot (poller and tests).
    pub async fn update(&self, snapshot: UsageSnapshot) {
        *self.snapshot.write().await = snapshot;
    }

    pub async fn snapshot(&self) -> UsageSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Evaluate the gate against the cached snapshot.
    ///
    /// Blocked when either enabled window is at or past its limit. The
    /// reason names every tripped window; the reset time is the soonest
    /// reset among them.
    pub async fn verdict(&self) -> UsageVerdict {
        let snapshot = self.snapshot.read().await;
        let mut reasons = Vec::new();
        let mut resets = Vec::new();

        if self.limit_five_hour > 0 && snapshot.five_hour.utilization >= self.limit_five_hour {
            reasons.push(format!(
                "5-hour usage at {}%/{}%",
                snapshot.five_hour.utilization, self.limit_five_hour
            ));
            if let Some(ref reset) = snapshot.five_hour.resets_at {
                resets.push(reset.clone());
            }
        }
        if self.limit_seven_day > 0 && snapshot.seven_day.utilization >= self.limit_seven_day {
            reasons.push(format!(
                "7-day usage at {}%/{}%",
                snapshot.seven_day.utilization, self.limit_seven_day
            ));
            if let Some(ref reset) = snapshot.seven_day.resets_at {
                resets.push(reset.clone());
            }
        }

        if reasons.is_empty() {
            return UsageVerdict::default();
        }
        resets.sort();
        UsageVerdict {
            is_blocked: true,
            block_reason: reasons.join("\n"),
            block_reset_time: resets.into_iter().next().unwrap_or_default(),
        }
    }

    /// Gate check for the pipeline: `Err(UsageBlocked)` when tripped.
    pub async fn check(&self) -> Result<(), TidewayError> {
        let verdict = self.verdict().await;
        if verdict.is_blocked {
            return Err(TidewayError::UsageBlocked {
                reason: verdict.block_reason,
                reset_time: if verdict.block_reset_time.is_empty() {
                    None
                } else {
                    Some(verdict.block_reset_time)
                },
            });
        }
        Ok(())
    }

    /// The flat usage payload served to clients and dashboards.
    pub async fn payload(&self) -> serde_json::Value {
        let snapshot = self.snapshot().await;
        let verdict = self.verdict().await;
        serde_json::json!({
            "five_hour_utilization": snapshot.five_hour.utilization,
            "five_hour_resets_at": snapshot.five_hour.resets_at,
            "seven_day_utilization": snapshot.seven_day.utilization,
            "seven_day_resets_at": snapshot.seven_day.resets_at,
            "seven_day_opus_utilization": snapshot.seven_day_opus.utilization,
            "seven_day_opus_resets_at": snapshot.seven_day_opus.resets_at,
            "is_blocked": verdict.is_blocked,
            "block_reason": verdict.block_reason,
            "block_reset_time": verdict.block_reset_time,
        })
    }

    /// Background poller: refresh now, then every three minutes until
    /// cancelled. `on_refresh` fires after every successful update so the
    /// caller can publish to the event broker.
    pub fn spawn_poller(
        self: &Arc<Self>,
        upstream: Arc<UpstreamClient>,
        cancel: CancellationToken,
        on_refresh: impl Fn() + Send + Sync + 'static,
    ) {
        let gate = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match upstream.fetch_usage().await {
                            Ok(snapshot) => {
                                info!(
                                    five_hour = snapshot.five_hour.utilization,
                                    seven_day = snapshot.seven_day.utilization,
                                    opus = snapshot.seven_day_opus.utilization,
                                    "usage refreshed"
                                );
                                gate.update(snapshot).await;
                                on_refresh();
                            }
                            Err(e) => warn!(error = %e, "usage refresh failed"),
                        }
                    }
                    _ = cancel.cancelled() => {
                        info!("usage poller shutting down");
                        break;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tideway_core::types::UsageWindow;

    fn snapshot(five_hour: i64, seven_day: i64) -> UsageSnapshot {
        UsageSnapshot {
            five_hour: UsageWindow {
                utilization: five_hour,
                resets_at: Some("2026-08-02T10:00:00Z".into()),
            },
            seven_day: UsageWindow {
                utilization: seven_day,
                resets_at: Some("2026-08-05T00:00:00Z".into()),
            },
            seven_day_opus: UsageWindow::default(),
        }
    }

    #[tokio::test]
    async fn fresh_gate_is_open() {
        let gate = UsageGate::new(90, 85);
        assert!(!gate.verdict().await.is_blocked);
        assert!(gate.check().await.is_ok());
    }

    #[tokio::test]
    async fn five_hour_limit_trips_at_the_boundary() {
        let gate = UsageGate::new(90, 85);
        gate.update(snapshot(89, 0)).await;
        assert!(!gate.verdict().await.is_blocked);

        gate.update(snapshot(90, 0)).await;
        let verdict = gate.verdict().await;
        assert!(verdict.is_blocked);
        assert_eq!(verdict.block_reason, "5-hour usage at 90%/90%");
        assert_eq!(verdict.block_reset_time, "2026-08-02T10:00:00Z");
    }

    #[tokio::test]
    async fn both_windows_tripped_reports_both_and_soonest_reset() {
        let gate = UsageGate::new(90, 85);
        gate.update(snapshot(95, 88)).await;
        let verdict = gate.verdict().await;
        assert!(verdict.is_blocked);
        assert!(verdict.block_reason.contains("5-hour usage at 95%/90%"));
        assert!(verdict.block_reason.contains("7-day usage at 88%/85%"));
        // Soonest reset wins.
        assert_eq!(verdict.block_reset_time, "2026-08-02T10:00:00Z");
    }

    #[tokio::test]
    async fn zero_limits_disable_the_gate() {
        let gate = UsageGate::new(0, 0);
        gate.update(snapshot(100, 100)).await;
        assert!(!gate.verdict().await.is_blocked);
    }

    #[tokio::test]
    async fn check_maps_to_usage_blocked_error() {
        let gate = UsageGate::new(90, 0);
        gate.update(snapshot(95, 0)).await;
        let err = gate.check().await.unwrap_err();
        match err {
            TidewayError::UsageBlocked { reason, reset_time } => {
                assert!(reason.contains("5-hour"));
                assert_eq!(reset_time.as_deref(), Some("2026-08-02T10:00:00Z"));
            }
            other => panic!("expected UsageBlocked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn payload_carries_flat_fields() {
        let gate = UsageGate::new(90, 85);
        gate.update(snapshot(42, 13)).await;
        let payload = gate.payload().await;
        assert_eq!(payload["five_hour_utilization"], 42);
        assert_eq!(payload["seven_day_utilization"], 13);
        assert_eq!(payload["is_blocked"], false);
    }
}
