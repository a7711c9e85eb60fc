// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-wide minimum-gap pacer for outbound upstream calls.
//!
//! The pacer serializes issue, not carriage: the lock is held across the
//! sleep so concurrent callers queue up behind it, but it is released before
//! the actual network call.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum wall-clock gap between consecutive `wait()` returns.
#[derive(Debug)]
pub struct RatePacer {
    interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RatePacer {
    /// A pacer with the given gap in milliseconds. Zero disables pacing.
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            last_call: Mutex::new(None),
        }
    }

    /// Sleep until at least the configured gap has passed since the previous
    /// caller returned, then stamp the clock.
    pub async fn wait(&self) {
        if self.interval.is_zero() {
            return;
        }
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.interval {
                tokio::time::sleep(self.interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_call_does_not_sleep() {
        let pacer = RatePacer::new(10_000);
        let start = Instant::now();
        pacer.wait().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn second_call_waits_the_gap() {
        tokio::time::pause();
        let pacer = RatePacer::new(500);
        pacer.wait().await;
        let start = Instant::now();
        pacer.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn zero_interval_disables_pacing() {
        let pacer = RatePacer::new(0);
        let start = Instant::now();
        for _ in 0..10 {
            pacer.wait().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn concurrent_callers_are_serialized() {
        tokio::time::pause();
        let pacer = std::sync::Arc::new(RatePacer::new(100));
        let mut handles = Vec::new();
        for _ in 0..3 {
            let pacer = pacer.clone();
            handles.push(tokio::spawn(async move {
                pacer.wait().await;
                Instant::now()
            }));
        }
        let mut times = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap());
        }
        times.sort();
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }
}
