// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process publish/subscribe for dashboard SSE.
//!
//! Subscribers register a bounded channel; publishers offer messages with a
//! non-blocking send, so a slow subscriber misses events but never stalls a
//! publisher. Channels: `stats`, `history`, `dialogues`, `usage`, `apis`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

/// Per-subscriber buffer depth.
const SUBSCRIBER_BUFFER: usize = 32;

/// One published event.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub event: String,
    pub data: String,
}

/// The subscriber set. All methods are synchronous and non-blocking.
#[derive(Default)]
pub struct EventBroker {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<BrokerMessage>>>,
    next_id: AtomicU64,
}

impl EventBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; returns its id (for unsubscribe) and receiver.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<BrokerMessage>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .expect("broker lock poisoned")
            .insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers
            .lock()
            .expect("broker lock poisoned")
            .remove(&id);
    }

    /// Offer a message to every subscriber without blocking.
    ///
    /// Full buffers drop the message for that subscriber; closed receivers
    /// are pruned.
    pub fn publish(&self, event: impl Into<String>, data: impl Into<String>) {
        let message = BrokerMessage {
            event: event.into(),
            data: data.into(),
        };
        let mut dead = Vec::new();
        let subscribers = self.subscribers.lock().expect("broker lock poisoned");
        for (id, tx) in subscribers.iter() {
            match tx.try_send(message.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(subscriber = id, event = message.event.as_str(), "slow subscriber, dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dead.push(*id),
            }
        }
        drop(subscribers);
        if !dead.is_empty() {
            let mut subscribers = self.subscribers.lock().expect("broker lock poisoned");
            for id in dead {
                subscribers.remove(&id);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("broker lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let broker = EventBroker::new();
        let (_id, mut rx) = broker.subscribe();
        broker.publish("stats", r#"{"processing":0}"#);
        let message = rx.recv().await.unwrap();
        assert_eq!(message.event, "stats");
        assert_eq!(message.data, r#"{"processing":0}"#);
    }

    #[tokio::test]
    async fn slow_subscribers_drop_events_without_stalling_publishers() {
        let broker = EventBroker::new();
        let (_id, mut rx) = broker.subscribe();
        // Overfill the buffer; publish must not block.
        for i in 0..(SUBSCRIBER_BUFFER + 10) {
            broker.publish("history", format!("{i}"));
        }
        // The buffer holds the first SUBSCRIBER_BUFFER messages; the rest were dropped.
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_BUFFER);
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let broker = EventBroker::new();
        let (_id, rx) = broker.subscribe();
        drop(rx);
        broker.publish("usage", "{}");
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_removes_the_channel() {
        let broker = EventBroker::new();
        let (id, _rx) = broker.subscribe();
        assert_eq!(broker.subscriber_count(), 1);
        broker.unsubscribe(id);
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_a_copy() {
        let broker = EventBroker::new();
        let (_a, mut rx_a) = broker.subscribe();
        let (_b, mut rx_b) = broker.subscribe();
        broker.publish("dialogues", "[]");
        assert_eq!(rx_a.recv().await.unwrap().event, "dialogues");
        assert_eq!(rx_b.recv().await.unwrap().event, "dialogues");
    }
}
