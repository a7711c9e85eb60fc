// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Tideway request-lifecycle engine.
//!
//! Owns the in-memory dialogue session map, the bounded admission pool, the
//! usage gate, the in-process event broker, and the shared dialogue pipeline
//! that every ingress shape (HTTP, SSE, one-shot WebSocket, persistent
//! multiplexer, API shims) runs through.

pub mod admission;
pub mod broker;
pub mod gate;
pub mod pipeline;
pub mod session;

pub use admission::AdmissionPool;
pub use broker::{BrokerMessage, EventBroker};
pub use gate::UsageGate;
pub use pipeline::{DialogueOutcome, DialogueTurn, Engine, PipelineEvent, ReplyMode};
pub use session::{SessionManager, SessionSnapshot};
