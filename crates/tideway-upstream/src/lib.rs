// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Upstream protocol adapter for the vendor's private web API.
//!
//! This crate speaks the HTTP + SSE completion protocol, the multipart file
//! upload protocol, and the usage endpoint, all behind the assembled cookie
//! credential. Every outbound call waits on the process-wide rate pacer
//! first.

pub mod client;
pub mod files;
pub mod pacer;
pub mod remote;
pub mod sse;
pub mod styles;
pub mod types;
pub mod usage;

pub use client::UpstreamClient;
pub use files::RequestFileExt;
pub use pacer::RatePacer;
pub use remote::RemoteMcpServer;
pub use types::{CompletionRequest, FileAttachment, UploadedFile};
