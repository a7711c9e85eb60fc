// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Tideway gateway.
//!
//! Provides WAL-mode SQLite storage with embedded migrations and a
//! single-writer concurrency model via `tokio-rusqlite`. All writes go
//! through one background connection thread; dialogue ordinal assignment
//! happens inside a single serialized transaction, which keeps ordinals
//! gap-free per conversation without a retry loop.

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod stats;

pub use database::Database;
pub use models::*;
