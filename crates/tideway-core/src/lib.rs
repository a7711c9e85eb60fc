// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Tideway gateway.
//!
//! This crate provides the workspace error type, the wire and domain types
//! shared across ingress and upstream crates, and small protocol helpers
//! (client version comparison, the parent-cursor sentinel).

pub mod error;
pub mod types;
pub mod version;

// Re-export key items at crate root for ergonomic imports.
pub use error::TidewayError;
pub use types::{DialogueStatus, Platform, SENTINEL_PARENT_UUID};
pub use version::version_at_least;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tideway_error_variants_construct() {
        let _config = TidewayError::Config("test".into());
        let _storage = TidewayError::Storage {
            source: Box::new(std::io::Error::other("test")),
        };
        let _upstream = TidewayError::Upstream {
            message: "test".into(),
            source: None,
        };
        let _mcp = TidewayError::Mcp {
            message: "test".into(),
            source: None,
        };
        let _blocked = TidewayError::UsageBlocked {
            reason: "5-hour 95%/90%".into(),
            reset_time: Some("2026-01-01T00:00:00Z".into()),
        };
        let _overloaded = TidewayError::Overloaded;
        let _internal = TidewayError::Internal("test".into());
    }

    #[test]
    fn sentinel_is_a_valid_uuid_shape() {
        assert_eq!(SENTINEL_PARENT_UUID.len(), 36);
        assert_eq!(SENTINEL_PARENT_UUID.matches('-').count(), 4);
    }
}
