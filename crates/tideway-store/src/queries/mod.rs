// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query modules over the single-writer database handle.

pub mod conversations;
pub mod devices;
pub mod dialogues;
pub mod errors;
pub mod prompts;
