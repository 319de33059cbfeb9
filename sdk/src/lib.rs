// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

/// Strata Rust SDK
///
/// Schedule slice and curtain queries against a Strata deployment, follow
/// their progress, and assemble the streamed results.

pub mod assemble;
pub mod client;

pub use assemble::{assemble_curtain, assemble_slice, AssembledCurtain, AssembledSlice};
pub use client::{Process, ProcessStatus, SdkError, StrataClient};
