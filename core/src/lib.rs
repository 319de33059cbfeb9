// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Strata core
//!
//! Query planning and result brokering for fragmented seismic volumes.
//!
//! # Architecture
//!
//! - **domain:** coordinate geometry, wire messages, manifests
//! - **application:** query scheduling (build, partition, pack)
//! - **infrastructure:** stream bus, keyring, identity provider gate
//! - **presentation:** HTTP surface (query + result endpoints)

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
