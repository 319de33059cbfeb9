// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod planner;

pub use planner::{schedule, PlanError};
