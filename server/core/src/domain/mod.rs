// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod breaker;
pub mod config;
pub mod descriptor;
pub mod errors;
pub mod events;
pub mod execution;
pub mod sanitizer;
pub mod target;
