// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # warden-core
//!
//! The runtime heart of WARDEN, the 100monkeys.ai security-tool broker. This
//! crate owns the domain model (target policy, argument sanitization, circuit
//! breaking), the execution pipeline that wraps every external scanner, the
//! subprocess infrastructure, and the HTTP/stdio presentation surfaces.
//!
//! ## Layer Structure
//!
//! ```text
//! presentation/   ← HTTP API (axum), stdio line protocol
//!     ↓
//! application/    ← Tool pipeline, registry, limiter, health aggregation
//!     ↓
//! domain/         ← Config, target policy, sanitizer, breaker, descriptors
//!     ↓
//! infrastructure/ ← Subprocess spawner, event bus, metrics recorder
//! ```
//!
//! Concrete tool policies (nmap, gobuster, hydra, sqlmap) live in [`tools`]
//! and plug into the pipeline through the [`application::tool::ToolPolicy`]
//! trait.
//!
//! ## Integration Tests
//!
//! See `server/core/tests/` for integration tests covering the execution
//! pipeline and the HTTP surface.

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;
pub mod tools;

pub use domain::*;
