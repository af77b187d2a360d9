// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Concrete tool policies.
//!
//! Each wrapped scanner contributes a [`ToolPolicy`] implementation: a
//! descriptor carrying its flag allow-list and value grammars, tool-specific
//! validation, and an optimizer that injects conservative defaults for flags
//! the caller omitted.

pub mod gobuster;
pub mod hydra;
pub mod nmap;
pub mod sqlmap;

use std::sync::Arc;

use crate::application::tool::ToolPolicy;
use crate::domain::config::ServerConfig;

/// Every tool class this build knows about. The registry applies the
/// include/exclude policy on top.
pub fn builtin_policies(config: &ServerConfig) -> Vec<Arc<dyn ToolPolicy>> {
    vec![
        Arc::new(nmap::NmapTool::new(config)),
        Arc::new(gobuster::GobusterTool::new(config)),
        Arc::new(hydra::HydraTool::new(config)),
        Arc::new(sqlmap::SqlmapTool::new(config)),
    ]
}
