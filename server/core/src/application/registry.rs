// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Tool registry.
//!
//! Owns the set of wrapped tools, applies the include/exclude policy from
//! configuration, and surfaces metadata for the transport. Excluded tools
//! stay registered but disabled so `GET /tools` can list them with
//! `enabled=false` and execution attempts can be answered precisely.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use crate::application::tool::{Tool, ToolPolicy};
use crate::domain::config::ToolsSection;

/// Wire-facing tool metadata for `GET /tools`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub enabled: bool,
    pub command: String,
    pub concurrency: u32,
    pub timeout: f64,
    pub allowed_flags: Vec<String>,
}

/// Registry of every known tool, enabled or not.
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<Tool>>>,
}

impl ToolRegistry {
    /// Build the registry from concrete policies, applying the filter
    /// section: empty `include` means all, `exclude` wins.
    pub fn from_policies(policies: Vec<Arc<dyn ToolPolicy>>, filter: &ToolsSection) -> Self {
        let mut tools = BTreeMap::new();
        for policy in policies {
            let tool = Tool::new(policy);
            let name = tool.name().to_ascii_lowercase();

            let included =
                filter.include.is_empty() || filter.include.iter().any(|n| n == &name);
            let excluded = filter.exclude.iter().any(|n| n == &name);
            tool.set_enabled(included && !excluded);

            if !tool.enabled() {
                info!(tool = %name, "tool registered but disabled by policy");
            }
            tools.insert(name, Arc::new(tool));
        }
        Self {
            tools: RwLock::new(tools),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Tool>> {
        self.tools.read().get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn list(&self) -> Vec<ToolSummary> {
        self.tools
            .read()
            .values()
            .map(|tool| {
                let descriptor = tool.descriptor();
                ToolSummary {
                    name: descriptor.name.clone(),
                    enabled: tool.enabled(),
                    command: descriptor.command_name.clone(),
                    concurrency: descriptor.concurrency,
                    timeout: descriptor.default_timeout.as_secs_f64(),
                    allowed_flags: descriptor.allowed_flags.iter().cloned().collect(),
                }
            })
            .collect()
    }

    /// All tools currently enabled.
    pub fn enabled_tools(&self) -> Vec<Arc<Tool>> {
        self.tools
            .read()
            .values()
            .filter(|t| t.enabled())
            .cloned()
            .collect()
    }

    /// Enable or disable at runtime. Returns false for unknown tools.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.tools.read().get(&name.to_ascii_lowercase()) {
            Some(tool) => {
                tool.set_enabled(enabled);
                info!(tool = %name, enabled, "tool availability changed");
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::descriptor::ToolDescriptor;

    struct StubPolicy {
        descriptor: ToolDescriptor,
    }

    impl StubPolicy {
        fn new(name: &str) -> Arc<dyn ToolPolicy> {
            Arc::new(Self {
                descriptor: ToolDescriptor::new(name, name),
            })
        }
    }

    impl ToolPolicy for StubPolicy {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }
    }

    fn policies() -> Vec<Arc<dyn ToolPolicy>> {
        vec![
            StubPolicy::new("nmap"),
            StubPolicy::new("gobuster"),
            StubPolicy::new("hydra"),
        ]
    }

    #[test]
    fn test_all_enabled_by_default() {
        let registry = ToolRegistry::from_policies(policies(), &ToolsSection::default());
        assert_eq!(registry.list().len(), 3);
        assert!(registry.list().iter().all(|t| t.enabled));
    }

    #[test]
    fn test_exclude_keeps_tool_listed_but_disabled() {
        let filter = ToolsSection {
            exclude: vec!["hydra".to_string()],
            ..Default::default()
        };
        let registry = ToolRegistry::from_policies(policies(), &filter);
        let listed: Vec<_> = registry.list();
        assert_eq!(listed.len(), 3);
        let hydra = listed.iter().find(|t| t.name == "hydra").unwrap();
        assert!(!hydra.enabled);
        assert!(!registry.get("hydra").unwrap().enabled());
    }

    #[test]
    fn test_include_narrows_enabled_set() {
        let filter = ToolsSection {
            include: vec!["nmap".to_string()],
            ..Default::default()
        };
        let registry = ToolRegistry::from_policies(policies(), &filter);
        assert_eq!(registry.enabled_tools().len(), 1);
        assert!(!registry.get("gobuster").unwrap().enabled());
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let filter = ToolsSection {
            include: vec!["nmap".to_string()],
            exclude: vec!["nmap".to_string()],
            ..Default::default()
        };
        let registry = ToolRegistry::from_policies(policies(), &filter);
        assert!(registry.enabled_tools().is_empty());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = ToolRegistry::from_policies(policies(), &ToolsSection::default());
        assert!(registry.get("NMAP").is_some());
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn test_runtime_enable_disable() {
        let registry = ToolRegistry::from_policies(policies(), &ToolsSection::default());
        assert!(registry.set_enabled("nmap", false));
        assert!(!registry.get("nmap").unwrap().enabled());
        assert!(registry.set_enabled("nmap", true));
        assert!(registry.get("nmap").unwrap().enabled());
        assert!(!registry.set_enabled("ghost", false));
    }
}
