// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Network scanner policy (nmap).
//!
//! Targets are addresses, lab hostnames, or private CIDRs capped at 1024
//! addresses. The optimizer injects a conservative timing template, a
//! parallelism cap, host-discovery skip, and a top-ports default whenever
//! the caller leaves the corresponding family of flags out. Script
//! selection is filtered against an exact-name safe set; intrusive entries
//! need the `allow_intrusive` policy bit, and wildcards are never accepted.

use std::time::Duration;

use regex::Regex;

use crate::application::tool::ToolPolicy;
use crate::domain::config::ServerConfig;
use crate::domain::descriptor::{BreakerParams, ToolDescriptor, ValueRule};

const NMAP_NETWORK_CAP: u64 = 1024;

const SAFE_SCRIPTS: &[&str] = &[
    // Curated categories.
    "safe",
    "default",
    "discovery",
    "version",
    // Exact script names.
    "banner",
    "http-title",
    "http-headers",
    "ssl-cert",
    "ssh-hostkey",
    "smb-os-discovery",
    "dns-service-discovery",
];

const INTRUSIVE_SCRIPTS: &[&str] = &["vuln", "exploit", "brute", "intrusive"];

pub struct NmapTool {
    descriptor: ToolDescriptor,
}

impl NmapTool {
    pub fn new(config: &ServerConfig) -> Self {
        let mut d = ToolDescriptor::new("nmap", "nmap");
        d.default_timeout = Duration::from_secs(600);
        d.concurrency = 1;
        d.breaker = BreakerParams::new(
            config.circuit_breaker.failure_threshold,
            config.circuit_breaker.recovery_timeout,
            config.circuit_breaker.half_open_success_threshold,
        );
        d.max_network_size = config.limits.max_network_size.min(NMAP_NETWORK_CAP);
        d.allow_intrusive = config.tools.allow_intrusive;

        d.allowed_flags = [
            "-sV", "-sC", "-sT", "-sU", "-sn", "-Pn", "-n", "-v", "-vv", "-T1", "-T2", "-T3",
            "-T4", "--open", "--reason", "-p", "--top-ports", "--script", "--max-parallelism",
            "--max-rate", "--host-timeout", "--max-retries", "--version-intensity",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        d.flags_require_value = [
            "-p",
            "--top-ports",
            "--script",
            "--max-parallelism",
            "--max-rate",
            "--host-timeout",
            "--max-retries",
            "--version-intensity",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        d.value_rules
            .insert("-p".to_string(), ValueRule::PortSpec { max_ranges: 64 });
        d.value_rules
            .insert("--top-ports".to_string(), ValueRule::IntRange { min: 1, max: 65_535 });
        d.value_rules
            .insert("--script".to_string(), ValueRule::ScriptSpec);
        d.value_rules.insert(
            "--max-parallelism".to_string(),
            ValueRule::IntRange { min: 1, max: 100 },
        );
        d.value_rules.insert(
            "--max-rate".to_string(),
            ValueRule::IntRange { min: 1, max: 100_000 },
        );
        d.value_rules
            .insert("--host-timeout".to_string(), ValueRule::Duration);
        d.value_rules
            .insert("--max-retries".to_string(), ValueRule::IntRange { min: 0, max: 20 });
        d.value_rules.insert(
            "--version-intensity".to_string(),
            ValueRule::IntRange { min: 0, max: 9 },
        );

        d.safe_scripts = SAFE_SCRIPTS.iter().map(|s| s.to_string()).collect();
        d.intrusive_scripts = INTRUSIVE_SCRIPTS.iter().map(|s| s.to_string()).collect();

        Self { descriptor: d }
    }
}

impl ToolPolicy for NmapTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn optimize(&self, tokens: Vec<String>) -> Vec<String> {
        let has_timing = tokens.iter().any(|t| timing_template(t));
        let has_parallelism = tokens.iter().any(|t| t == "--max-parallelism");
        let has_discovery = tokens.iter().any(|t| t == "-Pn" || t == "-sn");
        let has_ports = tokens.iter().any(|t| t == "-p" || t == "--top-ports");

        let mut argv = Vec::with_capacity(tokens.len() + 6);
        if !has_timing {
            argv.push("-T4".to_string());
        }
        if !has_parallelism {
            argv.push("--max-parallelism".to_string());
            argv.push("10".to_string());
        }
        if !has_discovery {
            argv.push("-Pn".to_string());
        }
        if !has_ports {
            argv.push("--top-ports".to_string());
            argv.push("1000".to_string());
        }
        argv.extend(tokens);
        argv
    }
}

fn timing_template(token: &str) -> bool {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-T[0-5]$").expect("timing regex"))
        .is_match(token)
}
