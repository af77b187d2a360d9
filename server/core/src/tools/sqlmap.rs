// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! SQL-injection testing policy (sqlmap).
//!
//! The target is an http(s) URL whose host must itself pass the target
//! policy (private IP or lab hostname). `--batch` is force-injected so the
//! binary never waits for interactive input; `--risk` is clamped to 1–2 and
//! `--level` to 1–3 during sanitization. Injection markers (`*`) in caller
//! tokens pass through unchanged.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::application::tool::ToolPolicy;
use crate::domain::config::ServerConfig;
use crate::domain::descriptor::{BreakerParams, ToolDescriptor, ValueRule};
use crate::domain::target::{TargetKind, UrlTargets};

pub struct SqlmapTool {
    descriptor: ToolDescriptor,
}

impl SqlmapTool {
    pub fn new(config: &ServerConfig) -> Self {
        let mut d = ToolDescriptor::new("sqlmap", "sqlmap");
        d.default_timeout = Duration::from_secs(1800);
        d.concurrency = 1;
        d.breaker = BreakerParams::new(
            config.circuit_breaker.failure_threshold,
            config.circuit_breaker.recovery_timeout,
            config.circuit_breaker.half_open_success_threshold,
        );
        d.url_targets = UrlTargets::Required;
        d.payload_pattern = Some(marker_regex().clone());

        d.allowed_flags = [
            "--batch",
            "--risk",
            "--level",
            "--technique",
            "--threads",
            "--dbs",
            "--banner",
            "--current-user",
            "--current-db",
            "--forms",
            "--cookie",
            "--data",
            "--random-agent",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        d.flags_require_value = ["--risk", "--level", "--technique", "--threads", "--cookie", "--data"]
            .into_iter()
            .map(String::from)
            .collect();

        d.value_rules
            .insert("--risk".to_string(), ValueRule::ClampRange { min: 1, max: 2 });
        d.value_rules
            .insert("--level".to_string(), ValueRule::ClampRange { min: 1, max: 3 });
        d.value_rules.insert(
            "--technique".to_string(),
            ValueRule::Pattern {
                regex: technique_regex().clone(),
                expected: "a combination of B, E, U, S, T and Q",
            },
        );
        d.value_rules
            .insert("--threads".to_string(), ValueRule::IntRange { min: 1, max: 10 });

        Self { descriptor: d }
    }
}

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*").expect("marker regex"))
}

fn technique_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[BEUSTQ]{1,6}$").expect("technique regex"))
}

impl ToolPolicy for SqlmapTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn optimize(&self, tokens: Vec<String>) -> Vec<String> {
        let has_batch = tokens.iter().any(|t| t == "--batch");
        let mut argv = Vec::with_capacity(tokens.len() + 1);
        if !has_batch {
            argv.push("--batch".to_string());
        }
        argv.extend(tokens);
        argv
    }

    fn build_argv(&self, _target: &TargetKind, raw_target: &str, tokens: Vec<String>) -> Vec<String> {
        let mut argv = Vec::with_capacity(tokens.len() + 2);
        argv.push("-u".to_string());
        argv.push(raw_target.to_string());
        argv.extend(tokens);
        argv
    }
}
