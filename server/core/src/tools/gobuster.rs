// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Content discovery policy (gobuster).
//!
//! The first token must be a positional mode: `dir`, `dns`, or `vhost`.
//! URL-based modes (`dir`, `vhost`) take an authorized http(s) URL target;
//! `dns` takes a bare lab domain and rejects URLs. Wordlists must live under
//! the configured prefix allow-list, and each mode gets a default thread
//! count when the caller does not pick one.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::application::tool::ToolPolicy;
use crate::domain::config::ServerConfig;
use crate::domain::descriptor::{BreakerParams, ToolDescriptor, ValueRule};
use crate::domain::errors::ValidationError;
use crate::domain::execution::ToolInput;
use crate::domain::target::{TargetKind, UrlTargets};

const MODES: &[&str] = &["dir", "dns", "vhost"];

pub struct GobusterTool {
    descriptor: ToolDescriptor,
}

impl GobusterTool {
    pub fn new(config: &ServerConfig) -> Self {
        let mut d = ToolDescriptor::new("gobuster", "gobuster");
        d.default_timeout = Duration::from_secs(1200);
        d.concurrency = 1;
        d.breaker = BreakerParams::new(
            config.circuit_breaker.failure_threshold,
            config.circuit_breaker.recovery_timeout,
            config.circuit_breaker.half_open_success_threshold,
        );
        d.url_targets = UrlTargets::Allowed;
        d.wordlist_prefixes = config
            .tools
            .wordlist_prefixes
            .iter()
            .map(PathBuf::from)
            .collect();

        d.extra_allowed_tokens = MODES.iter().map(|m| m.to_string()).collect();

        d.allowed_flags = [
            "-w", "-t", "-x", "-k", "-q", "-z", "-r", "-s", "-b", "--timeout", "--delay",
            "--wildcard", "--follow-redirect", "--exclude-length",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        d.flags_require_value = ["-w", "-t", "-x", "-s", "-b", "--timeout", "--delay", "--exclude-length"]
            .into_iter()
            .map(String::from)
            .collect();

        d.value_rules.insert("-w".to_string(), ValueRule::WordlistPath);
        d.value_rules
            .insert("-t".to_string(), ValueRule::IntRange { min: 1, max: 50 });
        d.value_rules.insert(
            "-x".to_string(),
            ValueRule::Pattern {
                regex: extension_list_regex().clone(),
                expected: "a comma-separated extension list",
            },
        );
        d.value_rules.insert(
            "-s".to_string(),
            ValueRule::Pattern {
                regex: status_list_regex().clone(),
                expected: "a comma-separated status-code list",
            },
        );
        d.value_rules.insert(
            "-b".to_string(),
            ValueRule::Pattern {
                regex: status_list_regex().clone(),
                expected: "a comma-separated status-code list",
            },
        );
        d.value_rules
            .insert("--timeout".to_string(), ValueRule::Duration);
        d.value_rules
            .insert("--delay".to_string(), ValueRule::Duration);
        d.value_rules
            .insert("--exclude-length".to_string(), ValueRule::Numeric);

        Self { descriptor: d }
    }
}

fn extension_list_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9]+(,[A-Za-z0-9]+)*$").expect("extension regex"))
}

fn status_list_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]{3}(,[0-9]{3})*$").expect("status regex"))
}

fn mode_of(tokens: &[String]) -> Option<&str> {
    tokens
        .first()
        .map(String::as_str)
        .filter(|t| MODES.contains(t))
}

fn default_threads(mode: &str) -> &'static str {
    match mode {
        "dns" => "50",
        "vhost" => "20",
        _ => "30",
    }
}

impl ToolPolicy for GobusterTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn validate(
        &self,
        _input: &ToolInput,
        target: &TargetKind,
        tokens: &[String],
    ) -> Result<(), ValidationError> {
        let mode = mode_of(tokens).ok_or_else(|| {
            ValidationError::Policy(
                "gobuster requires a leading mode: dir, dns or vhost".to_string(),
            )
        })?;

        match mode {
            "dir" | "vhost" => {
                if !target.is_url() {
                    return Err(ValidationError::Policy(format!(
                        "{} mode requires an http(s):// target",
                        mode
                    )));
                }
            }
            _ => {
                if target.is_url() {
                    return Err(ValidationError::Policy(
                        "dns mode takes a bare domain, not a URL".to_string(),
                    ));
                }
            }
        }

        if !tokens.iter().any(|t| t == "-w") {
            return Err(ValidationError::Policy(
                "gobuster requires a wordlist (-w)".to_string(),
            ));
        }
        Ok(())
    }

    fn optimize(&self, tokens: Vec<String>) -> Vec<String> {
        let Some(mode) = mode_of(&tokens).map(str::to_string) else {
            return tokens;
        };
        let has_threads = tokens.iter().any(|t| t == "-t");

        let mut argv = Vec::with_capacity(tokens.len() + 2);
        argv.push(mode.clone());
        if !has_threads {
            argv.push("-t".to_string());
            argv.push(default_threads(&mode).to_string());
        }
        argv.extend(tokens.into_iter().skip(1));
        argv
    }

    fn build_argv(&self, target: &TargetKind, raw_target: &str, tokens: Vec<String>) -> Vec<String> {
        let Some(mode) = mode_of(&tokens).map(str::to_string) else {
            // Unreachable after validate; keep the target last regardless.
            let mut argv = tokens;
            argv.push(raw_target.to_string());
            return argv;
        };

        let target_flag = if target.is_url() { "-u" } else { "-d" };
        let mut argv = Vec::with_capacity(tokens.len() + 2);
        argv.push(mode);
        argv.push(target_flag.to_string());
        argv.push(raw_target.to_string());
        argv.extend(tokens.into_iter().skip(1));
        argv
    }
}
