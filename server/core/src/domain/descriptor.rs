// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Tool descriptors: per-tool policy encoded as data.
//!
//! A descriptor binds a command name to its allowed flags, value-bearing
//! flags, value grammars, payload-placeholder pattern, and execution
//! parameters. Descriptors are immutable after construction; the sanitizer
//! and the execution pipeline only read them.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::domain::errors::ValidationError;
use crate::domain::target::UrlTargets;

/// Circuit-breaker parameters, clamped to safe ranges on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerParams {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_success_threshold: u32,
}

impl BreakerParams {
    pub fn new(
        failure_threshold: u32,
        recovery_timeout: Duration,
        half_open_success_threshold: u32,
    ) -> Self {
        Self {
            failure_threshold: failure_threshold.clamp(1, 100),
            recovery_timeout: Duration::from_secs(recovery_timeout.as_secs().clamp(1, 3600)),
            half_open_success_threshold: half_open_success_threshold.clamp(1, 10),
        }
    }
}

/// Grammar applied to the value of a value-bearing flag.
///
/// `validate` returns the normalized value: `None` means "keep as supplied",
/// `Some(v)` replaces the token (used for clamping numeric ranges).
#[derive(Debug, Clone)]
pub enum ValueRule {
    /// Non-negative decimal integer.
    Numeric,
    /// Decimal integer within an inclusive range; out-of-range is rejected.
    IntRange { min: u64, max: u64 },
    /// Decimal integer within an inclusive range; out-of-range is clamped.
    ClampRange { min: u64, max: u64 },
    /// Duration grammar: digits with optional `ms`/`s`/`m` suffix.
    Duration,
    /// Comma-separated ports and ranges, each 1–65535, start ≤ end.
    PortSpec { max_ranges: usize },
    /// Comma-separated script names filtered against the descriptor's safe
    /// and intrusive sets; wildcards are never admitted.
    ScriptSpec,
    /// Absolute path under one of the descriptor's wordlist prefixes.
    WordlistPath,
    /// Value must match the given regular expression in full.
    Pattern { regex: Regex, expected: &'static str },
}

impl ValueRule {
    pub fn validate(
        &self,
        flag: &str,
        value: &str,
        descriptor: &ToolDescriptor,
    ) -> Result<Option<String>, ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidValue {
            flag: flag.to_string(),
            reason,
        };

        match self {
            ValueRule::Numeric => {
                if decimal_regex().is_match(value) {
                    Ok(None)
                } else {
                    Err(invalid(format!("expected a decimal integer, got {:?}", value)))
                }
            }
            ValueRule::IntRange { min, max } => {
                let n = parse_decimal(value).ok_or_else(|| {
                    invalid(format!("expected a decimal integer, got {:?}", value))
                })?;
                if n < *min || n > *max {
                    Err(invalid(format!("must be between {} and {}", min, max)))
                } else {
                    Ok(None)
                }
            }
            ValueRule::ClampRange { min, max } => {
                let n = parse_decimal(value).ok_or_else(|| {
                    invalid(format!("expected a decimal integer, got {:?}", value))
                })?;
                let clamped = n.clamp(*min, *max);
                if clamped == n {
                    Ok(None)
                } else {
                    Ok(Some(clamped.to_string()))
                }
            }
            ValueRule::Duration => {
                if duration_regex().is_match(value) {
                    Ok(None)
                } else {
                    Err(invalid(format!(
                        "expected a duration like 500ms, 30s or 5m, got {:?}",
                        value
                    )))
                }
            }
            ValueRule::PortSpec { max_ranges } => {
                validate_port_spec(value, *max_ranges).map_err(invalid)?;
                Ok(None)
            }
            ValueRule::ScriptSpec => {
                validate_script_spec(value, descriptor).map_err(invalid)?;
                Ok(None)
            }
            ValueRule::WordlistPath => {
                validate_wordlist_path(value, &descriptor.wordlist_prefixes).map_err(invalid)?;
                Ok(None)
            }
            ValueRule::Pattern { regex, expected } => {
                if regex.is_match(value) {
                    Ok(None)
                } else {
                    Err(invalid(format!("expected {}, got {:?}", expected, value)))
                }
            }
        }
    }
}

fn parse_decimal(value: &str) -> Option<u64> {
    if decimal_regex().is_match(value) {
        value.parse().ok()
    } else {
        None
    }
}

fn decimal_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]+$").expect("decimal regex"))
}

fn duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]+(ms|s|m)?$").expect("duration regex"))
}

fn validate_port_spec(value: &str, max_ranges: usize) -> Result<(), String> {
    let segments: Vec<&str> = value.split(',').collect();
    if segments.len() > max_ranges {
        return Err(format!(
            "too many port segments: {} exceeds limit of {}",
            segments.len(),
            max_ranges
        ));
    }
    for seg in segments {
        let (lo, hi) = match seg.split_once('-') {
            Some((a, b)) => (a, b),
            None => (seg, seg),
        };
        let lo: u32 = lo
            .parse()
            .map_err(|_| format!("invalid port {:?}", seg))?;
        let hi: u32 = hi
            .parse()
            .map_err(|_| format!("invalid port {:?}", seg))?;
        if lo < 1 || hi > 65_535 || lo > hi {
            return Err(format!("port range {:?} out of order or out of bounds", seg));
        }
    }
    Ok(())
}

fn validate_script_spec(value: &str, descriptor: &ToolDescriptor) -> Result<(), String> {
    for entry in value.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            return Err("empty script entry".to_string());
        }
        if entry.contains('*') {
            return Err(format!("wildcard script patterns are not permitted: {:?}", entry));
        }
        if descriptor.safe_scripts.contains(entry) {
            continue;
        }
        if descriptor.intrusive_scripts.contains(entry) {
            if descriptor.allow_intrusive {
                continue;
            }
            return Err(format!(
                "intrusive script {:?} requires the allow_intrusive policy",
                entry
            ));
        }
        return Err(format!("script {:?} is not in the safe set", entry));
    }
    Ok(())
}

fn validate_wordlist_path(value: &str, prefixes: &[PathBuf]) -> Result<(), String> {
    let path = PathBuf::from(value);
    if !path.is_absolute() {
        return Err("wordlist path must be absolute".to_string());
    }
    if value.contains("..") {
        return Err("wordlist path must not contain '..'".to_string());
    }
    if !prefixes.iter().any(|p| path.starts_with(p)) {
        return Err(format!(
            "wordlist path must live under one of: {}",
            prefixes
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    Ok(())
}

/// Immutable per-tool policy data. One descriptor per tool class, built at
/// startup and replaced only by process restart.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    /// Registry name, lowercase (`nmap`, `gobuster`, ...).
    pub name: String,
    /// External binary resolved on PATH.
    pub command_name: String,
    pub allowed_flags: BTreeSet<String>,
    pub flags_require_value: BTreeSet<String>,
    /// Non-flag tokens the tool accepts (positional modes, service names).
    pub extra_allowed_tokens: BTreeSet<String>,
    pub default_timeout: Duration,
    pub concurrency: u32,
    pub breaker: BreakerParams,
    /// Value grammar per value-bearing flag; flags absent from the map accept
    /// any token that passed the character grammar.
    pub value_rules: BTreeMap<String, ValueRule>,
    /// Pattern for payload placeholders (`^USER^`) preserved byte-for-byte.
    pub payload_pattern: Option<Regex>,
    pub url_targets: UrlTargets,
    /// Cap on CIDR sizes for network-range tools.
    pub max_network_size: u64,
    pub safe_scripts: BTreeSet<String>,
    pub intrusive_scripts: BTreeSet<String>,
    pub allow_intrusive: bool,
    pub wordlist_prefixes: Vec<PathBuf>,
    pub forbid_duplicate_flags: bool,
}

impl ToolDescriptor {
    /// Minimal descriptor; concrete tools extend it with their flag policy.
    pub fn new(name: impl Into<String>, command_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command_name: command_name.into(),
            allowed_flags: BTreeSet::new(),
            flags_require_value: BTreeSet::new(),
            extra_allowed_tokens: BTreeSet::new(),
            default_timeout: Duration::from_secs(600),
            concurrency: 1,
            breaker: BreakerParams::new(5, Duration::from_secs(60), 1),
            value_rules: BTreeMap::new(),
            payload_pattern: None,
            url_targets: UrlTargets::Forbidden,
            max_network_size: 1024,
            safe_scripts: BTreeSet::new(),
            intrusive_scripts: BTreeSet::new(),
            allow_intrusive: false,
            wordlist_prefixes: Vec::new(),
            forbid_duplicate_flags: false,
        }
    }

    /// Flag base: the substring before `=`, or the whole token.
    pub fn flag_base(token: &str) -> &str {
        token.split_once('=').map_or(token, |(base, _)| base)
    }

    pub fn is_flag_allowed(&self, base: &str) -> bool {
        self.allowed_flags.contains(base) || self.extra_allowed_tokens.contains(base)
    }

    pub fn requires_value(&self, base: &str) -> bool {
        self.flags_require_value.contains(base)
    }

    pub fn value_rule(&self, base: &str) -> Option<&ValueRule> {
        self.value_rules.get(base)
    }
}
