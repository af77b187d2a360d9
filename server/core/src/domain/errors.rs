// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Error taxonomy for tool executions.
//!
//! Every failure inside the execution pipeline is translated into one of the
//! [`ErrorType`] variants and surfaced on the wire inside a well-formed
//! `ToolOutput` — errors are surfaced, never retried. [`ErrorContext`] is the
//! structured form used for logging and for filling the output's error
//! fields, including a human-readable recovery suggestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Authoritative failure classification for a tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Timeout,
    NotFound,
    ValidationError,
    ExecutionError,
    ResourceExhausted,
    CircuitBreakerOpen,
    Unknown,
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorType::Timeout => "timeout",
            ErrorType::NotFound => "not_found",
            ErrorType::ValidationError => "validation_error",
            ErrorType::ExecutionError => "execution_error",
            ErrorType::ResourceExhausted => "resource_exhausted",
            ErrorType::CircuitBreakerOpen => "circuit_breaker_open",
            ErrorType::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Structured context attached to every failed execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub error_type: ErrorType,
    pub message: String,
    pub recovery_suggestion: String,
    pub timestamp: DateTime<Utc>,
    pub tool_name: String,
    pub target: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ErrorContext {
    pub fn new(
        error_type: ErrorType,
        message: impl Into<String>,
        recovery_suggestion: impl Into<String>,
        tool_name: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            error_type,
            message: message.into(),
            recovery_suggestion: recovery_suggestion.into(),
            timestamp: Utc::now(),
            tool_name: tool_name.into(),
            target: target.into(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// Rejection produced by the target policy, the argument sanitizer, or a
/// tool-specific validator. Always maps to [`ErrorType::ValidationError`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("target not authorized: {0}")]
    TargetNotAuthorized(String),

    #[error("network range too large: {size} addresses exceeds cap of {cap}")]
    NetworkTooLarge { size: u64, cap: u64 },

    #[error("argument string too long: {len} bytes exceeds limit of {max}")]
    ArgsTooLong { len: usize, max: usize },

    #[error("denied character {0:?} in arguments")]
    DeniedCharacter(char),

    #[error("malformed quoting in arguments")]
    MalformedQuoting,

    #[error("token not permitted: {0}")]
    TokenNotPermitted(String),

    #[error("flag not allowed: {0}")]
    FlagNotAllowed(String),

    #[error("flag {0} requires a value")]
    MissingValue(String),

    #[error("duplicate flag not permitted: {0}")]
    DuplicateFlag(String),

    #[error("invalid value for {flag}: {reason}")]
    InvalidValue { flag: String, reason: String },

    /// Tool-specific policy rejection (mode mismatch, missing wordlist, ...).
    #[error("{0}")]
    Policy(String),
}

impl ValidationError {
    /// Actionable hint surfaced alongside the error message.
    pub fn recovery_suggestion(&self) -> String {
        match self {
            ValidationError::TargetNotAuthorized(_) => {
                "use an RFC1918 or loopback IPv4 address, a private CIDR, \
                 or a hostname ending in .lab.internal"
                    .to_string()
            }
            ValidationError::NetworkTooLarge { cap, .. } => {
                format!("use a smaller CIDR covering at most {} addresses", cap)
            }
            ValidationError::ArgsTooLong { max, .. } => {
                format!("shorten the argument string to at most {} bytes", max)
            }
            ValidationError::DeniedCharacter(_) => {
                "remove shell metacharacters (; & | ` $ < > and newlines) \
                 from the arguments"
                    .to_string()
            }
            ValidationError::MalformedQuoting => {
                "balance quotes in the argument string".to_string()
            }
            ValidationError::TokenNotPermitted(_)
            | ValidationError::FlagNotAllowed(_)
            | ValidationError::DuplicateFlag(_) => {
                "consult GET /tools for the flags this tool accepts".to_string()
            }
            ValidationError::MissingValue(flag) => {
                format!("supply a value after {}", flag)
            }
            ValidationError::InvalidValue { flag, .. } => {
                format!("correct the value supplied to {}", flag)
            }
            ValidationError::Policy(_) => {
                "adjust the request to satisfy this tool's policy".to_string()
            }
        }
    }
}
