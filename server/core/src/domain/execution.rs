// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Execution input/output types shared by every wrapped tool.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

use crate::domain::errors::{ErrorContext, ErrorType};

/// Immutable per-request input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInput {
    pub target: String,
    #[serde(default)]
    pub extra_args: String,
    #[serde(default)]
    pub timeout_sec: Option<f64>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl ToolInput {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            extra_args: String::new(),
            timeout_sec: None,
            correlation_id: None,
        }
    }

    pub fn with_args(mut self, extra_args: impl Into<String>) -> Self {
        self.extra_args = extra_args.into();
        self
    }
}

/// Structured result of one execution attempt. Always well-formed, whether
/// the run succeeded, failed validation, timed out, or never spawned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
    pub truncated_stdout: bool,
    pub truncated_stderr: bool,
    pub timed_out: bool,
    pub error: Option<String>,
    pub error_type: Option<ErrorType>,
    #[serde(rename = "execution_time")]
    pub execution_time_seconds: f64,
    pub correlation_id: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ToolOutput {
    /// Output for a failure that happened before (or instead of) a spawn.
    pub fn from_error(ctx: &ErrorContext, returncode: i32, correlation_id: String) -> Self {
        let mut metadata = ctx.metadata.clone();
        metadata.insert(
            "recovery_suggestion".to_string(),
            serde_json::Value::String(ctx.recovery_suggestion.clone()),
        );
        Self {
            stdout: String::new(),
            stderr: ctx.message.clone(),
            returncode,
            truncated_stdout: false,
            truncated_stderr: false,
            timed_out: ctx.error_type == ErrorType::Timeout,
            error: Some(ctx.message.clone()),
            error_type: Some(ctx.error_type),
            execution_time_seconds: 0.0,
            correlation_id,
            metadata,
        }
    }

    pub fn success(&self) -> bool {
        self.returncode == 0 && !self.timed_out
    }
}

/// Transient record consumed synchronously by the metrics aggregator.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub tool_name: String,
    pub success: bool,
    pub duration_seconds: f64,
    pub timed_out: bool,
    pub error_type: Option<ErrorType>,
}

/// Generate a monotonic-millisecond correlation id.
///
/// Strictly increasing within the process even when two requests land on the
/// same millisecond.
pub fn next_correlation_id() -> String {
    static LAST: AtomicI64 = AtomicI64::new(0);
    let now = chrono::Utc::now().timestamp_millis();
    let mut prev = LAST.load(Ordering::Relaxed);
    loop {
        let next = now.max(prev + 1);
        match LAST.compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next.to_string(),
            Err(observed) => prev = observed,
        }
    }
}
