// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Metrics recorder and Prometheus rendering.
//!
//! Installs the Prometheus exporter as the global `metrics` recorder and
//! exposes the rendered text on demand for `/metrics`. Recording helpers are
//! free functions on the `metrics` facade; when metrics are disabled (or the
//! recorder failed to install) they degrade to no-ops, so the execution hot
//! path never blocks or fails on observability.

use std::time::Instant;

use anyhow::Result;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::domain::breaker::BreakerState;
use crate::domain::execution::ExecutionRecord;

/// Histogram buckets for execution durations: 10 ms – 600 s.
const EXECUTION_SECONDS_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
];

/// Handle to the installed recorder; renders `/metrics`.
#[derive(Clone)]
pub struct MetricsHandle {
    handle: Option<PrometheusHandle>,
    started_at: Instant,
}

impl MetricsHandle {
    /// Install the global recorder. With metrics disabled, returns an inert
    /// handle that renders an empty exposition.
    pub fn install(enabled: bool) -> Result<Self> {
        let handle = if enabled {
            let handle = PrometheusBuilder::new()
                .set_buckets_for_metric(
                    Matcher::Full("execution_seconds".to_string()),
                    EXECUTION_SECONDS_BUCKETS,
                )?
                .install_recorder()?;
            Some(handle)
        } else {
            None
        };
        Ok(Self {
            handle,
            started_at: Instant::now(),
        })
    }

    pub fn enabled(&self) -> bool {
        self.handle.is_some()
    }

    /// Prometheus text exposition for `/metrics`.
    pub fn render(&self) -> String {
        match &self.handle {
            Some(handle) => {
                gauge!("uptime_seconds").set(self.started_at.elapsed().as_secs_f64());
                handle.render()
            }
            None => String::new(),
        }
    }
}

/// Record one completed execution attempt.
pub fn record_execution(record: &ExecutionRecord) {
    let status = if record.success { "success" } else { "error" };
    let error_type = record
        .error_type
        .map(|e| e.to_string())
        .unwrap_or_else(|| "none".to_string());

    counter!(
        "executions_total",
        "tool" => record.tool_name.clone(),
        "status" => status,
        "error_type" => error_type.clone(),
    )
    .increment(1);

    if !record.success {
        counter!(
            "errors_total",
            "tool" => record.tool_name.clone(),
            "error_type" => error_type,
        )
        .increment(1);
    }

    histogram!("execution_seconds", "tool" => record.tool_name.clone())
        .record(record.duration_seconds);
}

/// Track the number of in-flight runs per tool.
pub fn active_incr(tool: &str) {
    gauge!("active", "tool" => tool.to_string()).increment(1.0);
}

pub fn active_decr(tool: &str) {
    gauge!("active", "tool" => tool.to_string()).decrement(1.0);
}

/// Export the breaker state (CLOSED=0, OPEN=1, HALF_OPEN=2).
pub fn breaker_state(tool: &str, state: BreakerState) {
    gauge!("circuit_breaker_state", "tool" => tool.to_string()).set(state.as_gauge());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ErrorType;

    #[test]
    fn test_disabled_handle_renders_empty() {
        let handle = MetricsHandle::install(false).unwrap();
        assert!(!handle.enabled());
        assert!(handle.render().is_empty());
    }

    #[test]
    fn test_recording_without_recorder_is_a_noop() {
        // No global recorder installed in unit tests: must not panic.
        record_execution(&ExecutionRecord {
            tool_name: "nmap".to_string(),
            success: false,
            duration_seconds: 1.0,
            timed_out: true,
            error_type: Some(ErrorType::Timeout),
        });
        active_incr("nmap");
        active_decr("nmap");
        breaker_state("nmap", BreakerState::Open);
    }
}
