// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain events published on the event bus and streamed over `/events`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::ErrorType;

/// Composite service health, worst-of over prioritized checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        };
        write!(f, "{}", s)
    }
}

/// One completed tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub tool: String,
    pub correlation_id: String,
    pub success: bool,
    pub returncode: i32,
    pub timed_out: bool,
    pub error_type: Option<ErrorType>,
    pub duration_seconds: f64,
    pub timestamp: DateTime<Utc>,
}

/// One health-aggregation tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthEvent {
    pub status: HealthStatus,
    /// Names of checks that were not healthy, with their status.
    pub failing: Vec<(String, HealthStatus)>,
    pub timestamp: DateTime<Utc>,
}

/// Unified event type for the broadcast bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Execution(ExecutionEvent),
    Health(HealthEvent),
}

impl DomainEvent {
    /// SSE event name for this variant.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::Execution(_) => "execution",
            DomainEvent::Health(_) => "health",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = DomainEvent::Health(HealthEvent {
            status: HealthStatus::Degraded,
            failing: vec![("system_resources".to_string(), HealthStatus::Degraded)],
            timestamp: Utc::now(),
        });
        let v: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(v["type"], "health");
        assert_eq!(v["status"], "degraded");
        assert_eq!(event.kind(), "health");
    }

    #[test]
    fn test_status_ordering_worst_last() {
        assert!(HealthStatus::Healthy < HealthStatus::Degraded);
        assert!(HealthStatus::Degraded < HealthStatus::Unhealthy);
    }
}
