// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Health aggregation.
//!
//! Prioritized checks run on a fixed interval and on demand from `/health`.
//! Composite status: unhealthy if any priority-0 check is unhealthy;
//! degraded if any priority-0 check is degraded or any priority-1 check is
//! unhealthy; healthy otherwise.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::application::registry::ToolRegistry;
use crate::domain::config::HealthSection;
use crate::domain::events::{HealthEvent, HealthStatus};
use crate::infrastructure::event_bus::EventBus;

/// Result of one individual check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
    pub priority: u8,
}

/// Aggregated report served on `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: Vec<CheckOutcome>,
    pub checked_at: DateTime<Utc>,
}

/// One health probe. Priority 0 checks gate overall availability.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &'static str;
    fn priority(&self) -> u8;
    async fn check(&self) -> (HealthStatus, String);
}

/// Runs checks, caches the last report, and feeds the event bus.
pub struct HealthMonitor {
    checks: Vec<Arc<dyn HealthCheck>>,
    last: RwLock<Option<HealthReport>>,
}

impl HealthMonitor {
    pub fn new(checks: Vec<Arc<dyn HealthCheck>>) -> Self {
        Self {
            checks,
            last: RwLock::new(None),
        }
    }

    /// Run every check now and cache the aggregate.
    pub async fn run_once(&self) -> HealthReport {
        let mut outcomes = Vec::with_capacity(self.checks.len());
        for check in &self.checks {
            let (status, message) = check.check().await;
            outcomes.push(CheckOutcome {
                name: check.name().to_string(),
                status,
                message,
                priority: check.priority(),
            });
        }

        let status = composite_status(&outcomes);
        let report = HealthReport {
            status,
            checks: outcomes,
            checked_at: Utc::now(),
        };
        *self.last.write() = Some(report.clone());
        report
    }

    pub fn last(&self) -> Option<HealthReport> {
        self.last.read().clone()
    }

    /// Periodic tick: run, cache, publish one `health` event per tick.
    pub async fn run_loop(
        self: Arc<Self>,
        interval: Duration,
        bus: EventBus,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let report = self.run_once().await;
            if report.status != HealthStatus::Healthy {
                warn!(status = %report.status, "health degraded");
            } else {
                debug!("health tick: healthy");
            }
            bus.publish_health_event(HealthEvent {
                status: report.status,
                failing: report
                    .checks
                    .iter()
                    .filter(|c| c.status != HealthStatus::Healthy)
                    .map(|c| (c.name.clone(), c.status))
                    .collect(),
                timestamp: report.checked_at,
            });
        }
    }
}

fn composite_status(outcomes: &[CheckOutcome]) -> HealthStatus {
    let mut status = HealthStatus::Healthy;
    for outcome in outcomes {
        match (outcome.priority, outcome.status) {
            (0, HealthStatus::Unhealthy) => return HealthStatus::Unhealthy,
            (0, HealthStatus::Degraded) | (_, HealthStatus::Unhealthy) => {
                status = status.max(HealthStatus::Degraded);
            }
            (_, HealthStatus::Degraded) => {
                // Degraded priority-1 checks do not change the composite.
            }
            _ => {}
        }
    }
    status
}

// ---------------------------------------------------------------------------
// Standard checks
// ---------------------------------------------------------------------------

/// CPU, memory, and disk usage against configured thresholds (priority 1).
pub struct SystemResourcesCheck {
    thresholds: HealthSection,
    system: Mutex<sysinfo::System>,
    disks: Mutex<sysinfo::Disks>,
}

impl SystemResourcesCheck {
    pub fn new(thresholds: HealthSection) -> Self {
        Self {
            thresholds,
            system: Mutex::new(sysinfo::System::new()),
            disks: Mutex::new(sysinfo::Disks::new_with_refreshed_list()),
        }
    }

    fn sample(&self) -> (f64, f64, f64) {
        let (cpu, memory) = {
            let mut system = self.system.lock();
            system.refresh_cpu_usage();
            system.refresh_memory();
            let cpu = f64::from(system.global_cpu_usage());
            let memory = if system.total_memory() > 0 {
                system.used_memory() as f64 / system.total_memory() as f64 * 100.0
            } else {
                0.0
            };
            (cpu, memory)
        };

        let disk = {
            let mut disks = self.disks.lock();
            disks.refresh(true);
            disks
                .list()
                .iter()
                .filter(|d| d.total_space() > 0)
                .map(|d| {
                    let used = d.total_space().saturating_sub(d.available_space());
                    used as f64 / d.total_space() as f64 * 100.0
                })
                .fold(0.0f64, f64::max)
        };

        (cpu, memory, disk)
    }
}

#[async_trait]
impl HealthCheck for SystemResourcesCheck {
    fn name(&self) -> &'static str {
        "system_resources"
    }

    fn priority(&self) -> u8 {
        1
    }

    async fn check(&self) -> (HealthStatus, String) {
        let (cpu, memory, disk) = self.sample();
        let message = format!(
            "cpu {:.1}%, memory {:.1}%, disk {:.1}%",
            cpu, memory, disk
        );
        let over = cpu >= self.thresholds.cpu_threshold
            || memory >= self.thresholds.memory_threshold
            || disk >= self.thresholds.disk_threshold;
        if over {
            (HealthStatus::Degraded, message)
        } else {
            (HealthStatus::Healthy, message)
        }
    }
}

/// Every enabled tool's binary resolves on PATH (priority 0).
pub struct ToolAvailabilityCheck {
    registry: Arc<ToolRegistry>,
}

impl ToolAvailabilityCheck {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl HealthCheck for ToolAvailabilityCheck {
    fn name(&self) -> &'static str {
        "tool_availability"
    }

    fn priority(&self) -> u8 {
        0
    }

    async fn check(&self) -> (HealthStatus, String) {
        let mut missing = Vec::new();
        let mut present = 0usize;
        for tool in self.registry.enabled_tools() {
            let command = &tool.descriptor().command_name;
            if which::which(command).is_ok() {
                present += 1;
            } else {
                missing.push(command.clone());
            }
        }
        if missing.is_empty() {
            (
                HealthStatus::Healthy,
                format!("{} tool binaries resolve on PATH", present),
            )
        } else {
            (
                HealthStatus::Unhealthy,
                format!("missing binaries: {}", missing.join(", ")),
            )
        }
    }
}

/// Scheduler heartbeat lag (priority 0). A ticker bumps the shared
/// timestamp; growing lag means the event loop is wedged.
pub struct ProcessLivenessCheck {
    heartbeat: Arc<AtomicU64>,
}

impl ProcessLivenessCheck {
    pub fn new(heartbeat: Arc<AtomicU64>) -> Self {
        Self { heartbeat }
    }

    /// Shared heartbeat cell, seeded with the current time.
    pub fn new_heartbeat() -> Arc<AtomicU64> {
        Arc::new(AtomicU64::new(now_millis()))
    }

    /// Spawn the ticker keeping the heartbeat fresh.
    pub fn spawn_ticker(heartbeat: Arc<AtomicU64>, cancel: CancellationToken) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => heartbeat.store(now_millis(), Ordering::Relaxed),
                }
            }
        });
    }
}

fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

#[async_trait]
impl HealthCheck for ProcessLivenessCheck {
    fn name(&self) -> &'static str {
        "process_liveness"
    }

    fn priority(&self) -> u8 {
        0
    }

    async fn check(&self) -> (HealthStatus, String) {
        let lag = now_millis().saturating_sub(self.heartbeat.load(Ordering::Relaxed));
        let message = format!("scheduler heartbeat lag {}ms", lag);
        match lag {
            0..=2999 => (HealthStatus::Healthy, message),
            3000..=9999 => (HealthStatus::Degraded, message),
            _ => (HealthStatus::Unhealthy, message),
        }
    }
}

/// The standard check set wired at startup.
pub fn standard_checks(
    thresholds: HealthSection,
    registry: Arc<ToolRegistry>,
    heartbeat: Arc<AtomicU64>,
) -> Vec<Arc<dyn HealthCheck>> {
    vec![
        Arc::new(SystemResourcesCheck::new(thresholds)),
        Arc::new(ToolAvailabilityCheck::new(registry)),
        Arc::new(ProcessLivenessCheck::new(heartbeat)),
    ]
}
