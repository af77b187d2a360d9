// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Per-tool circuit breaker.
//!
//! Three-state failure-isolation machine: CLOSED counts consecutive
//! failures and opens at the threshold; OPEN denies all calls until the
//! recovery timeout elapses, then admits probes in HALF_OPEN; HALF_OPEN
//! closes after enough successes and re-opens on any failure. State
//! transitions are linearizable per tool: `allow` and `record` run under the
//! same lock, so a failure that crosses the threshold is visible to the next
//! `allow` from any request.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::domain::descriptor::BreakerParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    /// Gauge encoding: CLOSED=0, OPEN=1, HALF_OPEN=2.
    pub fn as_gauge(self) -> f64 {
        match self {
            BreakerState::Closed => 0.0,
            BreakerState::Open => 1.0,
            BreakerState::HalfOpen => 2.0,
        }
    }
}

#[derive(Debug)]
enum Inner {
    Closed { consecutive_failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { successes: u32 },
}

#[derive(Debug)]
pub struct CircuitBreaker {
    params: BreakerParams,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(params: BreakerParams) -> Self {
        Self {
            params,
            inner: Mutex::new(Inner::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Whether a call may proceed. An elapsed recovery window moves
    /// OPEN → HALF_OPEN as a side effect.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        match *inner {
            Inner::Closed { .. } | Inner::HalfOpen { .. } => true,
            Inner::Open { opened_at } => {
                if opened_at.elapsed() >= self.params.recovery_timeout {
                    *inner = Inner::HalfOpen { successes: 0 };
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record the outcome of an execution that was allowed through.
    pub fn record(&self, success: bool) {
        let mut inner = self.inner.lock();
        match *inner {
            Inner::Closed {
                consecutive_failures,
            } => {
                if success {
                    *inner = Inner::Closed {
                        consecutive_failures: 0,
                    };
                } else {
                    let failures = consecutive_failures + 1;
                    if failures >= self.params.failure_threshold {
                        *inner = Inner::Open {
                            opened_at: Instant::now(),
                        };
                    } else {
                        *inner = Inner::Closed {
                            consecutive_failures: failures,
                        };
                    }
                }
            }
            Inner::HalfOpen { successes } => {
                if success {
                    let successes = successes + 1;
                    if successes >= self.params.half_open_success_threshold {
                        *inner = Inner::Closed {
                            consecutive_failures: 0,
                        };
                    } else {
                        *inner = Inner::HalfOpen { successes };
                    }
                } else {
                    *inner = Inner::Open {
                        opened_at: Instant::now(),
                    };
                }
            }
            // A late record against an open breaker is dropped; the window
            // restarts only on half-open failures.
            Inner::Open { .. } => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        match *self.inner.lock() {
            Inner::Closed { .. } => BreakerState::Closed,
            Inner::Open { .. } => BreakerState::Open,
            Inner::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// Time until the recovery window elapses, when OPEN.
    pub fn retry_after(&self) -> Option<Duration> {
        match *self.inner.lock() {
            Inner::Open { opened_at } => Some(
                self.params
                    .recovery_timeout
                    .saturating_sub(opened_at.elapsed()),
            ),
            _ => None,
        }
    }
}
