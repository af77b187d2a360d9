// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Per-tool concurrency limiting.
//!
//! Bounded semaphores keyed by `(tool_name, scheduler_id)` so independent
//! schedulers get independent capacity. Semaphores are created lazily on
//! first acquire and live for the registry's lifetime; they are held in an
//! explicit registry rather than as statics so lifetimes stay visible.
//!
//! Acquisition is blocking but cancellable: a pending acquire that loses the
//! race against the cancellation token returns without ever holding a
//! permit. Release is RAII, so every exit path from an execution attempt
//! releases.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Identifies the scheduling context (event loop) a request runs under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchedulerId(String);

impl SchedulerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SchedulerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("semaphore acquisition cancelled")]
    Cancelled,
}

/// RAII permit for one execution slot.
pub struct ExecutionPermit {
    _permit: OwnedSemaphorePermit,
}

/// Registry of per-(tool, scheduler) semaphores.
#[derive(Default)]
pub struct SemaphoreRegistry {
    inner: DashMap<(String, String), Arc<Semaphore>>,
}

impl SemaphoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a slot for `tool` under `scheduler`, racing cancellation.
    ///
    /// `capacity` seeds the semaphore on first use; later calls reuse the
    /// existing one, so capacity changes apply after process restart.
    pub async fn acquire(
        &self,
        tool: &str,
        scheduler: &SchedulerId,
        capacity: u32,
        cancel: &CancellationToken,
    ) -> Result<ExecutionPermit, AcquireError> {
        let semaphore = self
            .inner
            .entry((tool.to_string(), scheduler.as_str().to_string()))
            .or_insert_with(|| Arc::new(Semaphore::new(capacity.max(1) as usize)))
            .clone();

        tokio::select! {
            _ = cancel.cancelled() => Err(AcquireError::Cancelled),
            permit = semaphore.acquire_owned() => permit
                .map(|p| ExecutionPermit { _permit: p })
                .map_err(|_| AcquireError::Cancelled),
        }
    }

    /// Free slots for a pair, if its semaphore exists yet.
    pub fn available(&self, tool: &str, scheduler: &SchedulerId) -> Option<usize> {
        self.inner
            .get(&(tool.to_string(), scheduler.as_str().to_string()))
            .map(|s| s.available_permits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_capacity_bounds_concurrent_permits() {
        let registry = SemaphoreRegistry::new();
        let scheduler = SchedulerId::new("main");
        let cancel = CancellationToken::new();

        let p1 = registry.acquire("nmap", &scheduler, 2, &cancel).await.unwrap();
        let _p2 = registry.acquire("nmap", &scheduler, 2, &cancel).await.unwrap();
        assert_eq!(registry.available("nmap", &scheduler), Some(0));

        // Third acquire blocks until a permit frees.
        let pending = tokio::time::timeout(
            Duration::from_millis(50),
            registry.acquire("nmap", &scheduler, 2, &cancel),
        )
        .await;
        assert!(pending.is_err(), "third acquire should still be pending");

        drop(p1);
        let p3 = tokio::time::timeout(
            Duration::from_millis(200),
            registry.acquire("nmap", &scheduler, 2, &cancel),
        )
        .await;
        assert!(p3.is_ok_and(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn test_schedulers_get_independent_capacity() {
        let registry = SemaphoreRegistry::new();
        let cancel = CancellationToken::new();
        let a = SchedulerId::new("loop-a");
        let b = SchedulerId::new("loop-b");

        let _pa = registry.acquire("nmap", &a, 1, &cancel).await.unwrap();
        // Same tool, different scheduler: not starved.
        let pb = tokio::time::timeout(
            Duration::from_millis(100),
            registry.acquire("nmap", &b, 1, &cancel),
        )
        .await;
        assert!(pb.is_ok_and(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn test_cancelled_acquire_never_counts() {
        let registry = SemaphoreRegistry::new();
        let scheduler = SchedulerId::new("main");
        let cancel = CancellationToken::new();

        let held = registry.acquire("nmap", &scheduler, 1, &cancel).await.unwrap();

        let waiter = registry.acquire("nmap", &scheduler, 1, &cancel);
        cancel.cancel();
        assert!(matches!(waiter.await, Err(AcquireError::Cancelled)));

        // The cancelled acquire never took a slot: releasing the held permit
        // restores full capacity.
        drop(held);
        assert_eq!(registry.available("nmap", &scheduler), Some(1));
    }

    #[tokio::test]
    async fn test_permit_release_is_raii() {
        let registry = SemaphoreRegistry::new();
        let scheduler = SchedulerId::new("main");
        let cancel = CancellationToken::new();

        {
            let _permit = registry.acquire("nmap", &scheduler, 1, &cancel).await.unwrap();
            assert_eq!(registry.available("nmap", &scheduler), Some(0));
        }
        assert_eq!(registry.available("nmap", &scheduler), Some(1));
    }
}
