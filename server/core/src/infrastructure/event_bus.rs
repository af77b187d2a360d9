// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus - Pub/Sub for Domain Events
//
// In-memory event streaming using tokio broadcast channels. Feeds the SSE
// endpoint and any in-process observers. The channel is bounded; a slow
// subscriber loses the oldest undelivered events (drop-oldest back-pressure)
// and is told how many it missed.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use crate::domain::events::{DomainEvent, ExecutionEvent, HealthEvent};

/// Event bus for publishing and subscribing to domain events.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus; `capacity` bounds the per-subscriber backlog.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_execution_event(&self, event: ExecutionEvent) {
        self.publish(DomainEvent::Execution(event));
    }

    pub fn publish_health_event(&self, event: HealthEvent) {
        self.publish(DomainEvent::Health(event));
    }

    fn publish(&self, event: DomainEvent) {
        // send() errors only when there are no subscribers; that is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Raw broadcast receiver for stream adapters (SSE).
    pub fn subscribe_raw(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Receiver for domain events.
pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    /// Receive the next event, skipping over any dropped backlog.
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Ok(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("event receiver lagged by {} events", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return Err(EventBusError::Closed),
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::HealthStatus;
    use chrono::Utc;

    fn execution_event(tool: &str) -> ExecutionEvent {
        ExecutionEvent {
            tool: tool.to_string(),
            correlation_id: "1".to_string(),
            success: true,
            returncode: 0,
            timed_out: false,
            error_type: None,
            duration_seconds: 0.5,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe();

        bus.publish_execution_event(execution_event("nmap"));

        match receiver.recv().await.unwrap() {
            DomainEvent::Execution(e) => assert_eq!(e.tool, "nmap"),
            other => panic!("expected execution event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_receive() {
        let bus = EventBus::new(10);
        let mut r1 = bus.subscribe();
        let mut r2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish_health_event(HealthEvent {
            status: HealthStatus::Healthy,
            failing: vec![],
            timestamp: Utc::now(),
        });

        assert!(matches!(r1.recv().await.unwrap(), DomainEvent::Health(_)));
        assert!(matches!(r2.recv().await.unwrap(), DomainEvent::Health(_)));
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest() {
        let bus = EventBus::new(2);
        let mut receiver = bus.subscribe();

        for i in 0..5 {
            bus.publish_execution_event(execution_event(&format!("tool{}", i)));
        }

        // The backlog holds only the newest two events; recv skips the gap.
        match receiver.recv().await.unwrap() {
            DomainEvent::Execution(e) => assert_eq!(e.tool, "tool3"),
            other => panic!("unexpected event {:?}", other),
        }
        match receiver.recv().await.unwrap() {
            DomainEvent::Execution(e) => assert_eq!(e.tool, "tool4"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new(4);
        bus.publish_execution_event(execution_event("nmap"));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
