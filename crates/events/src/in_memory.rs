//! In-memory event bus for tests and local development.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::bus::{EventBus, PublishError};
use crate::cancel::CancellationToken;
use crate::envelope::DomainEvent;

/// Records published events in order.
///
/// Acknowledgment is immediate, so the only failure modes are a fired
/// cancellation token and publishing after `close()`.
#[derive(Debug, Default)]
pub struct InMemoryEventBus {
    published: Mutex<Vec<DomainEvent>>,
    closed: AtomicBool,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far.
    pub fn published(&self) -> Vec<DomainEvent> {
        self.published
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.published.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, event: DomainEvent, cancel: &CancellationToken) -> Result<(), PublishError> {
        if cancel.is_cancelled() {
            return Err(PublishError::Cancelled);
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(PublishError::Delivery("event bus closed".to_string()));
        }
        self.published
            .lock()
            .map_err(|_| PublishError::Delivery("publish log poisoned".to_string()))?
            .push(event);
        Ok(())
    }

    fn close(&self) -> Result<(), PublishError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use orgledger_core::{TenantId, UnitCode};

    use super::*;

    fn event(kind: &str) -> DomainEvent {
        DomainEvent::new(
            kind,
            TenantId::new(),
            UnitCode::parse("1000001").expect("valid code"),
            serde_json::json!({}),
        )
    }

    #[test]
    fn records_published_events_in_order() {
        let bus = InMemoryEventBus::new();
        let token = CancellationToken::new();

        bus.publish(event("organization.created"), &token)
            .expect("publish");
        bus.publish(event("organization.updated"), &token)
            .expect("publish");

        let published = bus.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].event_type(), "organization.created");
        assert_eq!(published[1].event_type(), "organization.updated");
    }

    #[test]
    fn rejects_publish_after_close() {
        let bus = InMemoryEventBus::new();
        let token = CancellationToken::new();

        bus.close().expect("close");
        match bus.publish(event("organization.created"), &token) {
            Err(PublishError::Delivery(msg)) => assert!(msg.contains("closed")),
            other => panic!("Expected Delivery error, got {other:?}"),
        }
    }

    #[test]
    fn honors_cancellation() {
        let bus = InMemoryEventBus::new();
        let token = CancellationToken::new();
        token.cancel();

        match bus.publish(event("organization.created"), &token) {
            Err(PublishError::Cancelled) => {}
            other => panic!("Expected Cancelled, got {other:?}"),
        }
        assert!(bus.is_empty());
    }
}
