//! Event bus abstraction.

use std::sync::Arc;

use thiserror::Error;

use crate::cancel::CancellationToken;
use crate::envelope::DomainEvent;

/// Publication failure.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The broker reported a write failure.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// No acknowledgment arrived within the wait bound.
    #[error("delivery acknowledgment timed out after {waited_ms} ms")]
    Timeout { waited_ms: u64 },

    /// The caller's cancellation token fired before the send completed.
    #[error("publish cancelled by caller")]
    Cancelled,

    /// All retry attempts were exhausted; `source` is the last failure.
    #[error("publish failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<PublishError>,
    },
}

impl PublishError {
    /// True when another attempt may succeed (broker error or timeout).
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Delivery(_) | Self::Timeout { .. })
    }
}

/// Reliable, ordered-per-aggregate publication of domain events.
///
/// Implementations serialize the event, attach its headers, append it to a
/// log partitioned by the aggregate id and wait for the broker's
/// acknowledgment. `publish` blocks its caller up to the transport's wait
/// bound and must honor the cancellation token so a disconnected caller
/// releases the waiting thread.
///
/// Delivery is at-least-once: consumers deduplicate on `event_id`.
pub trait EventBus: Send + Sync {
    /// Publish one event and wait for acknowledgment.
    fn publish(&self, event: DomainEvent, cancel: &CancellationToken) -> Result<(), PublishError>;

    /// Flush outstanding sends, then release the producer.
    ///
    /// Must complete before process exit or buffered events are lost.
    fn close(&self) -> Result<(), PublishError>;
}

impl<B> EventBus for Arc<B>
where
    B: EventBus + ?Sized,
{
    fn publish(&self, event: DomainEvent, cancel: &CancellationToken) -> Result<(), PublishError> {
        (**self).publish(event, cancel)
    }

    fn close(&self) -> Result<(), PublishError> {
        (**self).close()
    }
}
