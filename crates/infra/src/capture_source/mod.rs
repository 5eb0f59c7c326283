//! Inbound change feed.
//!
//! A `CaptureSource` leases raw change messages from the transport and
//! settles the ones the consumer acknowledged. Anything left unsettled
//! comes back on a later poll with a bumped delivery count, so a
//! crashed worker never loses a change.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::RedisCaptureSource;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("capture source connection error: {0}")]
    Connection(String),
    #[error("capture source command error: {0}")]
    Command(String),
}

/// One raw message leased from the capture transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChange {
    pub id: String,
    pub body: Vec<u8>,
    /// How many times this message has been handed out, this lease
    /// included.
    pub delivery_count: u32,
}

pub trait CaptureSource: Send + Sync {
    /// Leases up to `count` messages, waiting up to `wait` for new
    /// ones. Outstanding unacknowledged messages are redelivered first.
    fn poll(&self, count: usize, wait: Duration) -> Result<Vec<RawChange>, SourceError>;

    /// Settles processed messages so they are not redelivered.
    fn ack(&self, ids: &[String]) -> Result<(), SourceError>;
}

impl<S: CaptureSource + ?Sized> CaptureSource for Arc<S> {
    fn poll(&self, count: usize, wait: Duration) -> Result<Vec<RawChange>, SourceError> {
        (**self).poll(count, wait)
    }

    fn ack(&self, ids: &[String]) -> Result<(), SourceError> {
        (**self).ack(ids)
    }
}

/// Queue-backed source for tests and local runs.
#[derive(Default)]
pub struct InMemoryCaptureSource {
    state: Mutex<SourceState>,
}

#[derive(Default)]
struct SourceState {
    next_id: u64,
    queue: VecDeque<RawChange>,
    leased: Vec<RawChange>,
}

impl InMemoryCaptureSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a raw message body for delivery.
    pub fn push(&self, body: impl Into<Vec<u8>>) -> Result<String, SourceError> {
        let mut state = self.locked()?;
        state.next_id += 1;
        let id = format!("{}-0", state.next_id);
        state.queue.push_back(RawChange {
            id: id.clone(),
            body: body.into(),
            delivery_count: 0,
        });
        Ok(id)
    }

    /// Messages leased but not yet acknowledged.
    pub fn outstanding(&self) -> usize {
        self.state.lock().map(|s| s.leased.len()).unwrap_or(0)
    }

    /// Messages waiting for a first delivery.
    pub fn depth(&self) -> usize {
        self.state.lock().map(|s| s.queue.len()).unwrap_or(0)
    }

    fn locked(&self) -> Result<MutexGuard<'_, SourceState>, SourceError> {
        self.state
            .lock()
            .map_err(|_| SourceError::Connection("capture source lock poisoned".to_string()))
    }
}

impl CaptureSource for InMemoryCaptureSource {
    fn poll(&self, count: usize, _wait: Duration) -> Result<Vec<RawChange>, SourceError> {
        let mut state = self.locked()?;
        if !state.leased.is_empty() {
            let batch = state
                .leased
                .iter_mut()
                .take(count)
                .map(|change| {
                    change.delivery_count += 1;
                    change.clone()
                })
                .collect();
            return Ok(batch);
        }
        let mut batch = Vec::new();
        while batch.len() < count {
            let Some(mut change) = state.queue.pop_front() else {
                break;
            };
            change.delivery_count += 1;
            state.leased.push(change.clone());
            batch.push(change);
        }
        Ok(batch)
    }

    fn ack(&self, ids: &[String]) -> Result<(), SourceError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut state = self.locked()?;
        state.leased.retain(|change| !ids.contains(&change.id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(1);

    #[test]
    fn fresh_messages_are_delivered_once_in_order() {
        let source = InMemoryCaptureSource::new();
        source.push(b"one".to_vec()).unwrap();
        source.push(b"two".to_vec()).unwrap();

        let batch = source.poll(10, WAIT).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].body, b"one");
        assert_eq!(batch[1].body, b"two");
        assert!(batch.iter().all(|c| c.delivery_count == 1));
    }

    #[test]
    fn unacknowledged_messages_come_back_with_higher_count() {
        let source = InMemoryCaptureSource::new();
        let id = source.push(b"retry me".to_vec()).unwrap();

        let first = source.poll(10, WAIT).unwrap();
        assert_eq!(first[0].delivery_count, 1);

        let second = source.poll(10, WAIT).unwrap();
        assert_eq!(second[0].id, id);
        assert_eq!(second[0].delivery_count, 2);
    }

    #[test]
    fn acknowledged_messages_are_gone() {
        let source = InMemoryCaptureSource::new();
        let id = source.push(b"done".to_vec()).unwrap();

        let batch = source.poll(10, WAIT).unwrap();
        source.ack(&[batch[0].id.clone()]).unwrap();

        assert_eq!(source.outstanding(), 0);
        assert!(source.poll(10, WAIT).unwrap().is_empty());
        assert_eq!(id, batch[0].id);
    }

    #[test]
    fn poll_respects_the_batch_limit() {
        let source = InMemoryCaptureSource::new();
        for n in 0..5 {
            source.push(format!("m{n}").into_bytes()).unwrap();
        }

        let batch = source.poll(2, WAIT).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(source.depth(), 3);
        assert_eq!(source.outstanding(), 2);
    }

    #[test]
    fn ack_of_nothing_is_a_no_op() {
        let source = InMemoryCaptureSource::new();
        source.ack(&[]).unwrap();
    }

    #[test]
    fn partial_ack_keeps_the_rest_leased() {
        let source = InMemoryCaptureSource::new();
        source.push(b"a".to_vec()).unwrap();
        source.push(b"b".to_vec()).unwrap();

        let batch = source.poll(10, WAIT).unwrap();
        source.ack(&[batch[0].id.clone()]).unwrap();

        let redelivered = source.poll(10, WAIT).unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].body, b"b");
        assert_eq!(redelivered[0].delivery_count, 2);
    }
}
