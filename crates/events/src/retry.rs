//! Retry wrapper around an event bus.

use std::time::Duration;

use tracing::{info, warn};

use crate::bus::{EventBus, PublishError};
use crate::cancel::CancellationToken;
use crate::envelope::DomainEvent;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Linear backoff policy: attempt `k` failing waits `base_delay * k`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Backoff before the next attempt, scaled by the failed attempt index
    /// (1-based).
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        self.base_delay * failed_attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

/// Wraps an [`EventBus`] with bounded retries.
///
/// Retriable failures (broker error, timeout) are retried up to
/// `max_retries` times with linear backoff; the publish is therefore
/// attempted at most `max_retries + 1` times. Cancellation aborts
/// immediately, including during a backoff sleep. After exhaustion the
/// caller gets [`PublishError::RetriesExhausted`] carrying the last
/// failure; the committed write behind the event is not rolled back.
#[derive(Debug)]
pub struct RetryingEventBus<B> {
    inner: B,
    policy: RetryPolicy,
}

impl<B: EventBus> RetryingEventBus<B> {
    pub fn new(inner: B, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

impl<B: EventBus> EventBus for RetryingEventBus<B> {
    fn publish(&self, event: DomainEvent, cancel: &CancellationToken) -> Result<(), PublishError> {
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(PublishError::Cancelled);
            }

            attempts += 1;
            match self.inner.publish(event.clone(), cancel) {
                Ok(()) => {
                    if attempts > 1 {
                        info!(
                            event_id = %event.event_id(),
                            attempts,
                            "publish succeeded after retry"
                        );
                    }
                    return Ok(());
                }
                Err(err) if err.is_retriable() => {
                    if attempts > self.policy.max_retries {
                        return Err(PublishError::RetriesExhausted {
                            attempts,
                            source: Box::new(err),
                        });
                    }
                    warn!(
                        event_id = %event.event_id(),
                        attempt = attempts,
                        error = %err,
                        "publish attempt failed, backing off"
                    );
                    if !cancel.wait(self.policy.delay_for(attempts)) {
                        return Err(PublishError::Cancelled);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn close(&self) -> Result<(), PublishError> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    use orgledger_core::{TenantId, UnitCode};

    use super::*;

    /// Fails the first `failures` publishes, then succeeds.
    struct FlakyBus {
        failures: u32,
        attempts: AtomicU32,
        delivered: Mutex<Vec<DomainEvent>>,
    }

    impl FlakyBus {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                attempts: AtomicU32::new(0),
                delivered: Mutex::new(Vec::new()),
            }
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl EventBus for FlakyBus {
        fn publish(
            &self,
            event: DomainEvent,
            _cancel: &CancellationToken,
        ) -> Result<(), PublishError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures {
                return Err(PublishError::Delivery("broker unavailable".to_string()));
            }
            self.delivered.lock().expect("lock").push(event);
            Ok(())
        }

        fn close(&self) -> Result<(), PublishError> {
            Ok(())
        }
    }

    fn sample_event() -> DomainEvent {
        DomainEvent::new(
            "organization.updated",
            TenantId::new(),
            UnitCode::parse("1000001").expect("valid code"),
            serde_json::json!({}),
        )
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(5))
    }

    #[test]
    fn backoff_scales_linearly_with_attempt_index() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
    }

    #[test]
    fn ack_on_a_later_attempt_stops_retrying() {
        let bus = RetryingEventBus::new(FlakyBus::new(2), fast_policy(3));
        let token = CancellationToken::new();

        match bus.publish(sample_event(), &token) {
            Ok(()) => {}
            Err(e) => panic!("Expected success after retries, got {e:?}"),
        }
        assert_eq!(bus.inner.attempts(), 3);
        assert_eq!(bus.inner.delivered.lock().expect("lock").len(), 1);
    }

    #[test]
    fn exhaustion_attempts_max_retries_plus_one_and_aggregates() {
        let bus = RetryingEventBus::new(FlakyBus::new(u32::MAX), fast_policy(3));
        let token = CancellationToken::new();

        match bus.publish(sample_event(), &token) {
            Err(PublishError::RetriesExhausted { attempts, source }) => {
                assert_eq!(attempts, 4);
                match *source {
                    PublishError::Delivery(_) => {}
                    other => panic!("Expected Delivery as last failure, got {other:?}"),
                }
            }
            other => panic!("Expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(bus.inner.attempts(), 4);
    }

    #[test]
    fn pre_cancelled_token_skips_all_attempts() {
        let bus = RetryingEventBus::new(FlakyBus::new(0), fast_policy(3));
        let token = CancellationToken::new();
        token.cancel();

        match bus.publish(sample_event(), &token) {
            Err(PublishError::Cancelled) => {}
            other => panic!("Expected Cancelled, got {other:?}"),
        }
        assert_eq!(bus.inner.attempts(), 0);
    }

    #[test]
    fn cancellation_during_backoff_aborts_immediately() {
        let policy = RetryPolicy::new(3, Duration::from_secs(10));
        let bus = RetryingEventBus::new(FlakyBus::new(u32::MAX), policy);
        let token = CancellationToken::new();

        let canceller = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });

        let started = Instant::now();
        match bus.publish(sample_event(), &token) {
            Err(PublishError::Cancelled) => {}
            other => panic!("Expected Cancelled, got {other:?}"),
        }
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "cancellation must cut the backoff short"
        );
        assert_eq!(bus.inner.attempts(), 1, "no further attempts after cancel");
        handle.join().expect("canceller thread");
    }
}
