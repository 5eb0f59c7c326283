//! Caller-driven cancellation for blocking publishes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Shared cancellation flag.
///
/// Clones observe the same flag, so the caller keeps one handle and passes
/// clones (or references) down to blocking operations. Cancellation is
/// one-way: once fired the token stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    fired: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the token. Idempotent.
    pub fn cancel(&self) {
        self.fired.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Sleep for `delay`, waking early when the token fires.
    ///
    /// Returns `true` when the full delay elapsed, `false` on cancellation.
    pub fn wait(&self, delay: Duration) -> bool {
        let tick = Duration::from_millis(25);
        let deadline = Instant::now() + delay;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(tick.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn wait_returns_early_on_cancellation() {
        let token = CancellationToken::new();
        let waiter = token.clone();

        let handle = std::thread::spawn(move || waiter.wait(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(50));
        token.cancel();

        let completed = handle.join().expect("waiter thread");
        assert!(!completed, "wait should report cancellation");
    }

    #[test]
    fn wait_elapses_without_cancellation() {
        let token = CancellationToken::new();
        assert!(token.wait(Duration::from_millis(5)));
    }
}
