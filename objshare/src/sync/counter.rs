//! Pending-write counter

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Poll interval used by [`WriteCounter::wait_for_clear`]
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(500);

/// Count of writes enqueued but not yet applied
///
/// A bare pending count can starve a waiter under sustained writes, so read
/// barriers use the completed/pending pairs in
/// [`CounterRegistry`](super::CounterRegistry) instead. This counter is for
/// "everything drained" checks where that is acceptable.
#[derive(Debug, Default)]
pub struct WriteCounter {
    pending: AtomicU64,
}

impl WriteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new pending write, returning the new count
    pub fn increment(&self) -> u64 {
        let count = self.pending.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(count, "WriteCounter::increment: called");
        count
    }

    /// Record an applied write, returning the new count (floors at zero)
    pub fn decrement(&self) -> u64 {
        let previous = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        let count = previous.saturating_sub(1);
        debug!(count, "WriteCounter::decrement: called");
        count
    }

    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_clear(&self) -> bool {
        self.pending() == 0
    }

    /// Poll until no writes are pending, returning false on timeout
    pub async fn wait_for_clear(&self, timeout: Duration) -> bool {
        self.wait_for_clear_with(timeout, DEFAULT_POLL_INTERVAL).await
    }

    pub async fn wait_for_clear_with(&self, timeout: Duration, poll: Duration) -> bool {
        debug!(?timeout, pending = self.pending(), "WriteCounter::wait_for_clear: called");
        let deadline = deadline_after(timeout);
        loop {
            if self.is_clear() {
                return true;
            }
            if expired(deadline) {
                debug!("WriteCounter::wait_for_clear: timed out");
                return false;
            }
            tokio::time::sleep(poll).await;
        }
    }
}

/// Deadline `timeout` from now; `None` when it lies beyond what `Instant` can hold
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

pub(crate) fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_increment_and_decrement() {
        let counter = WriteCounter::new();
        assert!(counter.is_clear());

        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.increment(), 2);
        assert_eq!(counter.pending(), 2);

        assert_eq!(counter.decrement(), 1);
        assert_eq!(counter.decrement(), 0);
        assert!(counter.is_clear());
    }

    #[test]
    fn test_decrement_floors_at_zero() {
        let counter = WriteCounter::new();
        assert_eq!(counter.decrement(), 0);
        assert_eq!(counter.decrement(), 0);
        assert_eq!(counter.increment(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_clear_times_out() {
        let counter = WriteCounter::new();
        counter.increment();

        assert!(!counter.wait_for_clear(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_unbounded_timeout_does_not_overflow() {
        assert!(deadline_after(Duration::MAX).is_none());
        assert!(!expired(None));

        let counter = WriteCounter::new();
        assert!(counter.wait_for_clear(Duration::MAX).await);
    }

    #[tokio::test]
    async fn test_wait_for_clear_observes_drain() {
        let counter = Arc::new(WriteCounter::new());
        counter.increment();

        let drainer = counter.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            drainer.decrement();
        });

        assert!(counter.wait_for_clear(Duration::from_secs(2)).await);
    }
}
