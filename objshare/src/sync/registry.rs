//! Per-key pending/completed write accounting
//!
//! Workers bump `pending` before they enqueue a write; the coordinator moves
//! one unit from `pending` to `completed` after it commits the write. A reader
//! snapshots `completed + pending` once and waits for `completed` to reach
//! that target, so writes issued after the snapshot never extend the wait.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::counter::{DEFAULT_POLL_INTERVAL, deadline_after, expired};

/// Counts for a single key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterPair {
    /// Writes enqueued but not yet applied
    pub pending: u64,
    /// Writes applied; never decreases
    pub completed: u64,
}

impl CounterPair {
    /// Completed count a reader must observe to include every enqueued write
    pub fn target(&self) -> u64 {
        self.completed + self.pending
    }
}

/// Shared map from counter key to its pending/completed pair
#[derive(Debug, Clone)]
pub struct CounterRegistry {
    counters: Arc<Mutex<HashMap<String, CounterPair>>>,
    poll_interval: Duration,
}

impl Default for CounterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        debug!(?poll_interval, "CounterRegistry::with_poll_interval: called");
        Self {
            counters: Arc::new(Mutex::new(HashMap::new())),
            poll_interval,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CounterPair>> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a pending write for `key`, returning the new pending count
    pub fn increment(&self, key: &str) -> u64 {
        let mut counters = self.lock();
        let pair = counters.entry(key.to_string()).or_default();
        pair.pending += 1;
        debug!(%key, pending = pair.pending, "CounterRegistry::increment: called");
        pair.pending
    }

    /// Withdraw a pending write without completing it (floors at zero)
    pub fn decrement(&self, key: &str) -> u64 {
        let mut counters = self.lock();
        let pair = counters.entry(key.to_string()).or_default();
        pair.pending = pair.pending.saturating_sub(1);
        debug!(%key, pending = pair.pending, "CounterRegistry::decrement: called");
        pair.pending
    }

    /// Move one write for `key` from pending to completed
    pub fn complete(&self, key: &str) -> CounterPair {
        let mut counters = self.lock();
        let pair = counters.entry(key.to_string()).or_default();
        pair.pending = pair.pending.saturating_sub(1);
        pair.completed += 1;
        debug!(%key, pending = pair.pending, completed = pair.completed, "CounterRegistry::complete: called");
        *pair
    }

    /// Pending count for `key`
    pub fn get_count(&self, key: &str) -> u64 {
        self.pair(key).pending
    }

    pub fn completed(&self, key: &str) -> u64 {
        self.pair(key).completed
    }

    pub fn pair(&self, key: &str) -> CounterPair {
        self.lock().get(key).copied().unwrap_or_default()
    }

    pub fn is_clear(&self, key: &str) -> bool {
        self.get_count(key) == 0
    }

    /// Snapshot of `completed + pending` for `key`
    pub fn read_target(&self, key: &str) -> u64 {
        self.pair(key).target()
    }

    /// Snapshot targets for several keys under one lock acquisition
    pub fn read_targets(&self, keys: &[String]) -> Vec<(String, u64)> {
        let counters = self.lock();
        keys.iter()
            .map(|key| {
                let target = counters.get(key).map(CounterPair::target).unwrap_or(0);
                (key.clone(), target)
            })
            .collect()
    }

    /// All keys beginning with `prefix`, sorted
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        keys.sort();
        keys
    }

    /// Copy of every counter
    pub fn snapshot(&self) -> HashMap<String, CounterPair> {
        self.lock().clone()
    }

    /// Poll until `key` has no pending writes
    pub async fn wait_for_key(&self, key: &str, timeout: Duration) -> bool {
        debug!(%key, ?timeout, "CounterRegistry::wait_for_key: called");
        let deadline = deadline_after(timeout);
        self.wait_clear_until(key, deadline).await
    }

    /// Wait for each key in turn to clear, sharing one timeout budget
    ///
    /// Returns false as soon as the remaining budget runs out on any key.
    pub async fn wait_for_keys(&self, keys: &[String], timeout: Duration) -> bool {
        debug!(?keys, ?timeout, "CounterRegistry::wait_for_keys: called");
        let deadline = deadline_after(timeout);
        for key in keys {
            if !self.wait_clear_until(key, deadline).await {
                debug!(%key, "CounterRegistry::wait_for_keys: budget exhausted");
                return false;
            }
        }
        true
    }

    async fn wait_clear_until(&self, key: &str, deadline: Option<Instant>) -> bool {
        loop {
            if self.is_clear(key) {
                return true;
            }
            if expired(deadline) {
                return false;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Wait until every key's completed count reaches its captured target
    pub async fn wait_for_targets(&self, targets: &[(String, u64)], timeout: Duration) -> bool {
        debug!(?targets, ?timeout, "CounterRegistry::wait_for_targets: called");
        let deadline = deadline_after(timeout);
        for (key, target) in targets {
            loop {
                if self.completed(key) >= *target {
                    break;
                }
                if expired(deadline) {
                    debug!(%key, target, "CounterRegistry::wait_for_targets: timed out");
                    return false;
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_increment_complete_cycle() {
        let registry = CounterRegistry::new();

        assert_eq!(registry.increment("c.count"), 1);
        assert_eq!(registry.increment("c.count"), 2);
        assert_eq!(registry.read_target("c.count"), 2);

        let pair = registry.complete("c.count");
        assert_eq!(pair, CounterPair { pending: 1, completed: 1 });
        assert_eq!(registry.read_target("c.count"), 2);
        assert!(!registry.is_clear("c.count"));

        registry.complete("c.count");
        assert!(registry.is_clear("c.count"));
        assert_eq!(registry.completed("c.count"), 2);
    }

    #[test]
    fn test_unknown_key_is_zero() {
        let registry = CounterRegistry::new();
        assert_eq!(registry.get_count("nope"), 0);
        assert_eq!(registry.read_target("nope"), 0);
        assert!(registry.is_clear("nope"));
    }

    #[test]
    fn test_read_targets_snapshot() {
        let registry = CounterRegistry::new();
        registry.increment("a.x");
        registry.increment("a.x");
        registry.complete("a.x");
        registry.increment("a.y");

        let targets = registry.read_targets(&["a.x".to_string(), "a.y".to_string(), "a.z".to_string()]);
        assert_eq!(
            targets,
            vec![("a.x".to_string(), 2), ("a.y".to_string(), 1), ("a.z".to_string(), 0)]
        );
    }

    #[test]
    fn test_keys_with_prefix() {
        let registry = CounterRegistry::new();
        registry.increment("cart.items");
        registry.increment("cart.total");
        registry.increment("cartography.maps");

        assert_eq!(
            registry.keys_with_prefix("cart."),
            vec!["cart.items".to_string(), "cart.total".to_string()]
        );
    }

    #[tokio::test]
    async fn test_wait_for_keys_budget_exhausted() {
        let registry = CounterRegistry::new();
        registry.increment("a.x");

        let ok = registry
            .wait_for_keys(&["a.y".to_string(), "a.x".to_string()], Duration::from_millis(20))
            .await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_wait_for_targets_ignores_later_writes() {
        let registry = CounterRegistry::new();
        registry.increment("a.x");
        let targets = registry.read_targets(&["a.x".to_string()]);

        // Writes after the snapshot keep pending above zero forever
        registry.increment("a.x");
        registry.increment("a.x");
        registry.complete("a.x");

        assert!(registry.wait_for_targets(&targets, Duration::from_millis(50)).await);
        assert!(!registry.is_clear("a.x"));
    }

    #[tokio::test]
    async fn test_wait_for_key_clears() {
        let registry = CounterRegistry::new();
        registry.increment("a.x");

        let writer = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            writer.complete("a.x");
        });

        assert!(registry.wait_for_key("a.x", Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_unbounded_wait_for_targets() {
        let registry = CounterRegistry::new();
        registry.increment("a.x");
        let targets = registry.read_targets(&["a.x".to_string()]);

        let writer = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            writer.complete("a.x");
        });

        assert!(registry.wait_for_targets(&targets, Duration::MAX).await);
        assert!(registry.wait_for_keys(&["a.x".to_string()], Duration::MAX).await);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Increment,
        Decrement,
        Complete,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Increment), Just(Op::Decrement), Just(Op::Complete)]
    }

    proptest! {
        #[test]
        fn prop_completed_monotonic_and_pending_consistent(ops in prop::collection::vec(op_strategy(), 0..200)) {
            let registry = CounterRegistry::new();
            let mut last_completed = 0;
            let mut model_pending: u64 = 0;

            for op in ops {
                match op {
                    Op::Increment => {
                        model_pending += 1;
                        registry.increment("k.v");
                    }
                    Op::Decrement => {
                        model_pending = model_pending.saturating_sub(1);
                        registry.decrement("k.v");
                    }
                    Op::Complete => {
                        model_pending = model_pending.saturating_sub(1);
                        registry.complete("k.v");
                    }
                }
                let pair = registry.pair("k.v");
                prop_assert!(pair.completed >= last_completed);
                prop_assert_eq!(pair.pending, model_pending);
                last_completed = pair.completed;
            }
        }
    }
}
