//! CoordinatorHandle - Client interface to a running Coordinator

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::{Result, ShareError};
use crate::proxy::ObjectProxy;
use crate::shared::{CallArgs, SharedObject, key_prefix};
use crate::sync::{Command, CommandSender, CounterRegistry, SourceOfTruth, WriteCounter};

use super::config::CoordinatorConfig;
use super::messages::{ApplyFailure, CoordinatorMetrics, Dispatch, LoopState};
use super::mirror::{MirrorLoader, loader_for};

/// Type information recorded when an object is registered
pub(crate) struct Registration {
    pub(crate) generation: u64,
    pub(crate) loader: MirrorLoader,
}

/// State shared between the apply loop and every handle
pub(crate) struct Shared {
    pub(crate) config: CoordinatorConfig,
    pub(crate) counters: CounterRegistry,
    pub(crate) truth: SourceOfTruth,
    pub(crate) registrations: RwLock<HashMap<String, Registration>>,
    generation: AtomicU64,
    epoch: AtomicU64,
    pub(crate) in_flight: WriteCounter,
    pub(crate) running: AtomicBool,
    pub(crate) failures: broadcast::Sender<ApplyFailure>,
    metrics: Mutex<CoordinatorMetrics>,
}

impl Shared {
    pub(crate) fn new(config: CoordinatorConfig) -> Self {
        let (failures, _) = broadcast::channel(config.failure_channel_capacity.max(1));
        Self {
            counters: CounterRegistry::with_poll_interval(config.poll_interval()),
            truth: SourceOfTruth::new(),
            registrations: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            in_flight: WriteCounter::new(),
            running: AtomicBool::new(false),
            failures,
            metrics: Mutex::new(CoordinatorMetrics::default()),
            config,
        }
    }

    pub(crate) fn metrics(&self) -> MutexGuard<'_, CoordinatorMetrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the `running` flag for a newly spawned apply loop
    pub(crate) fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub(crate) fn set_state(&self, state: LoopState) {
        self.metrics().state = state;
    }
}

/// Write bookkeeping made for a command that is not yet in the queue
///
/// Dropping an uncommitted reservation rolls the bumps back, whether the
/// enqueue failed or the caller's future was cancelled while waiting for
/// queue capacity.
#[must_use]
pub(crate) struct WriteReservation<'a> {
    shared: &'a Shared,
    keys: Vec<String>,
    in_flight: bool,
    committed: bool,
}

impl<'a> WriteReservation<'a> {
    fn pending(shared: &'a Shared, keys: Vec<String>) -> Self {
        for key in &keys {
            shared.counters.increment(key);
        }
        Self {
            shared,
            keys,
            in_flight: false,
            committed: false,
        }
    }

    fn in_flight(shared: &'a Shared) -> Self {
        shared.in_flight.increment();
        Self {
            shared,
            keys: Vec::new(),
            in_flight: true,
            committed: false,
        }
    }

    /// The command reached the queue; keep the bumps
    pub(crate) fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for WriteReservation<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        debug!(keys = ?self.keys, in_flight = self.in_flight, "WriteReservation::drop: rolling back");
        for key in &self.keys {
            self.shared.counters.decrement(key);
        }
        if self.in_flight {
            self.shared.in_flight.decrement();
        }
    }
}

/// Handle for workers to interact with the Coordinator
///
/// This handle is cloneable and is what every proxy holds. Writes are
/// fire-and-forget; reads wait only on the counters of the keys they depend on.
#[derive(Clone)]
pub struct CoordinatorHandle {
    queue: CommandSender,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for CoordinatorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorHandle")
            .field("running", &self.is_running())
            .field("queue_depth", &self.queue.depth())
            .finish_non_exhaustive()
    }
}

impl CoordinatorHandle {
    pub(crate) fn new(queue: CommandSender, shared: Arc<Shared>) -> Self {
        debug!("CoordinatorHandle::new: called");
        Self { queue, shared }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.shared.config
    }

    pub fn counters(&self) -> &CounterRegistry {
        &self.shared.counters
    }

    pub fn truth(&self) -> &SourceOfTruth {
        &self.shared.truth
    }

    /// Whether the apply loop is currently running
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Store `object` as the committed state of `name`
    ///
    /// Re-registering an existing name replaces its state outright; a mirror
    /// the apply loop already cached for that name is discarded.
    pub fn register_object<T: SharedObject>(&self, name: &str, object: &T) -> Result<()> {
        debug!(%name, "CoordinatorHandle::register_object: called");
        if name.is_empty() {
            return Err(ShareError::InvalidName(name.to_string()));
        }
        let bytes = codec::serialize(object)?;

        let mut registrations = self
            .shared
            .registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.truth.set_raw(name, bytes);
        let replaced = registrations
            .insert(
                name.to_string(),
                Registration {
                    generation,
                    loader: loader_for::<T>(),
                },
            )
            .is_some();

        info!(%name, generation, replaced, "Registered shared object");
        Ok(())
    }

    /// Forget a registered object, returning whether it existed
    pub fn remove_object(&self, name: &str) -> bool {
        debug!(%name, "CoordinatorHandle::remove_object: called");
        let mut registrations = self
            .shared
            .registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let existed = self.shared.truth.delete(name);
        registrations.remove(name);
        existed
    }

    /// Current committed state of `name`, or `None` if never registered
    pub fn get_object<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        debug!(%name, "CoordinatorHandle::get_object: called");
        self.shared.truth.get(name)
    }

    /// Current committed state of `name`, failing if it is not registered
    pub fn fetch<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        self.get_object(name)?
            .ok_or_else(|| ShareError::NotFound(name.to_string()))
    }

    /// Serialize a call and enqueue it for the apply loop
    ///
    /// Returns once the command is queued. Callers are expected to have bumped
    /// the pending counter of every attribute in `written_attrs` first.
    pub async fn queue_command(
        &self,
        object: &str,
        method: &str,
        args: &CallArgs,
        written_attrs: Vec<String>,
    ) -> Result<Dispatch> {
        debug!(%object, %method, ?written_attrs, "CoordinatorHandle::queue_command: called");
        let command = Command {
            object: object.to_string(),
            method: method.to_string(),
            args: codec::serialize(&args.args)?,
            kwargs: codec::serialize(&args.kwargs)?,
            written_attrs,
        };

        let reservation = WriteReservation::in_flight(&self.shared);
        self.queue.put(command, self.shared.config.enqueue_timeout()).await?;
        reservation.commit();

        if self.is_running() {
            Ok(Dispatch::Queued)
        } else {
            warn!(%object, %method, "Coordinator not running; command will apply after restart");
            Ok(Dispatch::Deferred)
        }
    }

    /// Record a pending write to `key`
    pub fn increment_pending(&self, key: &str) -> u64 {
        self.shared.counters.increment(key)
    }

    /// Record pending writes to `keys`, withdrawn again unless committed
    pub(crate) fn reserve_pending(&self, keys: Vec<String>) -> WriteReservation<'_> {
        WriteReservation::pending(&self.shared, keys)
    }

    /// Snapshot of `completed + pending` for `key`
    pub fn get_read_target(&self, key: &str) -> u64 {
        self.shared.counters.read_target(key)
    }

    /// Wait until every write to `keys` enqueued before this call is applied
    ///
    /// Targets are captured once, under a single lock, so writes enqueued
    /// afterwards do not extend the wait.
    pub async fn wait_for_read(&self, keys: &[String], timeout: Duration) -> bool {
        debug!(?keys, ?timeout, "CoordinatorHandle::wait_for_read: called");
        let targets = self.shared.counters.read_targets(keys);
        self.shared.counters.wait_for_targets(&targets, timeout).await
    }

    /// Every counter key created so far for `object`
    pub fn object_keys(&self, object: &str) -> Vec<String> {
        self.shared.counters.keys_with_prefix(&key_prefix(object))
    }

    /// Wait until every enqueued command has been applied
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        debug!(?timeout, "CoordinatorHandle::wait_idle: called");
        self.shared
            .in_flight
            .wait_for_clear_with(timeout, self.shared.config.poll_interval())
            .await
    }

    /// Receive apply-time failures from this point on
    pub fn subscribe_failures(&self) -> broadcast::Receiver<ApplyFailure> {
        self.shared.failures.subscribe()
    }

    /// Current coordinator metrics
    pub fn metrics(&self) -> CoordinatorMetrics {
        let mut metrics = self.shared.metrics().clone();
        metrics.queue_depth = self.queue.depth();
        metrics.in_flight = self.shared.in_flight.pending();
        metrics
    }

    /// Proxy for the object registered under `name`
    pub fn proxy<T: SharedObject>(&self, name: &str) -> ObjectProxy<T> {
        ObjectProxy::new(name, self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::command_queue;

    fn handle() -> (CoordinatorHandle, crate::sync::CommandReceiver) {
        let config = CoordinatorConfig {
            enqueue_timeout_ms: 10,
            queue_capacity: 2,
            ..Default::default()
        };
        let (tx, rx) = command_queue(config.queue_capacity);
        (CoordinatorHandle::new(tx, Arc::new(Shared::new(config))), rx)
    }

    #[tokio::test]
    async fn test_queue_while_stopped_is_deferred() {
        let (handle, mut rx) = handle();

        let dispatch = handle
            .queue_command("c", "increment", &CallArgs::new().with_arg(1), vec!["count".to_string()])
            .await
            .unwrap();
        assert!(dispatch.is_deferred());
        assert_eq!(handle.metrics().in_flight, 1);

        let command = rx.get_nowait().unwrap();
        assert_eq!(command.method, "increment");
        assert_eq!(command.written_attrs, vec!["count".to_string()]);
        assert_eq!(codec::deserialize::<Vec<i64>>(&command.args).unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_full_queue_rolls_back_in_flight() {
        let (handle, _rx) = handle();
        for _ in 0..2 {
            handle.queue_command("c", "m", &CallArgs::new(), vec![]).await.unwrap();
        }

        let err = handle.queue_command("c", "m", &CallArgs::new(), vec![]).await.unwrap_err();
        assert!(matches!(err, ShareError::QueueFull { .. }));
        assert_eq!(handle.metrics().in_flight, 2);
        assert_eq!(handle.metrics().queue_depth, 2);
    }

    #[tokio::test]
    async fn test_cancelled_enqueue_rolls_back_in_flight() {
        let config = CoordinatorConfig {
            enqueue_timeout_ms: 5_000,
            queue_capacity: 1,
            ..Default::default()
        };
        let (tx, _rx) = command_queue(config.queue_capacity);
        let handle = CoordinatorHandle::new(tx, Arc::new(Shared::new(config)));
        handle.queue_command("c", "m", &CallArgs::new(), vec![]).await.unwrap();

        let call_args = CallArgs::new();
        let blocked = handle.queue_command("c", "m", &call_args, vec![]);
        assert!(tokio::time::timeout(Duration::from_millis(20), blocked).await.is_err());
        assert_eq!(handle.metrics().in_flight, 1);
    }

    #[tokio::test]
    async fn test_read_target_and_keys() {
        let (handle, _rx) = handle();
        handle.increment_pending("c.count");
        let reservation = handle.reserve_pending(vec!["c.count".to_string()]);
        handle.increment_pending("other.count");

        assert_eq!(handle.get_read_target("c.count"), 2);
        assert_eq!(handle.object_keys("c"), vec!["c.count".to_string()]);
        assert!(!handle.wait_for_read(&["c.count".to_string()], Duration::from_millis(10)).await);
        assert!(handle.wait_for_read(&["c.unwritten".to_string()], Duration::from_millis(10)).await);

        drop(reservation);
        assert_eq!(handle.get_read_target("c.count"), 1);
    }

    #[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
    struct Flag {
        on: bool,
    }

    impl SharedObject for Flag {
        fn metadata() -> crate::shared::SharedMetadata {
            crate::shared::SharedMetadata::new()
        }

        fn invoke(&mut self, method: &str, _args: &CallArgs) -> std::result::Result<(), crate::error::CallError> {
            Err(crate::error::CallError::UnknownMethod(method.to_string()))
        }
    }

    #[test]
    fn test_register_get_remove() {
        let (handle, _rx) = handle();
        assert!(matches!(
            handle.register_object("", &Flag::default()),
            Err(ShareError::InvalidName(_))
        ));

        handle.register_object("flag", &Flag { on: true }).unwrap();
        assert!(handle.fetch::<Flag>("flag").unwrap().on);

        handle.register_object("flag", &Flag { on: false }).unwrap();
        assert!(!handle.fetch::<Flag>("flag").unwrap().on);

        assert!(handle.remove_object("flag"));
        assert!(handle.get_object::<Flag>("flag").unwrap().is_none());
        assert!(matches!(handle.fetch::<Flag>("flag"), Err(ShareError::NotFound(_))));
    }
}
