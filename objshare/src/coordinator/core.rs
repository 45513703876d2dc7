//! Coordinator lifecycle and the serial apply loop

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinHandle, spawn_blocking};
use tracing::{debug, info, warn};

use crate::error::{CallError, Result, ShareError};
use crate::proxy::ObjectProxy;
use crate::shared::{CallArgs, SharedObject, counter_key};
use crate::sync::{Command, CommandReceiver, command_queue};

use super::config::CoordinatorConfig;
use super::handle::{CoordinatorHandle, Shared};
use super::messages::{ApplyFailure, Dispatch, LoopState};
use super::mirror::{Mirror, decode_args};

/// A mirror plus the registration generation it was loaded from
struct CachedMirror {
    generation: u64,
    mirror: Box<dyn Mirror>,
}

/// The single writer: dequeues commands one at a time and applies them
struct ApplyLoop {
    shared: Arc<Shared>,
    stop_requested: Arc<AtomicBool>,
    epoch: u64,
    mirrors: HashMap<String, CachedMirror>,
    sequence: u64,
}

impl ApplyLoop {
    fn new(shared: Arc<Shared>, stop_requested: Arc<AtomicBool>, epoch: u64) -> Self {
        Self {
            shared,
            stop_requested,
            epoch,
            mirrors: HashMap::new(),
            sequence: 0,
        }
    }

    async fn run(mut self, receiver: Arc<Mutex<CommandReceiver>>) {
        let mut rx = receiver.lock_owned().await;
        let idle_poll = self.shared.config.idle_poll();

        info!(epoch = self.epoch, "Coordinator apply loop started");

        while !self.stop_requested.load(Ordering::Acquire) {
            let Some(command) = rx.get(idle_poll).await else {
                continue;
            };
            self.process(command).await;
        }

        info!(applied = self.sequence, "Coordinator apply loop stopped");
    }

    /// Apply, commit, then settle counters for one command
    ///
    /// Counters advance even when the command fails so readers never wait on
    /// a write that will not happen.
    async fn process(&mut self, command: Command) {
        self.sequence += 1;
        debug!(
            sequence = self.sequence,
            object = %command.object,
            method = %command.method,
            "ApplyLoop::process: called"
        );

        self.shared.set_state(LoopState::Applying);
        let outcome = match self.apply(&command).await {
            Ok(generation) => {
                self.shared.set_state(LoopState::Committing);
                self.commit(&command.object, generation)
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => self.shared.metrics().commands_applied += 1,
            Err(e) => {
                // The mirror may hold a half-applied write; reload it next time
                self.mirrors.remove(&command.object);
                self.record_failure(&command, e);
            }
        }

        self.shared.set_state(LoopState::CounterUpdate);
        for attr in &command.written_attrs {
            self.shared.counters.complete(&counter_key(&command.object, attr));
        }
        self.shared.in_flight.decrement();
        self.shared.set_state(LoopState::Idle);
    }

    /// Run the command against its mirror, returning the mirror's generation
    ///
    /// The object's method runs on the blocking pool. A panic there is
    /// reported as a failed command and the mirror is dropped with it.
    async fn apply(&mut self, command: &Command) -> Result<u64> {
        let args: CallArgs = decode_args(command)?;
        let mut cached = self.take_mirror(&command.object)?;

        let method = command.method.clone();
        let (cached, applied) = spawn_blocking(move || {
            let applied = cached.mirror.apply(&method, &args);
            (cached, applied)
        })
        .await
        .map_err(|e| CallError::Panicked {
            method: command.method.clone(),
            message: panic_message(e),
        })?;

        let generation = cached.generation;
        self.mirrors.insert(command.object.clone(), cached);
        applied?;
        Ok(generation)
    }

    /// Take the cached mirror for `name` out of the cache, loading it from the
    /// source of truth on first reference or after a re-registration
    fn take_mirror(&mut self, name: &str) -> Result<CachedMirror> {
        // Generation and bytes are read under one guard so a concurrent
        // re-registration cannot pair new bytes with the old generation
        let (generation, loader, bytes) = {
            let registrations = self
                .shared
                .registrations
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            let registration = registrations
                .get(name)
                .ok_or_else(|| ShareError::NotFound(name.to_string()))?;

            if let Some(cached) = self.mirrors.remove(name) {
                if cached.generation == registration.generation {
                    return Ok(cached);
                }
            }

            let bytes = self
                .shared
                .truth
                .get_raw(name)
                .ok_or_else(|| ShareError::NotFound(name.to_string()))?;
            (registration.generation, registration.loader.clone(), bytes)
        };

        debug!(%name, generation, "ApplyLoop::take_mirror: loading mirror");
        let mirror = loader(&bytes)?;
        self.shared.metrics().mirrors_loaded += 1;
        Ok(CachedMirror { generation, mirror })
    }

    /// Overwrite the source-of-truth entry with the mirror's state
    ///
    /// Skipped if the object was re-registered or removed since the mirror
    /// was loaded.
    fn commit(&self, name: &str, generation: u64) -> Result<()> {
        let cached = self
            .mirrors
            .get(name)
            .ok_or_else(|| ShareError::NotFound(name.to_string()))?;
        let bytes = cached.mirror.encode()?;

        let registrations = self
            .shared
            .registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match registrations.get(name) {
            Some(registration) if registration.generation == generation => {
                self.shared.truth.set_raw(name, bytes);
                self.shared.metrics().commits += 1;
                Ok(())
            }
            Some(_) => Err(ShareError::Superseded(name.to_string())),
            None => Err(ShareError::NotFound(name.to_string())),
        }
    }

    fn record_failure(&self, command: &Command, error: ShareError) {
        warn!(
            sequence = self.sequence,
            object = %command.object,
            method = %command.method,
            error = %error,
            "Failed to apply command"
        );
        self.shared.metrics().commands_failed += 1;

        // No subscribers is fine
        let _ = self.shared.failures.send(ApplyFailure {
            sequence: self.sequence,
            object: command.object.clone(),
            method: command.method.clone(),
            error: error.to_string(),
            failed_at: chrono::Utc::now(),
        });
    }
}

impl Drop for ApplyLoop {
    fn drop(&mut self) {
        // Runs on normal exit, abort, and unwinding; a newer loop owns the flag
        if self.shared.epoch() == self.epoch {
            self.shared.running.store(false, Ordering::Release);
            self.shared.set_state(LoopState::Idle);
        }
    }
}

/// Text of a panic caught from the blocking pool
fn panic_message(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Owner of the apply loop and the state shared with every handle
///
/// Exactly one apply loop runs per Coordinator. Workers talk to it through
/// cloned [`CoordinatorHandle`]s or the proxies built from them.
pub struct Coordinator {
    handle: CoordinatorHandle,
    shared: Arc<Shared>,
    receiver: Arc<Mutex<CommandReceiver>>,
    stop_requested: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl Coordinator {
    /// Create a new Coordinator with the given configuration
    pub fn new(config: CoordinatorConfig) -> Self {
        debug!(?config, "Coordinator::new: called");
        let (tx, rx) = command_queue(config.queue_capacity);
        let shared = Arc::new(Shared::new(config));
        Self {
            handle: CoordinatorHandle::new(tx, shared.clone()),
            shared,
            receiver: Arc::new(Mutex::new(rx)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Get a handle for workers and proxies
    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished()) && self.handle.is_running()
    }

    /// Spawn the apply loop; a no-op while it is already running
    ///
    /// Must be called from within a tokio runtime. Returns whether a new loop
    /// was spawned.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            debug!("Coordinator::start: already running");
            return false;
        }

        self.stop_requested.store(false, Ordering::Release);
        let epoch = self.shared.next_epoch();
        self.shared.running.store(true, Ordering::Release);
        let apply_loop = ApplyLoop::new(self.shared.clone(), self.stop_requested.clone(), epoch);
        self.task = Some(tokio::spawn(apply_loop.run(self.receiver.clone())));

        info!("Coordinator started");
        true
    }

    /// Ask the apply loop to finish its current command and exit
    ///
    /// Waits up to `timeout`, then aborts the loop. Returns whether the stop
    /// was clean.
    pub async fn stop(&mut self, timeout: Duration) -> bool {
        debug!(?timeout, "Coordinator::stop: called");
        let Some(mut task) = self.task.take() else {
            debug!("Coordinator::stop: not running");
            return true;
        };

        self.stop_requested.store(true, Ordering::Release);
        let clean = match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "Coordinator apply loop ended abnormally");
                false
            }
            Err(_) => {
                warn!(?timeout, "Coordinator did not stop in time, aborting apply loop");
                task.abort();
                false
            }
        };

        self.shared.running.store(false, Ordering::Release);
        self.shared.set_state(LoopState::Idle);
        info!(clean, "Coordinator stopped");
        clean
    }

    /// Abort the apply loop immediately
    ///
    /// A command being applied at that moment may be lost along with its
    /// counter updates.
    pub fn kill(&mut self) {
        if let Some(task) = self.task.take() {
            warn!("Coordinator killed");
            task.abort();
        }
        self.shared.running.store(false, Ordering::Release);
        self.shared.set_state(LoopState::Idle);
    }

    pub fn register_object<T: SharedObject>(&self, name: &str, object: &T) -> Result<()> {
        self.handle.register_object(name, object)
    }

    pub fn remove_object(&self, name: &str) -> bool {
        self.handle.remove_object(name)
    }

    pub fn get_object<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        self.handle.get_object(name)
    }

    pub async fn queue_command(
        &self,
        object: &str,
        method: &str,
        args: &CallArgs,
        written_attrs: Vec<String>,
    ) -> Result<Dispatch> {
        self.handle.queue_command(object, method, args, written_attrs).await
    }

    pub fn increment_pending(&self, key: &str) -> u64 {
        self.handle.increment_pending(key)
    }

    pub fn get_read_target(&self, key: &str) -> u64 {
        self.handle.get_read_target(key)
    }

    pub async fn wait_for_read(&self, keys: &[String], timeout: Duration) -> bool {
        self.handle.wait_for_read(keys, timeout).await
    }

    /// Proxy for the object registered under `name`
    pub fn proxy<T: SharedObject>(&self, name: &str) -> ObjectProxy<T> {
        self.handle.proxy(name)
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        // Let a still-running loop exit at its next idle poll
        self.stop_requested.store(true, Ordering::Release);
    }
}
