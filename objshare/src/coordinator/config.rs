//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Max commands buffered between proxies and the apply loop
    #[serde(rename = "queue-capacity", default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Sleep between counter checks while a reader waits, in microseconds
    #[serde(rename = "poll-interval-us", default = "default_poll_interval_us")]
    pub poll_interval_us: u64,

    /// How long the idle apply loop waits on the queue before rechecking for stop
    #[serde(rename = "idle-poll-ms", default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,

    /// Default read barrier timeout in milliseconds
    #[serde(rename = "read-timeout-ms", default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// How long a producer waits for queue capacity, in milliseconds
    #[serde(rename = "enqueue-timeout-ms", default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,

    /// Grace period for a cooperative stop, in milliseconds
    #[serde(rename = "stop-timeout-ms", default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Buffer size of the apply-failure broadcast channel
    #[serde(rename = "failure-channel-capacity", default = "default_failure_channel_capacity")]
    pub failure_channel_capacity: usize,
}

fn default_queue_capacity() -> usize {
    debug!("default_queue_capacity: called");
    10_000
}

fn default_poll_interval_us() -> u64 {
    debug!("default_poll_interval_us: called");
    500
}

fn default_idle_poll_ms() -> u64 {
    debug!("default_idle_poll_ms: called");
    20
}

fn default_read_timeout_ms() -> u64 {
    debug!("default_read_timeout_ms: called");
    30_000
}

fn default_enqueue_timeout_ms() -> u64 {
    debug!("default_enqueue_timeout_ms: called");
    5_000
}

fn default_stop_timeout_ms() -> u64 {
    debug!("default_stop_timeout_ms: called");
    5_000
}

fn default_failure_channel_capacity() -> usize {
    debug!("default_failure_channel_capacity: called");
    256
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        debug!("CoordinatorConfig::default: called");
        Self {
            queue_capacity: default_queue_capacity(),
            poll_interval_us: default_poll_interval_us(),
            idle_poll_ms: default_idle_poll_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            failure_channel_capacity: default_failure_channel_capacity(),
        }
    }
}

impl CoordinatorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }

    pub fn read_timeout(&self) -> Duration {
        debug!(read_timeout_ms = %self.read_timeout_ms, "CoordinatorConfig::read_timeout: called");
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}
