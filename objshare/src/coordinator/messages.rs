//! Observability types published by the Coordinator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of the apply loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoopState {
    /// Waiting on the queue, or not running
    #[default]
    Idle,
    /// Running the requested method against the mirror
    Applying,
    /// Writing the mirror back to the source of truth
    Committing,
    /// Settling pending/completed counters for the written attributes
    CounterUpdate,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Applying => write!(f, "applying"),
            Self::Committing => write!(f, "committing"),
            Self::CounterUpdate => write!(f, "counter-update"),
        }
    }
}

/// How a fire-and-forget write was handed off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Enqueued while the apply loop is running
    Queued,
    /// Enqueued while the coordinator is stopped; applied once it restarts
    Deferred,
}

impl Dispatch {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Dispatch::Deferred)
    }
}

/// A queued command that failed inside the coordinator
///
/// The worker that queued it has already moved on, so failures are only
/// visible through logs and this event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyFailure {
    /// Dequeue order of the failed command
    pub sequence: u64,
    pub object: String,
    pub method: String,
    pub error: String,
    #[serde(rename = "failed-at")]
    pub failed_at: DateTime<Utc>,
}

/// Coordinator metrics for observability
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinatorMetrics {
    pub commands_applied: u64,
    pub commands_failed: u64,
    pub commits: u64,
    pub mirrors_loaded: u64,
    /// Commands waiting in the queue
    pub queue_depth: usize,
    /// Commands enqueued but not yet through the counter-update phase
    pub in_flight: u64,
    pub state: LoopState,
}
