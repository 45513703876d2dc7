//! Demo workload: concurrent workers incrementing one shared tally

use std::time::Instant;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::coordinator::CoordinatorConfig;
use crate::error::CallError;
use crate::proxy::ObjectProxy;
use crate::share::Share;
use crate::shared::{CallArgs, SharedMetadata, SharedObject};

/// A counter with a named increment method
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    pub count: i64,
}

impl SharedObject for Tally {
    fn metadata() -> SharedMetadata {
        SharedMetadata::new()
            .writer("increment", &["count"])
            .reader_of("is_at_least", &["count"])
    }

    fn invoke(&mut self, method: &str, args: &CallArgs) -> std::result::Result<(), CallError> {
        match method {
            "increment" => {
                let by: Option<i64> = args.kwarg("by")?;
                self.count = self
                    .count
                    .checked_add(by.unwrap_or(1))
                    .ok_or_else(|| CallError::Overflow("increment".to_string()))?;
                Ok(())
            }
            other => Err(CallError::UnknownMethod(other.to_string())),
        }
    }

    fn query(&self, method: &str, args: &CallArgs) -> std::result::Result<Value, CallError> {
        match method {
            "is_at_least" => Ok(Value::Bool(self.count >= args.arg::<i64>(0)?)),
            other => Err(CallError::UnknownMethod(other.to_string())),
        }
    }
}

/// Outcome of a demo run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoReport {
    pub workers: usize,
    pub increments: usize,
    pub expected: i64,
    pub count: i64,
    #[serde(rename = "commands-applied")]
    pub commands_applied: u64,
    #[serde(rename = "commands-failed")]
    pub commands_failed: u64,
    #[serde(rename = "elapsed-ms")]
    pub elapsed_ms: u64,
}

impl DemoReport {
    pub fn is_consistent(&self) -> bool {
        self.count == self.expected
    }
}

/// Even workers use read-modify-write assignment, odd workers call `increment`
async fn worker(id: usize, proxy: ObjectProxy<Tally>, increments: usize) -> crate::error::Result<()> {
    debug!(id, increments, "worker: called");
    for _ in 0..increments {
        if id % 2 == 0 {
            let current = proxy.attr_ref("count").await?;
            proxy.set("count", current + 1).await?;
        } else {
            proxy.call("increment", &CallArgs::new()).await?;
        }
    }
    Ok(())
}

/// Run `workers` concurrent workers, each adding `increments` to one tally
pub async fn run_demo(config: CoordinatorConfig, workers: usize, increments: usize) -> Result<DemoReport> {
    info!(workers, increments, "Starting demo");
    let started = Instant::now();
    let share = Share::new("tally", &Tally::default(), config).context("Failed to share tally")?;
    let handle = share.handle();

    let mut set = JoinSet::new();
    for id in 0..workers {
        set.spawn(worker(id, share.proxy(), increments));
    }
    while let Some(joined) = set.join_next().await {
        joined
            .context("Demo worker panicked")?
            .context("Demo worker failed")?;
    }

    let expected = i64::try_from(workers * increments).context("Too many increments")?;
    let ready = share
        .proxy()
        .call("is_at_least", &CallArgs::new().with_arg(expected))
        .await
        .context("Failed to query tally")?;
    if ready != Some(Value::Bool(true)) {
        warn!(?ready, expected, "Tally short of expected count after all workers finished");
    }

    let tally = share.finish().await.context("Failed to read final tally")?;
    let metrics = handle.metrics();
    let report = DemoReport {
        workers,
        increments,
        expected,
        count: tally.count,
        commands_applied: metrics.commands_applied,
        commands_failed: metrics.commands_failed,
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    };

    info!(count = report.count, expected, "Demo finished");
    Ok(report)
}
