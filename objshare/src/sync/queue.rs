//! Command queue between proxies and the coordinator

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TryRecvError, TrySendError};
use tracing::debug;

use crate::error::{Result, ShareError};

/// One mutation to apply to a mirror
///
/// This is the only structure that crosses from a worker to the coordinator
/// on the write path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub object: String,
    pub method: String,
    /// Serialized positional arguments
    pub args: Vec<u8>,
    /// Serialized keyword arguments
    pub kwargs: Vec<u8>,
    /// Attributes this invocation declares it writes
    #[serde(rename = "written-attrs")]
    pub written_attrs: Vec<String>,
}

/// Create a bounded command queue
pub fn command_queue(capacity: usize) -> (CommandSender, CommandReceiver) {
    debug!(capacity, "command_queue: called");
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (CommandSender { tx }, CommandReceiver { rx })
}

/// Producer side of the command queue; cheap to clone
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<Command>,
}

impl CommandSender {
    /// Enqueue a command, waiting up to `timeout` for queue capacity
    pub async fn put(&self, command: Command, timeout: Duration) -> Result<()> {
        debug!(object = %command.object, method = %command.method, "CommandSender::put: called");
        self.tx.send_timeout(command, timeout).await.map_err(|e| match e {
            SendTimeoutError::Timeout(_) => ShareError::QueueFull { timeout },
            SendTimeoutError::Closed(_) => ShareError::QueueClosed,
        })
    }

    /// Enqueue a command only if there is room right now
    pub fn try_put(&self, command: Command) -> Result<()> {
        debug!(object = %command.object, method = %command.method, "CommandSender::try_put: called");
        self.tx.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => ShareError::QueueFull { timeout: Duration::ZERO },
            TrySendError::Closed(_) => ShareError::QueueClosed,
        })
    }

    /// Number of commands waiting to be dequeued
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Consumer side of the command queue; owned by the apply loop
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::Receiver<Command>,
}

impl CommandReceiver {
    /// Dequeue the next command, or `None` if nothing arrives within `timeout`
    pub async fn get(&mut self, timeout: Duration) -> Option<Command> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(command) => command,
            Err(_) => None,
        }
    }

    /// Dequeue the next command if one is already waiting
    pub fn get_nowait(&mut self) -> Option<Command> {
        match self.rx.try_recv() {
            Ok(command) => Some(command),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(method: &str) -> Command {
        Command {
            object: "counter".to_string(),
            method: method.to_string(),
            args: b"[]".to_vec(),
            kwargs: b"{}".to_vec(),
            written_attrs: vec!["count".to_string()],
        }
    }

    #[tokio::test]
    async fn test_fifo_across_producers() {
        let (tx, mut rx) = command_queue(16);
        let tx2 = tx.clone();

        tx.put(command("a"), Duration::from_secs(1)).await.unwrap();
        tx2.put(command("b"), Duration::from_secs(1)).await.unwrap();
        tx.put(command("c"), Duration::from_secs(1)).await.unwrap();
        assert_eq!(tx.depth(), 3);

        let order: Vec<String> = [
            rx.get_nowait().unwrap(),
            rx.get(Duration::from_millis(10)).await.unwrap(),
            rx.get_nowait().unwrap(),
        ]
        .into_iter()
        .map(|c| c.method)
        .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(tx.depth(), 0);
    }

    #[tokio::test]
    async fn test_get_times_out_empty() {
        let (_tx, mut rx) = command_queue(4);
        assert!(rx.get(Duration::from_millis(5)).await.is_none());
        assert!(rx.get_nowait().is_none());
    }

    #[tokio::test]
    async fn test_full_queue_reports_backpressure() {
        let (tx, _rx) = command_queue(1);
        tx.try_put(command("a")).unwrap();

        assert!(matches!(tx.try_put(command("b")), Err(ShareError::QueueFull { .. })));
        let err = tx.put(command("b"), Duration::from_millis(5)).await.unwrap_err();
        assert!(matches!(err, ShareError::QueueFull { .. }));
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let (tx, rx) = command_queue(1);
        drop(rx);
        assert!(matches!(tx.try_put(command("a")), Err(ShareError::QueueClosed)));
    }
}
