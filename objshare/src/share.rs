//! Share - wires a coordinator, one registered object and its proxy

use std::time::Duration;

use tracing::{debug, warn};

use crate::coordinator::{Coordinator, CoordinatorConfig, CoordinatorHandle};
use crate::error::Result;
use crate::proxy::ObjectProxy;
use crate::shared::SharedObject;

/// A running coordinator that owns a single shared object
///
/// Hand [`Share::proxy`] clones to workers; each one is an independent view
/// of the same object.
pub struct Share<T: SharedObject> {
    name: String,
    coordinator: Coordinator,
    proxy: ObjectProxy<T>,
}

impl<T: SharedObject> Share<T> {
    /// Register `object` under `name` and start the apply loop
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(name: &str, object: &T, config: CoordinatorConfig) -> Result<Self> {
        debug!(%name, "Share::new: called");
        let mut coordinator = Coordinator::new(config);
        coordinator.register_object(name, object)?;
        coordinator.start();
        let proxy = coordinator.proxy(name);
        Ok(Self {
            name: name.to_string(),
            coordinator,
            proxy,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A proxy for the shared object
    pub fn proxy(&self) -> ObjectProxy<T> {
        self.proxy.clone()
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn handle(&self) -> CoordinatorHandle {
        self.coordinator.handle()
    }

    /// Stop the apply loop, returning whether the stop was clean
    pub async fn stop(&mut self, timeout: Duration) -> bool {
        self.coordinator.stop(timeout).await
    }

    /// Drain outstanding writes, stop, and return the final state
    pub async fn finish(mut self) -> Result<T> {
        debug!(name = %self.name, "Share::finish: called");
        let timeout = self.coordinator.handle().config().stop_timeout();
        if !self.coordinator.handle().wait_idle(timeout).await {
            warn!(name = %self.name, "Outstanding writes did not drain before stop");
        }
        self.coordinator.stop(timeout).await;
        self.coordinator.handle().fetch(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallError;
    use crate::shared::{CallArgs, SharedMetadata};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Hits {
        hits: u64,
    }

    impl SharedObject for Hits {
        fn metadata() -> SharedMetadata {
            SharedMetadata::new().writer("hit", &["hits"])
        }

        fn invoke(&mut self, method: &str, _args: &CallArgs) -> std::result::Result<(), CallError> {
            match method {
                "hit" => {
                    self.hits += 1;
                    Ok(())
                }
                other => Err(CallError::UnknownMethod(other.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_share_round_trip() {
        let share = Share::new("hits", &Hits::default(), CoordinatorConfig::default()).unwrap();
        assert!(share.coordinator().is_running());
        assert_eq!(share.name(), "hits");

        let proxy = share.proxy();
        for _ in 0..4 {
            proxy.call("hit", &CallArgs::new()).await.unwrap();
        }

        let final_state = share.finish().await.unwrap();
        assert_eq!(final_state.hits, 4);
    }

    #[tokio::test]
    async fn test_share_rejects_empty_name() {
        assert!(Share::new("", &Hits::default(), CoordinatorConfig::default()).is_err());
    }
}
