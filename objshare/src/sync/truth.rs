//! Source of truth: last committed state of every shared object

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::codec;
use crate::error::Result;

/// Map from object name to its committed serialized state
///
/// Only the coordinator writes here; any holder of a clone may read.
#[derive(Debug, Clone, Default)]
pub struct SourceOfTruth {
    states: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl SourceOfTruth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize and store `value` under `name`
    pub fn set<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let bytes = codec::serialize(value)?;
        self.set_raw(name, bytes);
        Ok(())
    }

    /// Fetch and deserialize the state under `name`
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.get_raw(name) {
            Some(bytes) => Ok(Some(codec::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set_raw(&self, name: &str, bytes: Vec<u8>) {
        debug!(%name, len = bytes.len(), "SourceOfTruth::set_raw: called");
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), bytes);
    }

    pub fn get_raw(&self, name: &str) -> Option<Vec<u8>> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Remove the state under `name`, returning whether it existed
    pub fn delete(&self, name: &str) -> bool {
        debug!(%name, "SourceOfTruth::delete: called");
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    /// Registered object names, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, name: &str) -> bool {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Settings {
        mode: String,
        retries: u8,
    }

    #[test]
    fn test_set_get() {
        let truth = SourceOfTruth::new();
        let settings = Settings {
            mode: "fast".to_string(),
            retries: 3,
        };

        truth.set("settings", &settings).unwrap();
        assert!(truth.contains("settings"));
        assert_eq!(truth.get::<Settings>("settings").unwrap(), Some(settings));
    }

    #[test]
    fn test_missing_name() {
        let truth = SourceOfTruth::new();
        assert_eq!(truth.get::<Settings>("nope").unwrap(), None);
        assert!(truth.get_raw("nope").is_none());
        assert!(!truth.delete("nope"));
    }

    #[test]
    fn test_overwrite_and_delete() {
        let truth = SourceOfTruth::new();
        truth.set_raw("b", b"1".to_vec());
        truth.set_raw("a", b"2".to_vec());
        truth.set_raw("b", b"3".to_vec());

        assert_eq!(truth.keys(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(truth.get_raw("b"), Some(b"3".to_vec()));

        assert!(truth.delete("b"));
        assert!(!truth.contains("b"));
        assert_eq!(truth.keys(), vec!["a".to_string()]);
    }

    #[test]
    fn test_clones_share_state() {
        let truth = SourceOfTruth::new();
        let reader = truth.clone();
        truth.set_raw("x", b"7".to_vec());
        assert_eq!(reader.get::<u32>("x").unwrap(), Some(7));
    }
}
