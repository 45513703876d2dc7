//! Byte codec for object state and command arguments
//!
//! Everything that crosses from a worker to the coordinator (initial state,
//! positional and keyword arguments, committed mirrors) goes through these two
//! functions.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::Result;

/// Serialize a value to bytes
pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let bytes = serde_json::to_vec(value)?;
    debug!(len = bytes.len(), "serialize: encoded");
    Ok(bytes)
}

/// Deserialize bytes back into a value
pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    debug!(len = bytes.len(), "deserialize: called");
    Ok(serde_json::from_slice(bytes)?)
}
