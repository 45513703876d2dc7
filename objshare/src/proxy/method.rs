//! Method proxies and assignment values

use serde_json::Value;
use tracing::debug;

use crate::coordinator::{CoordinatorHandle, Dispatch};
use crate::error::Result;
use crate::shared::{CallArgs, SharedObject, counter_key};

use super::rmw::{RmwToken, Tracked};

/// Bump pending for every written key, then enqueue
///
/// Pending is raised before the command is queued so any read issued after
/// this returns already waits for it. If the enqueue fails, or this future is
/// dropped before the command is queued, the bumps are withdrawn.
pub(crate) async fn dispatch(
    handle: &CoordinatorHandle,
    object: &str,
    method: &str,
    args: &CallArgs,
    writes: Vec<String>,
) -> Result<Dispatch> {
    let keys: Vec<String> = writes.iter().map(|attr| counter_key(object, attr)).collect();
    let reservation = handle.reserve_pending(keys);

    let dispatch = handle.queue_command(object, method, args, writes).await?;
    reservation.commit();
    Ok(dispatch)
}

/// A writing method of a shared object; calling it queues a command
#[derive(Debug, Clone)]
pub struct MethodProxy {
    object: String,
    method: String,
    writes: Vec<String>,
    alias: Option<String>,
    handle: CoordinatorHandle,
}

impl MethodProxy {
    pub(crate) fn new(
        object: &str,
        method: &str,
        writes: Vec<String>,
        alias: Option<String>,
        handle: CoordinatorHandle,
    ) -> Self {
        Self {
            object: object.to_string(),
            method: method.to_string(),
            writes,
            alias,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.method
    }

    /// Attributes this method is declared to write
    pub fn writes(&self) -> &[String] {
        &self.writes
    }

    /// Queue a call and return without waiting for it to apply
    pub async fn call(&self, args: &CallArgs) -> Result<Dispatch> {
        debug!(object = %self.object, method = %self.method, "MethodProxy::call: called");
        let target = self.alias.as_deref().unwrap_or(&self.method);
        dispatch(&self.handle, &self.object, target, args, self.writes.clone()).await
    }
}

/// A read-only method bound to a fresh copy of the object
#[derive(Debug, Clone)]
pub struct BoundMethod<T> {
    name: String,
    object: T,
}

impl<T: SharedObject> BoundMethod<T> {
    pub(crate) fn new(name: &str, object: T) -> Self {
        Self {
            name: name.to_string(),
            object,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The copy this method runs against
    pub fn object(&self) -> &T {
        &self.object
    }

    /// Evaluate the method; nothing is queued
    pub fn call(&self, args: &CallArgs) -> Result<Value> {
        debug!(method = %self.name, "BoundMethod::call: called");
        Ok(self.object.query(&self.name, args)?)
    }
}

/// Right-hand side of an attribute assignment through a proxy
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    /// Store this value as-is
    Value(Value),
    /// Recombine against the mirror's value at apply time
    Rmw(RmwToken),
}

impl From<RmwToken> for Assignment {
    fn from(token: RmwToken) -> Self {
        Assignment::Rmw(token)
    }
}

impl From<Tracked> for Assignment {
    fn from(tracked: Tracked) -> Self {
        Assignment::Value(tracked.into_value())
    }
}

macro_rules! value_assignment {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Assignment {
                fn from(value: $ty) -> Self {
                    Assignment::Value(Value::from(value))
                }
            }
        )*
    };
}

value_assignment!(Value, bool, i32, i64, u32, u64, f64, String, &str, Vec<Value>);
