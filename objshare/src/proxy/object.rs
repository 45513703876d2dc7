//! ObjectProxy - local face of a coordinator-owned object

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::coordinator::{CoordinatorHandle, Dispatch};
use crate::error::{CallError, Result, ShareError};
use crate::shared::{
    CallArgs, DELITEM, MethodSpec, RMW_KWARG, SETATTR, SETITEM, SharedMetadata, SharedObject, counter_key, is_reserved,
};

use super::method::{Assignment, BoundMethod, MethodProxy, dispatch};
use super::rmw::{RmwOp, RmwToken, Tracked};

/// What an attribute lookup through a proxy resolved to
#[derive(Debug, Clone)]
pub enum Attr<T> {
    /// A field or property value, read after its barrier cleared
    Value(Value),
    /// A writing method; calling it queues a command
    Method(MethodProxy),
    /// A read-only method bound to a fresh copy
    Bound(BoundMethod<T>),
}

impl<T> Attr<T> {
    fn into_value(self, name: &str) -> Result<Value> {
        match self {
            Attr::Value(value) => Ok(value),
            Attr::Method(_) | Attr::Bound(_) => Err(ShareError::NotAValue(name.to_string())),
        }
    }
}

/// Proxy for one shared object registered with a coordinator
///
/// Holds nothing but the object's name, a handle and the type's metadata.
/// Every read recomputes from committed state after the relevant barrier.
pub struct ObjectProxy<T> {
    name: String,
    handle: CoordinatorHandle,
    metadata: Arc<SharedMetadata>,
    timeout: Duration,
    _type: PhantomData<fn() -> T>,
}

impl<T> Clone for ObjectProxy<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            handle: self.handle.clone(),
            metadata: self.metadata.clone(),
            timeout: self.timeout,
            _type: PhantomData,
        }
    }
}

impl<T> fmt::Debug for ObjectProxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectProxy")
            .field("name", &self.name)
            .field("type", &std::any::type_name::<T>())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<T: SharedObject> ObjectProxy<T> {
    pub(crate) fn new(name: &str, handle: CoordinatorHandle) -> Self {
        debug!(%name, "ObjectProxy::new: called");
        let timeout = handle.config().read_timeout();
        Self {
            name: name.to_string(),
            handle,
            metadata: Arc::new(T::metadata()),
            timeout,
            _type: PhantomData,
        }
    }

    /// Use a different read barrier timeout for this proxy
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &CoordinatorHandle {
        &self.handle
    }

    pub fn metadata(&self) -> &SharedMetadata {
        &self.metadata
    }

    fn keys_for(&self, attrs: &[String]) -> Vec<String> {
        attrs.iter().map(|attr| counter_key(&self.name, attr)).collect()
    }

    async fn barrier(&self, keys: Vec<String>) -> Result<()> {
        if self.handle.wait_for_read(&keys, self.timeout).await {
            Ok(())
        } else {
            Err(ShareError::WaitTimeout {
                keys,
                timeout: self.timeout,
            })
        }
    }

    /// Wait on every key this object has seen a write for
    async fn full_barrier(&self) -> Result<()> {
        self.barrier(self.handle.object_keys(&self.name)).await
    }

    fn fetch(&self) -> Result<T> {
        self.handle.fetch(&self.name)
    }

    /// Resolve `name` the way attribute access on the object would
    ///
    /// Blocked methods fail, writing methods come back as a [`MethodProxy`],
    /// read-only methods bind to a fresh copy, tracked properties wait only on
    /// their declared reads, and anything else waits on the whole object.
    pub async fn getattr(&self, name: &str) -> Result<Attr<T>> {
        debug!(object = %self.name, %name, "ObjectProxy::getattr: called");
        if is_reserved(name) {
            return Err(ShareError::InvalidName(name.to_string()));
        }

        if let Some(message) = self.metadata.blocked_message(name) {
            return Err(ShareError::Blocked {
                method: name.to_string(),
                message: message.to_string(),
            });
        }

        match self.metadata.method(name) {
            Some(MethodSpec::Writer { writes, alias }) => {
                return Ok(Attr::Method(MethodProxy::new(
                    &self.name,
                    name,
                    writes.clone(),
                    alias.clone(),
                    self.handle.clone(),
                )));
            }
            Some(MethodSpec::Reader { reads }) => {
                match reads {
                    Some(reads) => self.barrier(self.keys_for(reads)).await?,
                    None => self.full_barrier().await?,
                }
                return Ok(Attr::Bound(BoundMethod::new(name, self.fetch()?)));
            }
            None => {}
        }

        if let Some(reads) = self.metadata.property_reads(name) {
            self.barrier(self.keys_for(reads)).await?;
            return self.value_of(name, self.fetch()?);
        }

        self.full_barrier().await?;
        let object = self.fetch()?;
        if let Some(value) = object.get_attr(name) {
            return Ok(Attr::Value(value));
        }

        // Not a known field; treat it as an undeclared method
        if self.metadata.has_blocked() {
            return Err(ShareError::Blocked {
                method: name.to_string(),
                message: "undeclared methods are not exposed by this type".to_string(),
            });
        }
        Ok(Attr::Bound(BoundMethod::new(name, object)))
    }

    fn value_of(&self, name: &str, object: T) -> Result<Attr<T>> {
        object
            .get_attr(name)
            .map(Attr::Value)
            .ok_or_else(|| ShareError::AttributeNotFound {
                object: self.name.clone(),
                attr: name.to_string(),
            })
    }

    /// Current value of a field or property
    pub async fn get(&self, name: &str) -> Result<Value> {
        match self.getattr(name).await? {
            Attr::Bound(_) if self.metadata.method(name).is_none() => Err(ShareError::AttributeNotFound {
                object: self.name.clone(),
                attr: name.to_string(),
            }),
            attr => attr.into_value(name),
        }
    }

    /// Current value of a field or property, deserialized
    pub async fn get_as<V: DeserializeOwned>(&self, name: &str) -> Result<V> {
        Ok(serde_json::from_value(self.get(name).await?)?)
    }

    /// Call a method by name
    ///
    /// Writing methods are queued and yield `None`; read-only methods run
    /// against a fresh copy and yield their result.
    pub async fn call(&self, name: &str, args: &CallArgs) -> Result<Option<Value>> {
        debug!(object = %self.name, %name, "ObjectProxy::call: called");
        match self.getattr(name).await? {
            Attr::Method(method) => {
                method.call(args).await?;
                Ok(None)
            }
            Attr::Bound(bound) => bound.call(args).map(Some),
            Attr::Value(_) => Err(ShareError::NotCallable(name.to_string())),
        }
    }

    /// Assign an attribute
    ///
    /// A token built from this same attribute (`attr_ref(name) + 1`) is
    /// recombined against the mirror's value at apply time. A token from any
    /// other attribute stores its preview.
    pub async fn set(&self, name: &str, value: impl Into<Assignment>) -> Result<Dispatch> {
        debug!(object = %self.name, %name, "ObjectProxy::set: called");
        if is_reserved(name) {
            return Err(ShareError::InvalidName(name.to_string()));
        }

        let args = match value.into() {
            Assignment::Value(value) => CallArgs::new().with_arg(name).with_arg(value),
            Assignment::Rmw(token) if token.is_from(&self.name, name) => rmw_args(name, &token)?,
            Assignment::Rmw(token) => {
                let preview = token.preview().cloned().ok_or_else(|| {
                    ShareError::InvalidRmw(format!(
                        "{} {} cannot be evaluated for {}.{}",
                        token.op(),
                        token.operand(),
                        self.name,
                        name
                    ))
                })?;
                CallArgs::new().with_arg(name).with_arg(preview)
            }
        };

        dispatch(&self.handle, &self.name, SETATTR, &args, vec![name.to_string()]).await
    }

    /// Read an attribute as a value that remembers where it came from
    pub async fn attr_ref(&self, name: &str) -> Result<Tracked> {
        let value = self.get(name).await?;
        Ok(Tracked::new(&self.name, name, value))
    }

    /// Combine an attribute in place at apply time, without reading it first
    pub async fn apply_op(&self, name: &str, op: RmwOp, operand: impl Into<Value>) -> Result<Dispatch> {
        debug!(object = %self.name, %name, %op, "ObjectProxy::apply_op: called");
        if is_reserved(name) {
            return Err(ShareError::InvalidName(name.to_string()));
        }
        let args = CallArgs::new()
            .with_arg(name)
            .with_arg(operand.into())
            .with_kwarg(RMW_KWARG, serde_json::to_value(op)?);
        dispatch(&self.handle, &self.name, SETATTR, &args, vec![name.to_string()]).await
    }

    /// Fresh copy of the whole object after every outstanding write applies
    pub async fn snapshot(&self) -> Result<T> {
        debug!(object = %self.name, "ObjectProxy::snapshot: called");
        self.full_barrier().await?;
        self.fetch()
    }

    pub async fn len(&self) -> Result<usize> {
        let object = self.snapshot().await?;
        Ok(object.len().ok_or_else(|| CallError::Unsupported("len".to_string()))?)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Contained items, in iteration order
    pub async fn iter(&self) -> Result<Vec<Value>> {
        let object = self.snapshot().await?;
        Ok(object.items().ok_or_else(|| CallError::Unsupported("iteration".to_string()))?)
    }

    pub async fn contains(&self, item: impl Into<Value>) -> Result<bool> {
        let item = item.into();
        let object = self.snapshot().await?;
        Ok(object
            .contains(&item)
            .ok_or_else(|| CallError::Unsupported("membership test".to_string()))?)
    }

    pub async fn get_item(&self, key: impl Into<Value>) -> Result<Value> {
        let key = key.into();
        let object = self.snapshot().await?;
        Ok(object.get_item(&key)?)
    }

    /// Queue an item assignment
    pub async fn set_item(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<Dispatch> {
        debug!(object = %self.name, "ObjectProxy::set_item: called");
        let args = CallArgs::new().with_arg(key.into()).with_arg(value.into());
        let writes = self.metadata.item_writes(SETITEM);
        dispatch(&self.handle, &self.name, SETITEM, &args, writes).await
    }

    /// Queue an item deletion
    pub async fn del_item(&self, key: impl Into<Value>) -> Result<Dispatch> {
        debug!(object = %self.name, "ObjectProxy::del_item: called");
        let args = CallArgs::new().with_arg(key.into());
        let writes = self.metadata.item_writes(DELITEM);
        dispatch(&self.handle, &self.name, DELITEM, &args, writes).await
    }

    pub async fn is_truthy(&self) -> Result<bool> {
        Ok(self.snapshot().await?.is_truthy())
    }

    /// String form of the current state
    pub async fn display(&self) -> Result<String> {
        Ok(self.snapshot().await?.describe())
    }
}

fn rmw_args(name: &str, token: &RmwToken) -> Result<CallArgs> {
    Ok(CallArgs::new()
        .with_arg(name)
        .with_arg(token.operand().clone())
        .with_kwarg(RMW_KWARG, serde_json::to_value(token.op())?))
}
