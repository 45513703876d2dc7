//! Shared object interface and per-type metadata
//!
//! A type becomes shareable by implementing [`SharedObject`]. The trait gives
//! the coordinator a way to apply writes to its mirror, and gives proxies a
//! [`SharedMetadata`] describing which attributes each method writes and each
//! property reads, so read barriers can be scoped to exactly those keys.

use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::CallError;

/// Method name used for attribute assignment commands
pub const SETATTR: &str = "__setattr__";

/// Method name used for item assignment commands
pub const SETITEM: &str = "__setitem__";

/// Method name used for item deletion commands
pub const DELITEM: &str = "__delitem__";

/// Keyword argument carrying the operator of a read-modify-write assignment
pub const RMW_KWARG: &str = "__rmw__";

/// Attribute written by item set/delete when the type declares nothing else
pub const ITEMS_ATTR: &str = "__items__";

/// Build the counter key for an attribute of a shared object
pub fn counter_key(object: &str, attr: &str) -> String {
    format!("{}.{}", object, attr)
}

/// Prefix shared by every counter key of an object
pub fn key_prefix(object: &str) -> String {
    format!("{}.", object)
}

/// Check whether a name is reserved for the command protocol
pub fn is_reserved(name: &str) -> bool {
    name.is_empty() || (name.starts_with("__") && name.ends_with("__"))
}

/// How a method interacts with shared state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodSpec {
    /// Mutates the object; queued to the coordinator
    Writer {
        writes: Vec<String>,
        /// Server-side substitute executed instead of the declared name
        alias: Option<String>,
    },
    /// Executes against a fresh copy; `None` reads means the whole object
    Reader { reads: Option<Vec<String>> },
}

/// Static description of a shared type's read and write dependencies
#[derive(Debug, Clone, Default)]
pub struct SharedMetadata {
    methods: HashMap<String, MethodSpec>,
    properties: HashMap<String, Vec<String>>,
    blocked: HashMap<String, String>,
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

impl SharedMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a writing method and the attributes it writes
    pub fn writer(mut self, name: &str, writes: &[&str]) -> Self {
        self.methods.insert(
            name.to_string(),
            MethodSpec::Writer {
                writes: owned(writes),
                alias: None,
            },
        );
        self
    }

    /// Declare a writing method that the coordinator runs under another name
    pub fn writer_with_alias(mut self, name: &str, writes: &[&str], alias: &str) -> Self {
        self.methods.insert(
            name.to_string(),
            MethodSpec::Writer {
                writes: owned(writes),
                alias: Some(alias.to_string()),
            },
        );
        self
    }

    /// Declare a read-only method that may read any attribute
    pub fn reader(mut self, name: &str) -> Self {
        self.methods.insert(name.to_string(), MethodSpec::Reader { reads: None });
        self
    }

    /// Declare a read-only method along with the attributes it reads
    pub fn reader_of(mut self, name: &str, reads: &[&str]) -> Self {
        self.methods.insert(
            name.to_string(),
            MethodSpec::Reader {
                reads: Some(owned(reads)),
            },
        );
        self
    }

    /// Declare a tracked property and the attributes it reads
    pub fn property(mut self, name: &str, reads: &[&str]) -> Self {
        self.properties.insert(name.to_string(), owned(reads));
        self
    }

    /// Forbid a method through proxies
    pub fn blocked(mut self, name: &str, message: &str) -> Self {
        self.blocked.insert(name.to_string(), message.to_string());
        self
    }

    pub fn method(&self, name: &str) -> Option<&MethodSpec> {
        self.methods.get(name)
    }

    /// Attributes written by a method, or `None` for read-only and unknown methods
    pub fn writes_of(&self, name: &str) -> Option<&[String]> {
        match self.methods.get(name) {
            Some(MethodSpec::Writer { writes, .. }) => Some(writes),
            _ => None,
        }
    }

    /// Server-side alias for a writing method
    pub fn alias_of(&self, name: &str) -> Option<&str> {
        match self.methods.get(name) {
            Some(MethodSpec::Writer { alias, .. }) => alias.as_deref(),
            _ => None,
        }
    }

    pub fn property_reads(&self, name: &str) -> Option<&[String]> {
        self.properties.get(name).map(Vec::as_slice)
    }

    pub fn blocked_message(&self, name: &str) -> Option<&str> {
        self.blocked.get(name).map(String::as_str)
    }

    pub fn has_blocked(&self) -> bool {
        !self.blocked.is_empty()
    }

    /// Attributes written by item assignment and deletion
    pub fn item_writes(&self, method: &str) -> Vec<String> {
        self.writes_of(method)
            .map(<[String]>::to_vec)
            .unwrap_or_else(|| vec![ITEMS_ATTR.to_string()])
    }
}

/// Positional and keyword arguments of a method call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument
    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument
    pub fn with_kwarg(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.to_string(), value.into());
        self
    }

    /// Positional argument at `index`
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, CallError> {
        let value = self
            .args
            .get(index)
            .ok_or_else(|| CallError::InvalidArgument(format!("missing positional argument {}", index)))?;
        serde_json::from_value(value.clone())
            .map_err(|e| CallError::InvalidArgument(format!("argument {}: {}", index, e)))
    }

    /// Keyword argument `name`, if present
    pub fn kwarg<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, CallError> {
        match self.kwargs.get(name) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| CallError::InvalidArgument(format!("argument '{}': {}", name, e))),
            None => Ok(None),
        }
    }

    /// Argument given either by keyword or at a positional index
    pub fn param<T: DeserializeOwned>(&self, index: usize, name: &str) -> Result<T, CallError> {
        match self.kwarg(name)? {
            Some(value) => Ok(value),
            None => self.arg(index),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }
}

fn as_object(value: Value) -> Result<Map<String, Value>, CallError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(CallError::Unsupported(format!(
            "attribute access on non-struct state ({})",
            type_name(&other)
        ))),
    }
}

/// Short JSON type name used in error messages
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A type whose single authoritative instance is owned by a coordinator
///
/// Field access defaults to the serde representation of the type, so plain
/// structs only need [`metadata`](SharedObject::metadata) and
/// [`invoke`](SharedObject::invoke). Types with computed properties, read-only
/// methods or container behavior override the matching hooks.
pub trait SharedObject: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Read/write dependencies of this type's methods and properties
    fn metadata() -> SharedMetadata;

    /// Apply a writing method to this instance
    fn invoke(&mut self, method: &str, args: &CallArgs) -> Result<(), CallError>;

    /// Evaluate a read-only method
    fn query(&self, method: &str, _args: &CallArgs) -> Result<Value, CallError> {
        Err(CallError::UnknownMethod(method.to_string()))
    }

    /// Current value of a field or property
    fn get_attr(&self, name: &str) -> Option<Value> {
        let value = serde_json::to_value(self).ok()?;
        value.get(name).cloned()
    }

    /// Replace the value of a field
    fn set_attr(&mut self, name: &str, value: Value) -> Result<(), CallError> {
        debug!(%name, "SharedObject::set_attr: called");
        let current = serde_json::to_value(&*self).map_err(|e| CallError::Failed(e.to_string()))?;
        let mut fields = as_object(current)?;
        if !fields.contains_key(name) {
            return Err(CallError::UnknownAttribute(name.to_string()));
        }
        fields.insert(name.to_string(), value);
        *self = serde_json::from_value(Value::Object(fields))
            .map_err(|e| CallError::InvalidArgument(format!("{}: {}", name, e)))?;
        Ok(())
    }

    /// Number of contained items, if this type is a container
    fn len(&self) -> Option<usize> {
        None
    }

    /// Contained items in iteration order, if this type is a container
    fn items(&self) -> Option<Vec<Value>> {
        None
    }

    fn contains(&self, item: &Value) -> Option<bool> {
        self.items().map(|items| items.contains(item))
    }

    fn get_item(&self, key: &Value) -> Result<Value, CallError> {
        Err(CallError::Unsupported(format!("item lookup [{}]", key)))
    }

    fn set_item(&mut self, key: Value, _value: Value) -> Result<(), CallError> {
        Err(CallError::Unsupported(format!("item assignment [{}]", key)))
    }

    fn del_item(&mut self, key: &Value) -> Result<(), CallError> {
        Err(CallError::Unsupported(format!("item deletion [{}]", key)))
    }

    /// Truthiness: containers are true when non-empty, everything else is true
    fn is_truthy(&self) -> bool {
        self.len().is_none_or(|n| n > 0)
    }

    /// String conversion
    fn describe(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("<unserializable: {}>", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Gauge {
        level: i64,
        label: String,
    }

    impl SharedObject for Gauge {
        fn metadata() -> SharedMetadata {
            SharedMetadata::new()
                .writer("raise", &["level"])
                .reader_of("peek", &["level"])
                .property("doubled", &["level"])
                .blocked("reset_hard", "not allowed through a proxy")
        }

        fn invoke(&mut self, method: &str, args: &CallArgs) -> Result<(), CallError> {
            match method {
                "raise" => {
                    self.level += args.param::<i64>(0, "by")?;
                    Ok(())
                }
                other => Err(CallError::UnknownMethod(other.to_string())),
            }
        }
    }

    #[test]
    fn test_counter_key_format() {
        assert_eq!(counter_key("stats", "count"), "stats.count");
        assert!(counter_key("stats", "count").starts_with(&key_prefix("stats")));
    }

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved(""));
        assert!(is_reserved(SETATTR));
        assert!(!is_reserved("count"));
        assert!(!is_reserved("_private"));
    }

    #[test]
    fn test_metadata_lookup() {
        let meta = Gauge::metadata();

        assert_eq!(meta.writes_of("raise"), Some(&["level".to_string()][..]));
        assert_eq!(meta.writes_of("peek"), None);
        assert_eq!(meta.property_reads("doubled"), Some(&["level".to_string()][..]));
        assert_eq!(meta.blocked_message("reset_hard"), Some("not allowed through a proxy"));
        assert!(meta.has_blocked());
        assert_eq!(meta.item_writes(SETITEM), vec![ITEMS_ATTR.to_string()]);
    }

    #[test]
    fn test_alias_only_for_writers() {
        let meta = SharedMetadata::new()
            .writer_with_alias("pop", &["items"], "pop_nowait")
            .reader("size");

        assert_eq!(meta.alias_of("pop"), Some("pop_nowait"));
        assert_eq!(meta.alias_of("size"), None);
    }

    #[test]
    fn test_call_args_param_prefers_keyword() {
        let args = CallArgs::new().with_arg(1).with_kwarg("by", 5);
        assert_eq!(args.param::<i64>(0, "by").unwrap(), 5);
        assert_eq!(args.arg::<i64>(0).unwrap(), 1);
        assert!(args.arg::<i64>(3).is_err());
        assert_eq!(args.kwarg::<i64>("missing").unwrap(), None);
    }

    #[test]
    fn test_default_attr_access() {
        let mut gauge = Gauge {
            level: 3,
            label: "tank".to_string(),
        };

        assert_eq!(gauge.get_attr("level"), Some(json!(3)));
        assert_eq!(gauge.get_attr("nope"), None);

        gauge.set_attr("label", json!("reservoir")).unwrap();
        assert_eq!(gauge.label, "reservoir");

        assert_eq!(
            gauge.set_attr("nope", json!(1)),
            Err(CallError::UnknownAttribute("nope".to_string()))
        );
        assert!(matches!(
            gauge.set_attr("level", json!("high")),
            Err(CallError::InvalidArgument(_))
        ));
        assert_eq!(gauge.level, 3);
    }

    #[test]
    fn test_non_container_defaults() {
        let gauge = Gauge {
            level: 0,
            label: String::new(),
        };

        assert_eq!(gauge.len(), None);
        assert!(gauge.is_truthy());
        assert!(gauge.get_item(&json!(0)).is_err());
        assert!(gauge.describe().contains("\"level\":0"));
    }
}
