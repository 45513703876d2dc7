//! Type-erased mirrors owned by the apply loop

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::codec;
use crate::error::{CallError, Result};
use crate::proxy::RmwOp;
use crate::shared::{CallArgs, DELITEM, RMW_KWARG, SETATTR, SETITEM, SharedObject};
use crate::sync::Command;

/// The coordinator's private, mutable copy of one shared object
pub(crate) trait Mirror: Send {
    /// Run one command against this mirror
    fn apply(&mut self, method: &str, args: &CallArgs) -> std::result::Result<(), CallError>;

    /// Serialize the current state for commit
    fn encode(&self) -> Result<Vec<u8>>;
}

/// Rebuilds a mirror of the registered type from committed bytes
pub(crate) type MirrorLoader = Arc<dyn Fn(&[u8]) -> Result<Box<dyn Mirror>> + Send + Sync>;

pub(crate) fn loader_for<T: SharedObject>() -> MirrorLoader {
    Arc::new(|bytes: &[u8]| {
        let object: T = codec::deserialize(bytes)?;
        Ok(Box::new(object) as Box<dyn Mirror>)
    })
}

/// Decode the serialized arguments of a command
pub(crate) fn decode_args(command: &Command) -> Result<CallArgs> {
    let args: Vec<Value> = codec::deserialize(&command.args)?;
    let kwargs: Map<String, Value> = codec::deserialize(&command.kwargs)?;
    Ok(CallArgs { args, kwargs })
}

impl<T: SharedObject> Mirror for T {
    fn apply(&mut self, method: &str, args: &CallArgs) -> std::result::Result<(), CallError> {
        match method {
            SETATTR => {
                let name: String = args.arg(0)?;
                let value: Value = args.arg(1)?;
                match args.kwarg::<RmwOp>(RMW_KWARG)? {
                    Some(op) => {
                        let current = self
                            .get_attr(&name)
                            .ok_or_else(|| CallError::UnknownAttribute(name.clone()))?;
                        let combined = op.apply(&current, &value)?;
                        self.set_attr(&name, combined)
                    }
                    None => self.set_attr(&name, value),
                }
            }
            SETITEM => {
                let key: Value = args.arg(0)?;
                let value: Value = args.arg(1)?;
                self.set_item(key, value)
            }
            DELITEM => {
                let key: Value = args.arg(0)?;
                self.del_item(&key)
            }
            other => self.invoke(other, args),
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        codec::serialize(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::SharedMetadata;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Scores {
        total: i64,
        names: Vec<String>,
    }

    impl SharedObject for Scores {
        fn metadata() -> SharedMetadata {
            SharedMetadata::new().writer("bump", &["total"])
        }

        fn invoke(&mut self, method: &str, _args: &CallArgs) -> std::result::Result<(), CallError> {
            match method {
                "bump" => {
                    self.total += 1;
                    Ok(())
                }
                other => Err(CallError::UnknownMethod(other.to_string())),
            }
        }
    }

    fn load(scores: &Scores) -> Box<dyn Mirror> {
        let bytes = codec::serialize(scores).unwrap();
        loader_for::<Scores>()(&bytes).unwrap()
    }

    fn state(mirror: &dyn Mirror) -> Scores {
        codec::deserialize(&mirror.encode().unwrap()).unwrap()
    }

    #[test]
    fn test_dispatch_to_invoke() {
        let mut mirror = load(&Scores::default());
        mirror.apply("bump", &CallArgs::new()).unwrap();
        assert_eq!(state(mirror.as_ref()).total, 1);

        let err = mirror.apply("explode", &CallArgs::new()).unwrap_err();
        assert_eq!(err, CallError::UnknownMethod("explode".to_string()));
    }

    #[test]
    fn test_setattr_plain_and_rmw() {
        let mut mirror = load(&Scores {
            total: 5,
            names: vec![],
        });

        mirror
            .apply(SETATTR, &CallArgs::new().with_arg("total").with_arg(40))
            .unwrap();
        assert_eq!(state(mirror.as_ref()).total, 40);

        let rmw = CallArgs::new()
            .with_arg("total")
            .with_arg(2)
            .with_kwarg(RMW_KWARG, json!("add"));
        mirror.apply(SETATTR, &rmw).unwrap();
        mirror.apply(SETATTR, &rmw).unwrap();
        assert_eq!(state(mirror.as_ref()).total, 44);

        let append = CallArgs::new()
            .with_arg("names")
            .with_arg(json!(["ada"]))
            .with_kwarg(RMW_KWARG, json!("add"));
        mirror.apply(SETATTR, &append).unwrap();
        assert_eq!(state(mirror.as_ref()).names, vec!["ada".to_string()]);
    }

    #[test]
    fn test_item_protocol_unsupported_by_default() {
        let mut mirror = load(&Scores::default());
        let err = mirror
            .apply(SETITEM, &CallArgs::new().with_arg(0).with_arg(1))
            .unwrap_err();
        assert!(matches!(err, CallError::Unsupported(_)));
    }

    #[test]
    fn test_decode_args() {
        let command = Command {
            object: "scores".to_string(),
            method: "bump".to_string(),
            args: codec::serialize(&vec![json!(1)]).unwrap(),
            kwargs: codec::serialize(&json!({"by": 2})).unwrap(),
            written_attrs: vec![],
        };

        let args = decode_args(&command).unwrap();
        assert_eq!(args.arg::<i64>(0).unwrap(), 1);
        assert_eq!(args.kwarg::<i64>("by").unwrap(), Some(2));
    }
}
