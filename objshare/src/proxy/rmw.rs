//! Atomic read-modify-write tokens
//!
//! `proxy.set("n", proxy.attr_ref("n").await? + 1)` does not send the
//! client's sum. The `+` produces an [`RmwToken`] remembering the operator and
//! operand; when it is assigned back into the attribute it came from, the
//! coordinator recombines against the mirror's value at apply time. Two
//! workers doing this concurrently both land.

use std::ops::{Add, BitAnd, BitOr, BitXor, Mul, Sub};

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use tracing::debug;

use crate::error::CallError;
use crate::shared::type_name;

/// Binary operator deferred to apply time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RmwOp {
    Add,
    Sub,
    Mul,
    BitOr,
    BitAnd,
    BitXor,
}

impl std::fmt::Display for RmwOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::BitOr => "bitor",
            Self::BitAnd => "bitand",
            Self::BitXor => "bitxor",
        };
        write!(f, "{}", name)
    }
}

impl RmwOp {
    fn is_bitwise(&self) -> bool {
        matches!(self, Self::BitOr | Self::BitAnd | Self::BitXor)
    }

    fn mismatch(&self, left: &Value, right: &Value) -> CallError {
        CallError::TypeMismatch {
            op: self.to_string(),
            left: type_name(left).to_string(),
            right: type_name(right).to_string(),
        }
    }

    /// Combine `current` with `operand`
    pub fn apply(&self, current: &Value, operand: &Value) -> Result<Value, CallError> {
        debug!(op = %self, "RmwOp::apply: called");
        match (current, operand) {
            (Value::Number(a), Value::Number(b)) => self.apply_numbers(a, b),
            (Value::String(a), Value::String(b)) if *self == Self::Add => Ok(Value::String(format!("{}{}", a, b))),
            (Value::Array(a), Value::Array(b)) if *self == Self::Add => {
                Ok(Value::Array(a.iter().chain(b.iter()).cloned().collect()))
            }
            (Value::Bool(a), Value::Bool(b)) if self.is_bitwise() => Ok(Value::Bool(match self {
                Self::BitOr => a | b,
                Self::BitAnd => a & b,
                _ => a ^ b,
            })),
            _ => Err(self.mismatch(current, operand)),
        }
    }

    fn apply_numbers(&self, a: &Number, b: &Number) -> Result<Value, CallError> {
        let overflow = || CallError::Overflow(self.to_string());

        if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
            let result = match self {
                Self::Add => x.checked_add(y).ok_or_else(overflow)?,
                Self::Sub => x.checked_sub(y).ok_or_else(overflow)?,
                Self::Mul => x.checked_mul(y).ok_or_else(overflow)?,
                Self::BitOr => x | y,
                Self::BitAnd => x & y,
                Self::BitXor => x ^ y,
            };
            return Ok(Value::from(result));
        }

        if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
            let result = match self {
                Self::Add => x.checked_add(y).ok_or_else(overflow)?,
                Self::Sub => x.checked_sub(y).ok_or_else(overflow)?,
                Self::Mul => x.checked_mul(y).ok_or_else(overflow)?,
                Self::BitOr => x | y,
                Self::BitAnd => x & y,
                Self::BitXor => x ^ y,
            };
            return Ok(Value::from(result));
        }

        let (left, right) = (Value::Number(a.clone()), Value::Number(b.clone()));
        if self.is_bitwise() {
            return Err(self.mismatch(&left, &right));
        }
        let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
            return Err(self.mismatch(&left, &right));
        };
        let result = match self {
            Self::Add => x + y,
            Self::Sub => x - y,
            _ => x * y,
        };
        Number::from_f64(result).map(Value::Number).ok_or_else(overflow)
    }
}

/// A binary expression over a proxy attribute, pending assignment
#[derive(Debug, Clone, PartialEq)]
pub struct RmwToken {
    object: String,
    attr: String,
    op: RmwOp,
    operand: Value,
    preview: Option<Value>,
}

impl RmwToken {
    /// Build a token, eagerly computing the preview from `current`
    pub fn new(object: &str, attr: &str, current: &Value, op: RmwOp, operand: Value) -> Self {
        let preview = op.apply(current, &operand).ok();
        debug!(%object, %attr, %op, has_preview = preview.is_some(), "RmwToken::new: called");
        Self {
            object: object.to_string(),
            attr: attr.to_string(),
            op,
            operand,
            preview,
        }
    }

    pub fn op(&self) -> RmwOp {
        self.op
    }

    pub fn operand(&self) -> &Value {
        &self.operand
    }

    /// Value the expression had against the client's snapshot
    pub fn preview(&self) -> Option<&Value> {
        self.preview.as_ref()
    }

    /// Whether this token was built from `object.attr`
    pub fn is_from(&self, object: &str, attr: &str) -> bool {
        self.object == object && self.attr == attr
    }
}

/// Attribute value read through a proxy that still knows where it came from
///
/// Arithmetic and bitwise operators on it yield an [`RmwToken`].
#[derive(Debug, Clone, PartialEq)]
pub struct Tracked {
    object: String,
    attr: String,
    value: Value,
}

impl Tracked {
    pub(crate) fn new(object: &str, attr: &str, value: Value) -> Self {
        Self {
            object: object.to_string(),
            attr: attr.to_string(),
            value,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// Combine with `operand` using `op`
    pub fn combine(&self, op: RmwOp, operand: impl Into<Value>) -> RmwToken {
        RmwToken::new(&self.object, &self.attr, &self.value, op, operand.into())
    }
}

macro_rules! tracked_operator {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<V: Into<Value>> $trait<V> for Tracked {
            type Output = RmwToken;

            fn $method(self, operand: V) -> RmwToken {
                self.combine($op, operand)
            }
        }
    };
}

tracked_operator!(Add, add, RmwOp::Add);
tracked_operator!(Sub, sub, RmwOp::Sub);
tracked_operator!(Mul, mul, RmwOp::Mul);
tracked_operator!(BitOr, bitor, RmwOp::BitOr);
tracked_operator!(BitAnd, bitand, RmwOp::BitAnd);
tracked_operator!(BitXor, bitxor, RmwOp::BitXor);
