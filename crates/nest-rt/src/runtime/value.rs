//! Dynamically typed values passed through message sends.

use crate::runtime::{ClassId, Object, Selector};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A message argument, return value or stored property value.
///
/// Object values are reference counted; everything else is a plain value.
/// `Opaque` carries arbitrary shared Rust data, such as a
/// [`SelfAwareSwizzle`](crate::runtime::SelfAwareSwizzle) returned by a
/// launch task method.
#[derive(Clone, Default)]
pub enum Value {
    /// Absent value (`nil`).
    #[default]
    Nil,
    /// Boolean (`B`, `c`).
    Bool(bool),
    /// Signed integer (`c i s l q`).
    Int(i64),
    /// Unsigned integer (`C I S L Q`).
    UInt(u64),
    /// Floating point (`f d`).
    Double(f64),
    /// Immutable string (`*`, or an object-typed string property).
    Str(Arc<str>),
    /// Runtime object (`@`).
    Object(Object),
    /// Class reference (`#`).
    Class(ClassId),
    /// Selector (`:`).
    Selector(Selector),
    /// Shared Rust data.
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// Wraps arbitrary shared data.
    pub fn from_opaque<T: Any + Send + Sync>(value: T) -> Self {
        Value::Opaque(Arc::new(value))
    }

    /// Returns a short name for the kind of value, used in error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
            Value::Class(_) => "class",
            Value::Selector(_) => "selector",
            Value::Opaque(_) => "opaque",
        }
    }

    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Borrows opaque data as `T`, if this is an `Opaque` holding a `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Opaque(data) => data.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    /// Objects and opaque data compare by identity, everything else by value.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Class(a), Value::Class(b)) => a == b,
            (Value::Selector(a), Value::Selector(b)) => a == b,
            (Value::Opaque(a), Value::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::UInt(u) => write!(f, "{u}u"),
            Value::Double(d) => write!(f, "{d:?}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Object(o) => write!(f, "{o:?}"),
            Value::Class(c) => write!(f, "class {c}"),
            Value::Selector(s) => write!(f, "@selector({s})"),
            Value::Opaque(data) => write!(f, "<opaque {:p}>", Arc::as_ptr(data)),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(Arc::from(value))
    }
}

impl From<Object> for Value {
    fn from(value: Object) -> Self {
        Value::Object(value)
    }
}

impl From<Option<Object>> for Value {
    fn from(value: Option<Object>) -> Self {
        value.map_or(Value::Nil, Value::Object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_kinds() {
        assert_eq!(Value::Nil.kind(), "nil");
        assert_eq!(Value::from(3).kind(), "int");
        assert_eq!(Value::from("x").kind(), "string");
        assert_eq!(Value::from(2.5).kind(), "double");
    }

    #[test]
    fn test_opaque_downcast() {
        let value = Value::from_opaque(vec![1u8, 2, 3]);
        assert_eq!(value.downcast_ref::<Vec<u8>>(), Some(&vec![1, 2, 3]));
        assert!(value.downcast_ref::<String>().is_none());
        assert!(Value::Nil.downcast_ref::<Vec<u8>>().is_none());
    }

    #[test]
    fn test_opaque_equality_is_identity() {
        let a = Value::from_opaque(1u32);
        let b = Value::from_opaque(1u32);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
