//! Native-side values
//!
//! [`Value`] is what native code passes to and receives from the dispatcher.
//! Object variants borrow the [`Scope`](crate::Scope) that produced them, so
//! a `Value<'s>` cannot outlive its local frame. [`OwnedValue`] is the
//! scope-free, `Send` form used by worker threads and native callbacks.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::codec::StructuredError;
use crate::error::{Error, Result};
use crate::refs::{Durable, Handle};

/// A native value crossing the bridge
#[derive(Clone)]
pub enum Value<'s> {
    /// No value (void return)
    Void,
    /// Null reference
    Null,
    /// `boolean`
    Boolean(bool),
    /// `byte`
    Byte(i8),
    /// `char` (UTF-16 code unit)
    Char(u16),
    /// `short`
    Short(i16),
    /// `int`
    Int(i32),
    /// `long`
    Long(i64),
    /// `float`
    Float(f32),
    /// `double`
    Double(f64),
    /// Decoded `java.lang.String`
    String(String),
    /// Decoded `byte[]`
    Bytes(Vec<u8>),
    /// Decoded `String[]`
    Strings(Vec<String>),
    /// Any other VM object
    Object(Handle<'s>),
    /// A VM class object
    Class(Handle<'s>),
    /// Decoded structured error
    Error(StructuredError),
    /// A durable VM reference
    Durable(Arc<Durable>),
    /// An arbitrary native value; never convertible to a VM value
    Native(Arc<dyn Any + Send + Sync>),
}

/// Scope-free value, safe to move between threads
#[derive(Clone)]
pub enum OwnedValue {
    /// No value
    Void,
    /// Null reference
    Null,
    /// `boolean`
    Boolean(bool),
    /// `byte`
    Byte(i8),
    /// `char`
    Char(u16),
    /// `short`
    Short(i16),
    /// `int`
    Int(i32),
    /// `long`
    Long(i64),
    /// `float`
    Float(f32),
    /// `double`
    Double(f64),
    /// String
    String(String),
    /// Byte array
    Bytes(Vec<u8>),
    /// String array
    Strings(Vec<String>),
    /// Structured error
    Error(StructuredError),
    /// A durable VM reference
    Durable(Arc<Durable>),
    /// An arbitrary native value
    Native(Arc<dyn Any + Send + Sync>),
}

impl<'s> Value<'s> {
    /// Short name of the variant, used in conversion errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Byte(_) => "byte",
            Value::Char(_) => "char",
            Value::Short(_) => "short",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Bytes(_) => "byte[]",
            Value::Strings(_) => "String[]",
            Value::Object(_) => "object",
            Value::Class(_) => "class",
            Value::Error(_) => "error",
            Value::Durable(_) => "durable object",
            Value::Native(_) => "native value",
        }
    }

    /// Whether this is [`Value::Null`]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Transient handle, for object and class values
    pub fn as_handle(&self) -> Option<Handle<'s>> {
        match self {
            Value::Object(h) | Value::Class(h) => Some(*h),
            _ => None,
        }
    }

    /// Extract a typed value
    pub fn get<T: FromValue<'s>>(self) -> Result<T> {
        T::from_value(self)
    }

    fn mismatch(&self, expected: &str) -> Error {
        Error::UnexpectedType {
            expected: expected.to_string(),
            found: self.type_name().to_string(),
        }
    }
}

impl OwnedValue {
    /// Short name of the variant
    pub fn type_name(&self) -> &'static str {
        Value::from(self.clone()).type_name()
    }
}

impl From<OwnedValue> for Value<'_> {
    fn from(value: OwnedValue) -> Self {
        match value {
            OwnedValue::Void => Value::Void,
            OwnedValue::Null => Value::Null,
            OwnedValue::Boolean(b) => Value::Boolean(b),
            OwnedValue::Byte(b) => Value::Byte(b),
            OwnedValue::Char(c) => Value::Char(c),
            OwnedValue::Short(s) => Value::Short(s),
            OwnedValue::Int(i) => Value::Int(i),
            OwnedValue::Long(l) => Value::Long(l),
            OwnedValue::Float(f) => Value::Float(f),
            OwnedValue::Double(d) => Value::Double(d),
            OwnedValue::String(s) => Value::String(s),
            OwnedValue::Bytes(b) => Value::Bytes(b),
            OwnedValue::Strings(s) => Value::Strings(s),
            OwnedValue::Error(e) => Value::Error(e),
            OwnedValue::Durable(d) => Value::Durable(d),
            OwnedValue::Native(n) => Value::Native(n),
        }
    }
}

impl fmt::Debug for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => f.write_str("Void"),
            Value::Null => f.write_str("Null"),
            Value::Boolean(b) => write!(f, "Boolean({})", b),
            Value::Byte(b) => write!(f, "Byte({})", b),
            Value::Char(c) => write!(f, "Char({:#06x})", c),
            Value::Short(s) => write!(f, "Short({})", s),
            Value::Int(i) => write!(f, "Int({})", i),
            Value::Long(l) => write!(f, "Long({})", l),
            Value::Float(x) => write!(f, "Float({})", x),
            Value::Double(x) => write!(f, "Double({})", x),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Value::Strings(s) => write!(f, "Strings({:?})", s),
            Value::Object(h) => write!(f, "Object({:?})", h),
            Value::Class(h) => write!(f, "Class({:?})", h),
            Value::Error(e) => write!(f, "Error({})", e),
            Value::Durable(d) => write!(f, "Durable({:?})", d),
            Value::Native(_) => f.write_str("Native(..)"),
        }
    }
}

impl fmt::Debug for OwnedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Value::from(self.clone()), f)
    }
}

// ============================================================================
// Value Conversion Traits
// ============================================================================

/// Convert from [`Value`] to a Rust type.
///
/// Implemented for the types a dispatcher call can be typed as.
pub trait FromValue<'s>: Sized {
    /// Convert, returning [`Error::UnexpectedType`] if the shape doesn't match
    fn from_value(value: Value<'s>) -> Result<Self>;
}

/// Convert a Rust type into a [`Value`].
pub trait IntoValue<'s> {
    /// Convert to a value
    fn into_value(self) -> Value<'s>;
}

macro_rules! primitive_value {
    ($($ty:ty => $variant:ident, $name:literal;)*) => {
        $(
            impl<'s> FromValue<'s> for $ty {
                fn from_value(value: Value<'s>) -> Result<Self> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(other.mismatch($name)),
                    }
                }
            }

            impl<'s> IntoValue<'s> for $ty {
                fn into_value(self) -> Value<'s> {
                    Value::$variant(self)
                }
            }

            impl From<$ty> for OwnedValue {
                fn from(v: $ty) -> Self {
                    OwnedValue::$variant(v)
                }
            }
        )*
    };
}

primitive_value! {
    bool => Boolean, "boolean";
    i8 => Byte, "byte";
    u16 => Char, "char";
    i16 => Short, "short";
    i32 => Int, "int";
    i64 => Long, "long";
    f32 => Float, "float";
    f64 => Double, "double";
    String => String, "string";
    Vec<u8> => Bytes, "byte[]";
    Vec<String> => Strings, "String[]";
    StructuredError => Error, "structured error";
}

impl<'s> IntoValue<'s> for &str {
    fn into_value(self) -> Value<'s> {
        Value::String(self.to_string())
    }
}

impl From<&str> for OwnedValue {
    fn from(v: &str) -> Self {
        OwnedValue::String(v.to_string())
    }
}

impl<'s> FromValue<'s> for Handle<'s> {
    fn from_value(value: Value<'s>) -> Result<Self> {
        value.as_handle().ok_or_else(|| value.mismatch("object"))
    }
}

impl<'s> IntoValue<'s> for Handle<'s> {
    fn into_value(self) -> Value<'s> {
        Value::Object(self)
    }
}

impl<'s, T: FromValue<'s>> FromValue<'s> for Option<T> {
    fn from_value(value: Value<'s>) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<'s, T: IntoValue<'s>> IntoValue<'s> for Option<T> {
    fn into_value(self) -> Value<'s> {
        match self {
            Some(v) => v.into_value(),
            None => Value::Null,
        }
    }
}

// Unit type (for void methods)
impl<'s> FromValue<'s> for () {
    fn from_value(value: Value<'s>) -> Result<Self> {
        match value {
            Value::Void => Ok(()),
            other => Err(other.mismatch("void")),
        }
    }
}

impl<'s> FromValue<'s> for Value<'s> {
    fn from_value(value: Value<'s>) -> Result<Self> {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_roundtrips() {
        assert!(bool::from_value(true.into_value()).unwrap());
        assert_eq!(i8::from_value((-5i8).into_value()).unwrap(), -5);
        assert_eq!(u16::from_value(0x263Au16.into_value()).unwrap(), 0x263A);
        assert_eq!(i16::from_value(i16::MIN.into_value()).unwrap(), i16::MIN);
        assert_eq!(i32::from_value(42i32.into_value()).unwrap(), 42);
        assert_eq!(i64::from_value(i64::MAX.into_value()).unwrap(), i64::MAX);
        assert_eq!(f32::from_value(1.5f32.into_value()).unwrap(), 1.5);
        assert_eq!(f64::from_value(2.25f64.into_value()).unwrap(), 2.25);
        assert_eq!(String::from_value("hi".into_value()).unwrap(), "hi");
        assert_eq!(Vec::<u8>::from_value(vec![1u8, 2].into_value()).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_no_implicit_widening() {
        let err = i64::from_value(Value::Int(1)).unwrap_err();
        assert_eq!(
            err,
            Error::UnexpectedType {
                expected: "long".into(),
                found: "int".into()
            }
        );
    }

    #[test]
    fn test_option_and_unit() {
        assert_eq!(Option::<i32>::from_value(Value::Null).unwrap(), None);
        assert_eq!(Option::<i32>::from_value(Value::Int(3)).unwrap(), Some(3));
        assert!(<()>::from_value(Value::Void).is_ok());
        assert!(<()>::from_value(Value::Int(0)).is_err());
        assert!(None::<i32>.into_value().is_null());
    }

    #[test]
    fn test_owned_conversion() {
        let owned = OwnedValue::from("text");
        assert_eq!(owned.type_name(), "string");
        assert!(matches!(Value::from(owned), Value::String(s) if s == "text"));
        let native = OwnedValue::Native(Arc::new(5u32));
        assert_eq!(native.type_name(), "native value");
    }
}
