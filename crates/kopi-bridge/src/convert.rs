//! Value converter
//!
//! Moves values across the boundary in both directions, driven by the
//! declared [`Signature`]. Primitives keep their exact width; strings, byte
//! arrays, string arrays, and structured errors are copied; every other
//! object passes through as a handle.

use kopi_sdk::{RawHandle, ValueKind, VmValue, VM_TRUE};

use crate::codec::StructuredError;
use crate::error::{Error, Result};
use crate::refs::Handle;
use crate::scope::Scope;
use crate::signature::Signature;
use crate::value::Value;

const CLASS_CLASS: &str = "java/lang/Class";

/// A converted argument
#[derive(Debug, Clone, Copy)]
pub(crate) struct VmArg {
    pub(crate) value: VmValue,
    /// The argument is a local this conversion allocated
    pub(crate) scratch: bool,
}

impl VmArg {
    fn plain(value: VmValue) -> Self {
        Self { value, scratch: false }
    }

    fn scratch(handle: Handle<'_>) -> Self {
        Self {
            value: VmValue::Object(Some(handle.raw())),
            scratch: true,
        }
    }
}

/// Convert a native value to a VM value of the declared signature.
///
/// `Ok(None)` means the value does not fit the signature. `Err` means the VM
/// failed while allocating.
pub(crate) fn to_vm_value(scope: &Scope, value: &Value<'_>, signature: &Signature) -> Result<Option<VmArg>> {
    let plain = |value: VmValue| -> Result<Option<VmArg>> { Ok(Some(VmArg::plain(value))) };
    match (signature, value) {
        (Signature::Boolean, Value::Boolean(b)) => plain(VmValue::from_bool(*b)),
        (Signature::Byte, Value::Byte(v)) => plain(VmValue::Byte(*v)),
        (Signature::Char, Value::Char(v)) => plain(VmValue::Char(*v)),
        (Signature::Short, Value::Short(v)) => plain(VmValue::Short(*v)),
        (Signature::Int, Value::Int(v)) => plain(VmValue::Int(*v)),
        (Signature::Long, Value::Long(v)) => plain(VmValue::Long(*v)),
        (Signature::Float, Value::Float(v)) => plain(VmValue::Float(*v)),
        (Signature::Double, Value::Double(v)) => plain(VmValue::Double(*v)),

        (sig, Value::String(s)) if sig.is_string() => Ok(Some(VmArg::scratch(scope.new_string(s)?))),
        (Signature::Array(element), Value::Bytes(bytes)) if **element == Signature::Byte => {
            Ok(Some(VmArg::scratch(scope.new_bytes(bytes)?)))
        }
        (Signature::Array(element), Value::Strings(strings)) if element.is_string() => {
            Ok(Some(VmArg::scratch(scope.new_strings(strings)?)))
        }
        (Signature::Error, Value::Error(error)) => Ok(Some(VmArg::scratch(scope.new_error(error)?))),

        (sig, Value::Null) if sig.is_object_like() => plain(VmValue::NULL),
        (sig, Value::Object(h) | Value::Class(h)) if sig.is_object_like() => plain(VmValue::Object(Some(h.raw()))),
        (sig, Value::Durable(d)) if sig.is_object_like() => plain(VmValue::Object(Some(d.raw()))),

        _ => Ok(None),
    }
}

/// Convert a raw VM value back to a native value of the declared signature.
///
/// `raw` is a fresh local owned by the caller: when it is decoded into a
/// native copy (string, arrays, structured error) the local is deleted.
pub(crate) fn to_native_value<'s>(scope: &'s Scope, raw: VmValue, signature: &Signature) -> Result<Value<'s>> {
    native_value(scope, raw, signature, true)
}

/// Like [`to_native_value`], for values the VM still owns (arguments passed
/// into a native callback). Nothing is deleted.
pub(crate) fn borrow_native_value<'s>(scope: &'s Scope, raw: VmValue, signature: &Signature) -> Result<Value<'s>> {
    native_value(scope, raw, signature, false)
}

fn native_value<'s>(scope: &'s Scope, raw: VmValue, signature: &Signature, owned: bool) -> Result<Value<'s>> {
    Ok(match (signature, raw) {
        (Signature::Void, _) => Value::Void,
        (Signature::Boolean, VmValue::Boolean(b)) => Value::Boolean(b == VM_TRUE),
        (Signature::Byte, VmValue::Byte(v)) => Value::Byte(v),
        (Signature::Char, VmValue::Char(v)) => Value::Char(v),
        (Signature::Short, VmValue::Short(v)) => Value::Short(v),
        (Signature::Int, VmValue::Int(v)) => Value::Int(v),
        (Signature::Long, VmValue::Long(v)) => Value::Long(v),
        (Signature::Float, VmValue::Float(v)) => Value::Float(v),
        (Signature::Double, VmValue::Double(v)) => Value::Double(v),
        (sig, VmValue::Object(None)) if sig.is_object_like() => Value::Null,
        (sig, VmValue::Object(Some(obj))) if sig.is_object_like() => object_to_native(scope, obj, sig, owned)?,
        (sig, other) => {
            return Err(Error::UnexpectedType {
                expected: sig.to_string(),
                found: format!("{:?}", other.kind()),
            })
        }
    })
}

fn object_to_native<'s>(scope: &'s Scope, obj: RawHandle, signature: &Signature, owned: bool) -> Result<Value<'s>> {
    let handle = scope.wrap(obj);
    let decoded = match signature {
        sig if sig.is_string() => scope.string_value(handle).map(Value::String),
        Signature::Array(element) if **element == Signature::Byte => scope.bytes_value(handle).map(Value::Bytes),
        Signature::Array(element) if element.is_string() => scope.strings_value(handle).map(Value::Strings),
        Signature::Error => scope.error_value(handle).map(Value::Error),
        Signature::Class(name) if name == CLASS_CLASS => return Ok(Value::Class(handle)),
        _ => return Ok(Value::Object(handle)),
    };
    if owned {
        scope.delete_local(handle);
    }
    decoded
}

// ============================================================================
// Allocation and decoding helpers
// ============================================================================

impl Scope {
    /// Allocate a VM string
    pub fn new_string(&self, s: &str) -> Result<Handle<'_>> {
        match self.env().new_string(s) {
            Some(raw) => Ok(self.wrap(raw)),
            None => Err(self.pending_or(|| allocation_failed("java.lang.String"))),
        }
    }

    /// Allocate a VM `byte[]`
    pub fn new_bytes(&self, bytes: &[u8]) -> Result<Handle<'_>> {
        match self.env().new_byte_array(bytes) {
            Some(raw) => Ok(self.wrap(raw)),
            None => Err(self.pending_or(|| allocation_failed("byte[]"))),
        }
    }

    /// Allocate a VM `String[]`
    pub fn new_strings(&self, strings: &[String]) -> Result<Handle<'_>> {
        let env = self.env();
        let element = self.registry().well_known.string.raw();
        let Some(array) = env.new_object_array(strings.len(), element) else {
            return Err(self.pending_or(|| allocation_failed("String[]")));
        };
        for (index, s) in strings.iter().enumerate() {
            let item = match self.new_string(s) {
                Ok(item) => item,
                Err(e) => {
                    env.delete_local_ref(array);
                    return Err(e);
                }
            };
            env.set_object_array_element(array, index, Some(item.raw()));
            self.delete_local(item);
            if let Err(e) = self.check() {
                env.delete_local_ref(array);
                return Err(e);
            }
        }
        Ok(self.wrap(array))
    }

    /// Allocate a structured-error VM object
    pub fn new_error(&self, error: &StructuredError) -> Result<Handle<'_>> {
        let bytes = self.shared().codec.encode(error).map_err(Error::Codec)?;
        let payload = self.new_bytes(&bytes)?;
        let well_known = &self.registry().well_known;
        let value = self.env().call_static_method(
            well_known.error.raw(),
            well_known.from_bytes,
            ValueKind::Object,
            &[VmValue::Object(Some(payload.raw()))],
        );
        self.delete_local(payload);
        self.check()?;
        match value.as_object().flatten() {
            Some(raw) => Ok(self.wrap(raw)),
            None => Err(allocation_failed("dev.kopi.BridgeException")),
        }
    }

    /// Decode a VM string
    pub fn string_value(&self, handle: Handle<'_>) -> Result<String> {
        self.env().string_utf(handle.raw()).ok_or_else(|| Error::UnexpectedType {
            expected: "java.lang.String".to_string(),
            found: self.describe_class(handle),
        })
    }

    /// Copy out a VM `byte[]`
    pub fn bytes_value(&self, handle: Handle<'_>) -> Result<Vec<u8>> {
        self.env().byte_array_elements(handle.raw()).ok_or_else(|| Error::UnexpectedType {
            expected: "byte[]".to_string(),
            found: self.describe_class(handle),
        })
    }

    /// Decode a VM `String[]`. A null element is a conversion error.
    pub fn strings_value(&self, handle: Handle<'_>) -> Result<Vec<String>> {
        let env = self.env();
        let len = env.array_length(handle.raw());
        let mut strings = Vec::with_capacity(len);
        for index in 0..len {
            let element = env.object_array_element(handle.raw(), index);
            self.check()?;
            let Some(element) = element else {
                return Err(Error::Conversion {
                    index,
                    received: "null".to_string(),
                    expected: Signature::string(),
                });
            };
            let element = self.wrap(element);
            let decoded = self.string_value(element);
            self.delete_local(element);
            strings.push(decoded?);
        }
        Ok(strings)
    }

    /// Decode a structured-error VM object
    pub fn error_value(&self, handle: Handle<'_>) -> Result<StructuredError> {
        let env = self.env();
        let well_known = &self.registry().well_known;
        if !env.is_instance_of(handle.raw(), well_known.error.raw()) {
            return Err(Error::UnexpectedType {
                expected: Signature::Error.to_string(),
                found: self.describe_class(handle),
            });
        }
        let payload = env.call_method(handle.raw(), well_known.to_bytes, ValueKind::Object, &[]);
        self.check()?;
        let Some(payload) = payload.as_object().flatten() else {
            return Err(Error::Codec("structured error without payload".to_string()));
        };
        let payload = self.wrap(payload);
        let bytes = self.bytes_value(payload);
        self.delete_local(payload);
        self.shared().codec.decode(&bytes?).map_err(Error::Codec)
    }

    /// Dotted class name of an object, for diagnostics
    fn describe_class(&self, handle: Handle<'_>) -> String {
        let env = self.env();
        let class = env.get_object_class(handle.raw());
        let name = crate::exception::raw_call(
            env,
            class,
            self.registry().well_known.get_name,
            ValueKind::Object,
            &[],
        )
        .and_then(|value| value.as_object().flatten());
        env.delete_local_ref(class);
        match name {
            Some(name) => {
                let text = env.string_utf(name);
                env.delete_local_ref(name);
                text.unwrap_or_else(|| "object".to_string())
            }
            None => "object".to_string(),
        }
    }
}

fn allocation_failed(what: &str) -> Error {
    Error::UnexpectedType {
        expected: format!("new {}", what),
        found: "allocation failure".to_string(),
    }
}

// ============================================================================
// Boxing
// ============================================================================

impl Scope {
    /// Convert any native value to a VM object reference. Primitives are
    /// boxed with their wrapper class's `valueOf`; `Void` and `Null` become
    /// null.
    pub fn box_value<'s>(&'s self, value: &Value<'_>) -> Result<Option<Handle<'s>>> {
        let primitive = match value {
            Value::Void | Value::Null => return Ok(None),
            Value::Boolean(b) => (ValueKind::Boolean, VmValue::from_bool(*b)),
            Value::Byte(v) => (ValueKind::Byte, VmValue::Byte(*v)),
            Value::Char(v) => (ValueKind::Char, VmValue::Char(*v)),
            Value::Short(v) => (ValueKind::Short, VmValue::Short(*v)),
            Value::Int(v) => (ValueKind::Int, VmValue::Int(*v)),
            Value::Long(v) => (ValueKind::Long, VmValue::Long(*v)),
            Value::Float(v) => (ValueKind::Float, VmValue::Float(*v)),
            Value::Double(v) => (ValueKind::Double, VmValue::Double(*v)),
            Value::String(s) => return self.new_string(s).map(Some),
            Value::Bytes(b) => return self.new_bytes(b).map(Some),
            Value::Strings(s) => return self.new_strings(s).map(Some),
            Value::Error(e) => return self.new_error(e).map(Some),
            Value::Object(h) | Value::Class(h) => return Ok(Some(self.wrap(h.raw()))),
            Value::Durable(d) => return self.duplicate(self.wrap(d.raw())).map(Some),
            Value::Native(_) => {
                return Err(Error::Conversion {
                    index: 0,
                    received: format!("{:?}", value),
                    expected: Signature::object(),
                })
            }
        };

        let (kind, raw) = primitive;
        let boxes = self.registry().boxes(self)?;
        let Some(entry) = boxes.get(&kind) else {
            return Err(Error::lookup(crate::error::SymbolKind::Class, format!("box of {:?}", kind), "-"));
        };
        let boxed = self
            .env()
            .call_static_method(entry.class.raw(), entry.value_of, ValueKind::Object, &[raw]);
        self.check()?;
        Ok(boxed.as_object().flatten().map(|raw| self.wrap(raw)))
    }

    /// Unwrap a boxed primitive into the declared primitive signature
    pub fn unbox_value<'s>(&'s self, handle: Handle<'_>, signature: &Signature) -> Result<Value<'s>> {
        let kind = signature.kind().filter(|kind| kind.is_primitive()).ok_or_else(|| {
            Error::UnexpectedType {
                expected: "primitive signature".to_string(),
                found: signature.to_string(),
            }
        })?;
        let boxes = self.registry().boxes(self)?;
        let Some(entry) = boxes.get(&kind) else {
            return Err(Error::lookup(crate::error::SymbolKind::Class, format!("box of {:?}", kind), "-"));
        };
        let env = self.env();
        if !env.is_instance_of(handle.raw(), entry.class.raw()) {
            return Err(Error::UnexpectedType {
                expected: format!("boxed {}", signature),
                found: self.describe_class(handle),
            });
        }
        let raw = env.call_method(handle.raw(), entry.unbox, kind, &[]);
        self.check()?;
        to_native_value(self, raw, signature)
    }
}
