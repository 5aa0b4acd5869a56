//! Call dispatcher
//!
//! Every call runs the same five stages:
//!
//! ```text
//! RESOLVE_IDENTIFIER -> BUILD_ARGS -> INVOKE -> CHECK_EXCEPTION -> UNWRAP_RESULT
//! ```
//!
//! The argument count is checked against the declared signatures before
//! anything touches the VM. Locals allocated while building arguments are
//! owned by an `ArgVec` and deleted on every exit path.

use std::slice;

use kopi_sdk::{MethodId, RawHandle, ValueKind, VmValue};

use crate::convert::{to_native_value, to_vm_value};
use crate::error::{Error, Result, SymbolKind};
use crate::refs::Handle;
use crate::registry::{FieldRef, MethodRef};
use crate::scope::Scope;
use crate::signature::{Signature, OBJECT_CLASS};
use crate::value::{FromValue, Value};

const MAP_CLASS: &str = "java/util/Map";
const SET_CLASS: &str = "java/util/Set";

/// Converted call arguments. Scratch locals are deleted on drop.
struct ArgVec<'a> {
    scope: &'a Scope,
    values: Vec<VmValue>,
    scratch: Vec<RawHandle>,
}

impl<'a> ArgVec<'a> {
    fn build(scope: &'a Scope, signatures: &[Signature], args: &[Value<'_>]) -> Result<Self> {
        let mut built = Self {
            scope,
            values: Vec::with_capacity(args.len()),
            scratch: Vec::new(),
        };
        for (index, (signature, value)) in signatures.iter().zip(args).enumerate() {
            let Some(arg) = to_vm_value(scope, value, signature)? else {
                return Err(Error::Conversion {
                    index,
                    received: format!("{:?}", value),
                    expected: signature.clone(),
                });
            };
            if arg.scratch {
                if let Some(Some(raw)) = arg.value.as_object() {
                    built.scratch.push(raw);
                }
            }
            built.values.push(arg.value);
        }
        Ok(built)
    }
}

impl Drop for ArgVec<'_> {
    fn drop(&mut self) {
        let env = self.scope.env();
        for raw in self.scratch.drain(..) {
            env.delete_local_ref(raw);
        }
    }
}

fn check_arity(signatures: &[Signature], args: &[Value<'_>]) -> Result<()> {
    if signatures.len() != args.len() {
        return Err(Error::ArgumentCount {
            expected: signatures.len(),
            got: args.len(),
        });
    }
    Ok(())
}

fn value_kind(signature: &Signature) -> Result<ValueKind> {
    signature.kind().ok_or_else(|| Error::UnexpectedType {
        expected: "value signature".to_string(),
        found: signature.to_string(),
    })
}

enum Target {
    Instance(RawHandle),
    Static(RawHandle),
}

impl Scope {
    /// INVOKE, CHECK_EXCEPTION, and UNWRAP_RESULT for a resolved method
    fn dispatch<'s>(
        &'s self,
        target: Target,
        method: MethodId,
        arg_sigs: &[Signature],
        ret: &Signature,
        args: &[Value<'_>],
    ) -> Result<Value<'s>> {
        let kind = value_kind(ret)?;
        let built = ArgVec::build(self, arg_sigs, args)?;
        log::trace!("invoke {:?} with {} args", method, built.values.len());
        let env = self.env();
        let raw = match target {
            Target::Instance(obj) => env.call_method(obj, method, kind, &built.values),
            Target::Static(class) => env.call_static_method(class, method, kind, &built.values),
        };
        drop(built);
        self.check()?;
        log::trace!("unwrap {:?} as {}", raw, ret);
        to_native_value(self, raw, ret)
    }

    // ========================================================================
    // Instance methods
    // ========================================================================

    /// Call an instance method by name, resolved against the object's class
    pub fn call_method<'s>(
        &'s self,
        obj: Handle<'_>,
        name: &str,
        arg_sigs: &[Signature],
        ret: &Signature,
        args: &[Value<'_>],
    ) -> Result<Value<'s>> {
        check_arity(arg_sigs, args)?;
        value_kind(ret)?;
        let descriptor = Signature::function(arg_sigs.to_vec(), ret.clone()).to_string();
        log::trace!("resolve {}{}", name, descriptor);

        let env = self.env();
        let class = env.get_object_class(obj.raw());
        let method = env.get_method_id(class, name, &descriptor);
        env.delete_local_ref(class);
        let Some(method) = method else {
            if let Some(cause) = self.take_pending() {
                log::trace!("resolve {}{} failed: {}", name, descriptor, cause);
            }
            return Err(Error::lookup(SymbolKind::Method, name, descriptor));
        };
        self.dispatch(Target::Instance(obj.raw()), method, arg_sigs, ret, args)
    }

    /// Call a method declared to return an object.
    ///
    /// Declaring a void or primitive return is a contract violation and is
    /// fatal before the VM is touched.
    pub fn call_object_method<'s>(
        &'s self,
        obj: Handle<'_>,
        name: &str,
        arg_sigs: &[Signature],
        ret: &Signature,
        args: &[Value<'_>],
    ) -> Result<Value<'s>> {
        if !ret.is_object_like() {
            self.fatal(format!("call_object_method {} declared with non-object return {}", name, ret));
        }
        self.call_method(obj, name, arg_sigs, ret, args)
    }

    /// Call a void method
    pub fn call_void_method(
        &self,
        obj: Handle<'_>,
        name: &str,
        arg_sigs: &[Signature],
        args: &[Value<'_>],
    ) -> Result<()> {
        self.call_method(obj, name, arg_sigs, &Signature::Void, args)?;
        Ok(())
    }

    /// Call a boolean method
    pub fn call_boolean_method(
        &self,
        obj: Handle<'_>,
        name: &str,
        arg_sigs: &[Signature],
        args: &[Value<'_>],
    ) -> Result<bool> {
        self.call_method(obj, name, arg_sigs, &Signature::Boolean, args)?.get()
    }

    /// Call an instance method and extract a typed result
    pub fn call<'s, T: FromValue<'s>>(
        &'s self,
        obj: Handle<'_>,
        name: &str,
        arg_sigs: &[Signature],
        ret: &Signature,
        args: &[Value<'_>],
    ) -> Result<T> {
        self.call_method(obj, name, arg_sigs, ret, args)?.get()
    }

    // ========================================================================
    // Cached methods
    // ========================================================================

    /// Resolve (or fetch from cache) an instance method of `class`
    pub fn method_ref(&self, class: &str, name: &str, arg_sigs: &[Signature], ret: &Signature) -> Result<MethodRef> {
        self.registry().method(self, class, name, arg_sigs, ret, false)
    }

    /// Resolve (or fetch from cache) a static method of `class`
    pub fn static_method_ref(
        &self,
        class: &str,
        name: &str,
        arg_sigs: &[Signature],
        ret: &Signature,
    ) -> Result<MethodRef> {
        self.registry().method(self, class, name, arg_sigs, ret, true)
    }

    /// Call a cached method. Instance methods need a receiver that is an
    /// instance of the class the method was resolved against.
    pub fn invoke<'s>(&'s self, method: &MethodRef, obj: Option<Handle<'_>>, args: &[Value<'_>]) -> Result<Value<'s>> {
        check_arity(&method.args, args)?;
        let target = if method.is_static {
            Target::Static(method.owner.raw())
        } else {
            let Some(obj) = obj else {
                return Err(Error::UnexpectedType {
                    expected: format!("receiver for {}.{}", method.owner_name, method.name),
                    found: "null".to_string(),
                });
            };
            if !self.env().is_instance_of(obj.raw(), method.owner.raw()) {
                return Err(Error::WrongOwner {
                    owner: method.owner_name.replace('/', "."),
                    member: format!("{}{}", method.name, method.signature()),
                });
            }
            Target::Instance(obj.raw())
        };
        self.dispatch(target, method.id, &method.args, &method.ret, args)
    }

    /// Call a static method by class name
    pub fn call_static_method<'s>(
        &'s self,
        class: &str,
        name: &str,
        arg_sigs: &[Signature],
        ret: &Signature,
        args: &[Value<'_>],
    ) -> Result<Value<'s>> {
        check_arity(arg_sigs, args)?;
        value_kind(ret)?;
        let method = self.static_method_ref(class, name, arg_sigs, ret)?;
        self.invoke(&method, None, args)
    }

    /// Allocate an object with the constructor matching `arg_sigs`
    pub fn new_object<'s>(&'s self, class: &str, arg_sigs: &[Signature], args: &[Value<'_>]) -> Result<Handle<'s>> {
        check_arity(arg_sigs, args)?;
        let ctor = self.registry().method(self, class, "<init>", arg_sigs, &Signature::Void, false)?;
        let built = ArgVec::build(self, arg_sigs, args)?;
        log::trace!("construct {} with {} args", ctor.owner_name, built.values.len());
        let obj = self.env().new_object(ctor.owner.raw(), ctor.id, &built.values);
        drop(built);
        self.check()?;
        match obj {
            Some(raw) => Ok(self.wrap(raw)),
            None => Err(Error::UnexpectedType {
                expected: format!("new {}", ctor.owner_name.replace('/', ".")),
                found: "null".to_string(),
            }),
        }
    }

    // ========================================================================
    // Fields
    // ========================================================================

    /// Read an instance field, resolved against the object's class
    pub fn get_field<'s>(&'s self, obj: Handle<'_>, name: &str, signature: &Signature) -> Result<Value<'s>> {
        let kind = value_kind(signature)?;
        let field = self.dynamic_field(obj, name, signature)?;
        let raw = self.env().get_field(obj.raw(), field, kind);
        self.check()?;
        to_native_value(self, raw, signature)
    }

    /// Write an instance field, resolved against the object's class
    pub fn set_field(&self, obj: Handle<'_>, name: &str, signature: &Signature, value: &Value<'_>) -> Result<()> {
        value_kind(signature)?;
        let field = self.dynamic_field(obj, name, signature)?;
        let built = ArgVec::build(self, slice::from_ref(signature), slice::from_ref(value))?;
        self.env().set_field(obj.raw(), field, built.values[0]);
        drop(built);
        self.check()
    }

    fn dynamic_field(&self, obj: Handle<'_>, name: &str, signature: &Signature) -> Result<kopi_sdk::FieldId> {
        let env = self.env();
        let descriptor = signature.to_string();
        let class = env.get_object_class(obj.raw());
        let field = env.get_field_id(class, name, &descriptor);
        env.delete_local_ref(class);
        field.ok_or_else(|| {
            if let Some(cause) = self.take_pending() {
                log::trace!("resolve field {} failed: {}", name, cause);
            }
            Error::lookup(SymbolKind::Field, name, descriptor)
        })
    }

    /// Resolve (or fetch from cache) a field of `class`
    pub fn field_ref(&self, class: &str, name: &str, signature: &Signature, is_static: bool) -> Result<FieldRef> {
        self.registry().field(self, class, name, signature, is_static)
    }

    /// Read a cached field. Instance fields need a receiver of the owner
    /// class.
    pub fn read_field<'s>(&'s self, field: &FieldRef, obj: Option<Handle<'_>>) -> Result<Value<'s>> {
        let kind = value_kind(&field.signature)?;
        let env = self.env();
        let raw = if field.is_static {
            env.get_static_field(field.owner.raw(), field.id, kind)
        } else {
            let obj = self.field_receiver(field, obj)?;
            env.get_field(obj, field.id, kind)
        };
        self.check()?;
        to_native_value(self, raw, &field.signature)
    }

    /// Write a cached field
    pub fn write_field(&self, field: &FieldRef, obj: Option<Handle<'_>>, value: &Value<'_>) -> Result<()> {
        let built = ArgVec::build(self, slice::from_ref(&field.signature), slice::from_ref(value))?;
        let env = self.env();
        if field.is_static {
            env.set_static_field(field.owner.raw(), field.id, built.values[0]);
        } else {
            let obj = self.field_receiver(field, obj)?;
            env.set_field(obj, field.id, built.values[0]);
        }
        drop(built);
        self.check()
    }

    fn field_receiver(&self, field: &FieldRef, obj: Option<Handle<'_>>) -> Result<RawHandle> {
        let Some(obj) = obj else {
            return Err(Error::UnexpectedType {
                expected: format!("receiver for {}.{}", field.owner_name, field.name),
                found: "null".to_string(),
            });
        };
        if !self.env().is_instance_of(obj.raw(), field.owner.raw()) {
            return Err(Error::WrongOwner {
                owner: field.owner_name.replace('/', "."),
                member: format!("{}:{}", field.name, field.signature),
            });
        }
        Ok(obj.raw())
    }

    /// Read a static field
    pub fn get_static_field<'s>(&'s self, class: &str, name: &str, signature: &Signature) -> Result<Value<'s>> {
        let field = self.field_ref(class, name, signature, true)?;
        self.read_field(&field, None)
    }

    /// Write a static field
    pub fn set_static_field(&self, class: &str, name: &str, signature: &Signature, value: &Value<'_>) -> Result<()> {
        let field = self.field_ref(class, name, signature, true)?;
        self.write_field(&field, None, value)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Whether `obj` is an instance of the named class
    pub fn instance_of(&self, obj: Handle<'_>, class: &str) -> Result<bool> {
        let class = self.registry().class(self, class)?;
        Ok(self.env().is_instance_of(obj.raw(), class.raw()))
    }

    /// Read every entry of a `java.util.Map`.
    ///
    /// Walks `keySet().toArray()` and fetches each value with `get`.
    /// Primitive signatures unbox the wrapper objects.
    pub fn map_entries<'s>(
        &'s self,
        map: Handle<'_>,
        key_sig: &Signature,
        value_sig: &Signature,
    ) -> Result<Vec<(Value<'s>, Value<'s>)>> {
        let env = self.env();
        let well_known = &self.registry().well_known;
        if !env.is_instance_of(map.raw(), well_known.map.raw()) {
            return Err(Error::UnexpectedType {
                expected: "java.util.Map".to_string(),
                found: "object".to_string(),
            });
        }

        let object = Signature::object();
        let key_set = self.method_ref(MAP_CLASS, "keySet", &[], &Signature::class(SET_CLASS))?;
        let to_array = self.method_ref(SET_CLASS, "toArray", &[], &Signature::array(object.clone()))?;
        let get = self.method_ref(MAP_CLASS, "get", slice::from_ref(&object), &object)?;

        let keys: Handle<'s> = self.invoke(&key_set, Some(map), &[])?.get()?;
        let array: Handle<'s> = self.invoke(&to_array, Some(keys), &[])?.get()?;
        self.delete_local(keys);

        let len = env.array_length(array.raw());
        log::trace!("map_entries over {} keys", len);
        let mut entries = Vec::with_capacity(len);
        for index in 0..len {
            let entry = self.map_entry(map, array, index, &get, key_sig, value_sig);
            match entry {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    self.delete_local(array);
                    return Err(e);
                }
            }
        }
        self.delete_local(array);
        Ok(entries)
    }

    /// Decode one entry. Key and value locals are released unless returned.
    fn map_entry<'s>(
        &'s self,
        map: Handle<'_>,
        keys: Handle<'_>,
        index: usize,
        get: &MethodRef,
        key_sig: &Signature,
        value_sig: &Signature,
    ) -> Result<(Value<'s>, Value<'s>)> {
        let key = self.env().object_array_element(keys.raw(), index);
        self.check()?;
        let key_value = key.map_or(Value::Null, |raw| Value::Object(self.wrap(raw)));
        let value = self
            .invoke(get, Some(map), slice::from_ref(&key_value))
            .and_then(|value| self.element_value(value, value_sig));
        let value = match value {
            Ok(value) => value,
            Err(e) => {
                if let Some(handle) = key_value.as_handle() {
                    self.delete_local(handle);
                }
                return Err(e);
            }
        };
        match self.element_value(key_value, key_sig) {
            Ok(key) => Ok((key, value)),
            Err(e) => {
                if let Some(handle) = value.as_handle() {
                    self.delete_local(handle);
                }
                Err(e)
            }
        }
    }

    /// Convert an `Object`-typed value to the declared signature
    fn element_value<'s>(&'s self, value: Value<'s>, signature: &Signature) -> Result<Value<'s>> {
        let Some(handle) = value.as_handle() else {
            return Ok(value);
        };
        if signature.is_primitive() {
            let unboxed = self.unbox_value(handle, signature);
            self.delete_local(handle);
            return unboxed;
        }
        if *signature == Signature::class(OBJECT_CLASS) {
            return Ok(value);
        }
        to_native_value(self, VmValue::Object(Some(handle.raw())), signature)
    }
}
