//! Class and member registry
//!
//! Resolved once by [`Registry::bootstrap`] before any other bridge
//! operation: the well-known classes and the identifiers the exception
//! bridge needs. Everything else is resolved on first use and cached. A
//! cached member stays bound to the class it was resolved against.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use kopi_sdk::{FieldId, MethodId, RawHandle, ValueKind, VmEnv, VmRuntime};
use once_cell::sync::OnceCell;

use crate::error::{Error, Result, SymbolKind};
use crate::refs::Durable;
use crate::scope::Scope;
use crate::signature::{Signature, ERROR_CLASS, OBJECT_CLASS, STRING_CLASS};

const THROWABLE_CLASS: &str = "java/lang/Throwable";
const RUNTIME_EXCEPTION_CLASS: &str = "java/lang/RuntimeException";
const CLASS_CLASS: &str = "java/lang/Class";
const MAP_CLASS: &str = "java/util/Map";
const SET_CLASS: &str = "java/util/Set";

/// Box class, primitive signature, and unboxing method of each primitive
const BOXES: [(&str, Signature, &str); 8] = [
    ("java/lang/Boolean", Signature::Boolean, "booleanValue"),
    ("java/lang/Byte", Signature::Byte, "byteValue"),
    ("java/lang/Character", Signature::Char, "charValue"),
    ("java/lang/Short", Signature::Short, "shortValue"),
    ("java/lang/Integer", Signature::Int, "intValue"),
    ("java/lang/Long", Signature::Long, "longValue"),
    ("java/lang/Float", Signature::Float, "floatValue"),
    ("java/lang/Double", Signature::Double, "doubleValue"),
];

/// A resolved method, bound to the class it was resolved against
#[derive(Debug, Clone)]
pub struct MethodRef {
    pub(crate) owner: Arc<Durable>,
    pub(crate) owner_name: String,
    pub(crate) id: MethodId,
    pub(crate) name: String,
    pub(crate) args: Vec<Signature>,
    pub(crate) ret: Signature,
    pub(crate) is_static: bool,
}

impl MethodRef {
    /// Internal name of the owner class
    pub fn owner(&self) -> &str {
        &self.owner_name
    }

    /// Method name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full method signature
    pub fn signature(&self) -> Signature {
        Signature::function(self.args.clone(), self.ret.clone())
    }
}

/// A resolved field, bound to the class it was resolved against
#[derive(Debug, Clone)]
pub struct FieldRef {
    pub(crate) owner: Arc<Durable>,
    pub(crate) owner_name: String,
    pub(crate) id: FieldId,
    pub(crate) name: String,
    pub(crate) signature: Signature,
    pub(crate) is_static: bool,
}

impl FieldRef {
    /// Internal name of the owner class
    pub fn owner(&self) -> &str {
        &self.owner_name
    }

    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Classes and identifiers resolved at bootstrap
pub(crate) struct WellKnown {
    pub(crate) string: Arc<Durable>,
    pub(crate) throwable: Arc<Durable>,
    pub(crate) runtime_exception: Arc<Durable>,
    pub(crate) map: Arc<Durable>,
    pub(crate) error: Arc<Durable>,
    pub(crate) get_message: MethodId,
    pub(crate) get_name: MethodId,
    pub(crate) to_bytes: MethodId,
    pub(crate) from_bytes: MethodId,
}

/// Box class and its `valueOf` / `xValue` identifiers
pub(crate) struct BoxEntry {
    pub(crate) class: Arc<Durable>,
    pub(crate) value_of: MethodId,
    pub(crate) unbox: MethodId,
}

type MemberKey = (String, String, String, bool);

/// Resolved classes and members
pub struct Registry {
    runtime: Arc<dyn VmRuntime>,
    pub(crate) well_known: WellKnown,
    classes: DashMap<String, Arc<Durable>>,
    methods: DashMap<MemberKey, MethodRef>,
    fields: DashMap<MemberKey, FieldRef>,
    boxes: OnceCell<HashMap<ValueKind, BoxEntry>>,
}

/// Resolve a class to a durable handle using the raw environment
fn resolve_class(env: &dyn VmEnv, runtime: &Arc<dyn VmRuntime>, name: &str) -> Result<Durable> {
    let local = match env.find_class(name) {
        Some(local) => local,
        None => {
            env.exception_clear();
            return Err(Error::lookup(SymbolKind::Class, name.replace('/', "."), "-"));
        }
    };
    let global = env.new_global_ref(local);
    env.delete_local_ref(local);
    match global {
        Some(global) => Ok(Durable::new(global, Arc::clone(runtime))),
        None => {
            env.exception_clear();
            Err(Error::lookup(SymbolKind::Class, name.replace('/', "."), "-"))
        }
    }
}

fn resolve_method(
    env: &dyn VmEnv,
    class: RawHandle,
    name: &str,
    signature: &str,
    is_static: bool,
) -> Result<MethodId> {
    let id = if is_static {
        env.get_static_method_id(class, name, signature)
    } else {
        env.get_method_id(class, name, signature)
    };
    id.ok_or_else(|| {
        env.exception_clear();
        let kind = if is_static { SymbolKind::StaticMethod } else { SymbolKind::Method };
        Error::lookup(kind, name, signature)
    })
}

impl Registry {
    /// Resolve the well-known classes and identifiers. Must run on an
    /// attached thread inside a local frame.
    pub fn bootstrap(env: &dyn VmEnv, runtime: &Arc<dyn VmRuntime>) -> Result<Self> {
        let class = |name| resolve_class(env, runtime, name).map(Arc::new);
        let object = class(OBJECT_CLASS)?;
        let string = class(STRING_CLASS)?;
        let throwable = class(THROWABLE_CLASS)?;
        let runtime_exception = class(RUNTIME_EXCEPTION_CLASS)?;
        let class_class = class(CLASS_CLASS)?;
        let map = class(MAP_CLASS)?;
        let set = class(SET_CLASS)?;
        let error = class(ERROR_CLASS)?;

        let get_message = resolve_method(env, throwable.raw(), "getMessage", "()Ljava/lang/String;", false)?;
        let get_name = resolve_method(env, class_class.raw(), "getName", "()Ljava/lang/String;", false)?;
        let to_bytes = resolve_method(env, error.raw(), "toBytes", "()[B", false)?;
        let from_bytes_sig = Signature::function([Signature::bytes()], Signature::Error).to_string();
        let from_bytes = resolve_method(env, error.raw(), "fromBytes", &from_bytes_sig, true)?;

        let classes = DashMap::new();
        for (name, durable) in [
            (OBJECT_CLASS, &object),
            (STRING_CLASS, &string),
            (THROWABLE_CLASS, &throwable),
            (RUNTIME_EXCEPTION_CLASS, &runtime_exception),
            (CLASS_CLASS, &class_class),
            (MAP_CLASS, &map),
            (SET_CLASS, &set),
            (ERROR_CLASS, &error),
        ] {
            classes.insert(name.to_string(), Arc::clone(durable));
        }
        log::debug!("registry bootstrapped with {} classes", classes.len());

        Ok(Self {
            runtime: Arc::clone(runtime),
            well_known: WellKnown {
                string,
                throwable,
                runtime_exception,
                map,
                error,
                get_message,
                get_name,
                to_bytes,
                from_bytes,
            },
            classes,
            methods: DashMap::new(),
            fields: DashMap::new(),
            boxes: OnceCell::new(),
        })
    }

    /// Number of cached classes
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Number of cached method identifiers
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Resolve a class by dotted or slashed name
    pub(crate) fn class(&self, scope: &Scope, name: &str) -> Result<Arc<Durable>> {
        let name = name.replace('.', "/");
        if let Some(found) = self.classes.get(&name) {
            return Ok(Arc::clone(found.value()));
        }
        let env = scope.env();
        let Some(local) = env.find_class(&name) else {
            if let Some(cause) = scope.take_pending() {
                log::trace!("class lookup {} failed: {}", name, cause);
            }
            return Err(Error::lookup(SymbolKind::Class, name.replace('/', "."), "-"));
        };
        let durable = scope.promote(scope.wrap(local));
        env.delete_local_ref(local);
        let durable = Arc::new(durable?);
        // A racing resolver may have won; ours is released when dropped
        let entry = self.classes.entry(name).or_insert_with(|| durable);
        Ok(Arc::clone(entry.value()))
    }

    /// Resolve and cache a method
    pub(crate) fn method(
        &self,
        scope: &Scope,
        class: &str,
        name: &str,
        args: &[Signature],
        ret: &Signature,
        is_static: bool,
    ) -> Result<MethodRef> {
        let owner = self.class(scope, class)?;
        let owner_name = class.replace('.', "/");
        let signature = Signature::function(args.to_vec(), ret.clone()).to_string();
        let key = (owner_name.clone(), name.to_string(), signature.clone(), is_static);
        if let Some(found) = self.methods.get(&key) {
            return Ok(found.value().clone());
        }

        let env = scope.env();
        let id = if is_static {
            env.get_static_method_id(owner.raw(), name, &signature)
        } else {
            env.get_method_id(owner.raw(), name, &signature)
        };
        let Some(id) = id else {
            if let Some(cause) = scope.take_pending() {
                log::trace!("method lookup {}.{}{} failed: {}", owner_name, name, signature, cause);
            }
            let kind = if is_static { SymbolKind::StaticMethod } else { SymbolKind::Method };
            return Err(Error::lookup(kind, name, signature));
        };
        let method = MethodRef {
            owner,
            owner_name,
            id,
            name: name.to_string(),
            args: args.to_vec(),
            ret: ret.clone(),
            is_static,
        };
        Ok(self.methods.entry(key).or_insert(method).value().clone())
    }

    /// Resolve and cache a field
    pub(crate) fn field(
        &self,
        scope: &Scope,
        class: &str,
        name: &str,
        signature: &Signature,
        is_static: bool,
    ) -> Result<FieldRef> {
        let owner = self.class(scope, class)?;
        let owner_name = class.replace('.', "/");
        let descriptor = signature.to_string();
        let key = (owner_name.clone(), name.to_string(), descriptor.clone(), is_static);
        if let Some(found) = self.fields.get(&key) {
            return Ok(found.value().clone());
        }

        let env = scope.env();
        let id = if is_static {
            env.get_static_field_id(owner.raw(), name, &descriptor)
        } else {
            env.get_field_id(owner.raw(), name, &descriptor)
        };
        let Some(id) = id else {
            if let Some(cause) = scope.take_pending() {
                log::trace!("field lookup {}.{} failed: {}", owner_name, name, cause);
            }
            let kind = if is_static { SymbolKind::StaticField } else { SymbolKind::Field };
            return Err(Error::lookup(kind, name, descriptor));
        };
        let field = FieldRef {
            owner,
            owner_name,
            id,
            name: name.to_string(),
            signature: signature.clone(),
            is_static,
        };
        Ok(self.fields.entry(key).or_insert(field).value().clone())
    }

    /// Boxing table, resolved on first use
    pub(crate) fn boxes(&self, scope: &Scope) -> Result<&HashMap<ValueKind, BoxEntry>> {
        self.boxes.get_or_try_init(|| {
            let env = scope.env();
            let mut table = HashMap::new();
            for (name, primitive, getter) in BOXES {
                let class = Arc::new(resolve_class(env, &self.runtime, name)?);
                let value_of_sig = Signature::function([primitive.clone()], Signature::class(name));
                let value_of = resolve_method(env, class.raw(), "valueOf", &value_of_sig.to_string(), true)?;
                let unbox_sig = Signature::function([], primitive.clone());
                let unbox = resolve_method(env, class.raw(), getter, &unbox_sig.to_string(), false)?;
                if let Some(kind) = primitive.kind() {
                    table.insert(kind, BoxEntry { class, value_of, unbox });
                }
            }
            log::debug!("boxing table resolved");
            Ok(table)
        })
    }
}
