//! Class definitions and member tables
//!
//! Classes are defined with [`ClassBuilder`]. Methods are Rust closures that
//! receive the calling thread's [`SandboxEnv`] and operate on the VM only
//! through handles, exactly like native code would.

use std::collections::HashMap;
use std::sync::Arc;

use kopi_sdk::{RawHandle, ValueKind, VmValue};

use crate::env::SandboxEnv;
use crate::heap::{Body, ClassIdx, Heap, HeapValue, ObjId};

/// Name of the root class
pub const OBJECT_CLASS: &str = "java/lang/Object";

/// Name of the class-mirror class
pub const CLASS_CLASS: &str = "java/lang/Class";

/// Arguments of a method invocation
pub struct Invocation<'a> {
    /// Receiver (`None` for static methods)
    pub this: Option<RawHandle>,
    /// Arguments, already checked against the method descriptor
    pub args: &'a [VmValue],
}

impl Invocation<'_> {
    /// Receiver of an instance method
    ///
    /// # Panics
    /// Panics when called from a static method body.
    pub fn receiver(&self) -> RawHandle {
        self.this
            .unwrap_or_else(|| panic!("instance method invoked without a receiver"))
    }

    /// Object argument at `index` (`None` for null)
    pub fn object(&self, index: usize) -> Option<RawHandle> {
        self.args.get(index).and_then(|v| v.as_object()).flatten()
    }
}

/// Method body
pub type MethodFn = Arc<dyn Fn(&SandboxEnv, Invocation<'_>) -> VmValue + Send + Sync>;

/// Custom allocator for classes whose instances are not plain field sets
pub(crate) type Allocator = fn() -> Body;

/// Class definition errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefineError {
    /// A class with this name already exists
    #[error("Class {0} is already defined")]
    Duplicate(String),

    /// Superclass or interface not defined yet
    #[error("Class {class} refers to undefined class {missing}")]
    MissingDependency {
        /// Class being defined
        class: String,
        /// The undefined dependency
        missing: String,
    },

    /// A member descriptor could not be parsed
    #[error("Invalid descriptor {descriptor} for {class}.{member}")]
    BadDescriptor {
        /// Class being defined
        class: String,
        /// Member name
        member: String,
        /// The descriptor
        descriptor: String,
    },
}

struct MethodSpec {
    name: String,
    signature: String,
    is_static: bool,
    body: MethodFn,
}

/// Builder for sandbox classes
pub struct ClassBuilder {
    name: String,
    super_name: Option<String>,
    interfaces: Vec<String>,
    is_interface: bool,
    fields: Vec<(String, String)>,
    static_fields: Vec<(String, String)>,
    methods: Vec<MethodSpec>,
    allocator: Option<Allocator>,
}

impl ClassBuilder {
    /// Start a class extending `java/lang/Object`
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let super_name = (name != OBJECT_CLASS).then(|| OBJECT_CLASS.to_string());
        Self {
            name,
            super_name,
            interfaces: Vec::new(),
            is_interface: false,
            fields: Vec::new(),
            static_fields: Vec::new(),
            methods: Vec::new(),
            allocator: None,
        }
    }

    /// Set the superclass
    pub fn extends(mut self, super_name: impl Into<String>) -> Self {
        self.super_name = Some(super_name.into());
        self
    }

    /// Add an implemented interface
    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    /// Mark this class as an interface
    pub fn interface(mut self) -> Self {
        self.is_interface = true;
        self
    }

    /// Declare an instance field
    pub fn field(mut self, name: impl Into<String>, signature: impl Into<String>) -> Self {
        self.fields.push((name.into(), signature.into()));
        self
    }

    /// Declare a static field
    pub fn static_field(mut self, name: impl Into<String>, signature: impl Into<String>) -> Self {
        self.static_fields.push((name.into(), signature.into()));
        self
    }

    /// Declare an instance method
    pub fn method<F>(mut self, name: impl Into<String>, signature: impl Into<String>, body: F) -> Self
    where
        F: Fn(&SandboxEnv, Invocation<'_>) -> VmValue + Send + Sync + 'static,
    {
        self.methods.push(MethodSpec {
            name: name.into(),
            signature: signature.into(),
            is_static: false,
            body: Arc::new(body),
        });
        self
    }

    /// Declare a static method
    pub fn static_method<F>(
        mut self,
        name: impl Into<String>,
        signature: impl Into<String>,
        body: F,
    ) -> Self
    where
        F: Fn(&SandboxEnv, Invocation<'_>) -> VmValue + Send + Sync + 'static,
    {
        self.methods.push(MethodSpec {
            name: name.into(),
            signature: signature.into(),
            is_static: true,
            body: Arc::new(body),
        });
        self
    }

    /// Declare a constructor (`<init>` with a void return)
    pub fn constructor<F>(self, signature: impl Into<String>, body: F) -> Self
    where
        F: Fn(&SandboxEnv, Invocation<'_>) -> VmValue + Send + Sync + 'static,
    {
        self.method("<init>", signature, body)
    }

    pub(crate) fn allocator(mut self, allocator: Allocator) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Name of the class being built
    pub fn name(&self) -> &str {
        &self.name
    }
}

pub(crate) struct ClassDef {
    pub(crate) name: String,
    pub(crate) super_class: Option<ClassIdx>,
    pub(crate) interfaces: Vec<ClassIdx>,
    pub(crate) mirror: ObjId,
    /// Kinds of all instance slots, inherited slots first
    pub(crate) layout: Vec<ValueKind>,
    pub(crate) static_values: Vec<HeapValue>,
    pub(crate) allocator: Option<Allocator>,
    pub(crate) is_interface: bool,
}

#[derive(Clone)]
pub(crate) struct MethodEntry {
    pub(crate) class: ClassIdx,
    pub(crate) name: String,
    pub(crate) signature: String,
    pub(crate) args: Vec<ValueKind>,
    pub(crate) ret: ValueKind,
    pub(crate) is_static: bool,
    pub(crate) body: MethodFn,
}

#[derive(Clone)]
pub(crate) struct FieldEntry {
    pub(crate) class: ClassIdx,
    pub(crate) kind: ValueKind,
    pub(crate) slot: usize,
    pub(crate) is_static: bool,
}

type MemberKey = (ClassIdx, String, String);

/// All defined classes and their members
#[derive(Default)]
pub(crate) struct ClassTable {
    classes: Vec<ClassDef>,
    by_name: HashMap<String, ClassIdx>,
    methods: Vec<MethodEntry>,
    fields: Vec<FieldEntry>,
    declared_methods: HashMap<MemberKey, usize>,
    declared_fields: HashMap<MemberKey, usize>,
}

impl ClassTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn define(&mut self, heap: &mut Heap, builder: ClassBuilder) -> Result<ClassIdx, DefineError> {
        if self.by_name.contains_key(&builder.name) {
            return Err(DefineError::Duplicate(builder.name));
        }
        let lookup = |name: &String| {
            self.by_name
                .get(name)
                .copied()
                .ok_or_else(|| DefineError::MissingDependency {
                    class: builder.name.clone(),
                    missing: name.clone(),
                })
        };
        let super_class = builder.super_name.as_ref().map(lookup).transpose()?;
        let interfaces = builder
            .interfaces
            .iter()
            .map(lookup)
            .collect::<Result<Vec<_>, _>>()?;

        let bad = |member: &str, descriptor: &str| DefineError::BadDescriptor {
            class: builder.name.clone(),
            member: member.to_string(),
            descriptor: descriptor.to_string(),
        };

        let idx = self.classes.len();
        let mut layout = super_class
            .map(|s| self.classes[s].layout.clone())
            .unwrap_or_default();

        let mut new_fields = Vec::new();
        for (name, sig) in &builder.fields {
            let kind = field_kind(sig).ok_or_else(|| bad(name.as_str(), sig.as_str()))?;
            new_fields.push((name.clone(), sig.clone(), FieldEntry {
                class: idx,
                kind,
                slot: layout.len(),
                is_static: false,
            }));
            layout.push(kind);
        }
        let mut static_values = Vec::new();
        for (name, sig) in &builder.static_fields {
            let kind = field_kind(sig).ok_or_else(|| bad(name.as_str(), sig.as_str()))?;
            new_fields.push((name.clone(), sig.clone(), FieldEntry {
                class: idx,
                kind,
                slot: static_values.len(),
                is_static: true,
            }));
            static_values.push(HeapValue::zero(kind));
        }

        let mut new_methods = Vec::new();
        for spec in builder.methods {
            let (args, ret) =
                method_kinds(&spec.signature).ok_or_else(|| bad(spec.name.as_str(), spec.signature.as_str()))?;
            new_methods.push(MethodEntry {
                class: idx,
                name: spec.name,
                signature: spec.signature,
                args,
                ret,
                is_static: spec.is_static,
                body: spec.body,
            });
        }

        // Mirrors are instances of java/lang/Class; classes defined before it
        // are patched once it exists.
        let mirror_class = self.by_name.get(CLASS_CLASS).copied().unwrap_or(idx);
        let mirror = heap.alloc(mirror_class, Body::Class(idx));
        if builder.name == CLASS_CLASS {
            for def in &self.classes {
                heap.get_mut(def.mirror).class = idx;
            }
        }

        for (name, sig, entry) in new_fields {
            self.declared_fields.insert((idx, name, sig), self.fields.len());
            self.fields.push(entry);
        }
        for entry in new_methods {
            self.declared_methods
                .insert((idx, entry.name.clone(), entry.signature.clone()), self.methods.len());
            self.methods.push(entry);
        }

        log::trace!("defined class {} as #{}", builder.name, idx);
        self.by_name.insert(builder.name.clone(), idx);
        self.classes.push(ClassDef {
            name: builder.name,
            super_class,
            interfaces,
            mirror,
            layout,
            static_values,
            allocator: builder.allocator,
            is_interface: builder.is_interface,
        });
        Ok(idx)
    }

    /// Define `[X` on first use
    pub(crate) fn array_class(&mut self, heap: &mut Heap, name: &str) -> Option<ClassIdx> {
        if let Some(idx) = self.by_name.get(name) {
            return Some(*idx);
        }
        let element = &name[1..];
        let valid = match element.chars().next()? {
            'L' => element.ends_with(';') && self.by_name.contains_key(&element[1..element.len() - 1]),
            '[' => self.array_class(heap, element).is_some(),
            c => ValueKind::from_descriptor(c).is_some_and(|k| k.is_primitive()) && element.len() == 1,
        };
        if !valid {
            return None;
        }
        self.define(heap, ClassBuilder::new(name)).ok()
    }

    pub(crate) fn get(&self, idx: ClassIdx) -> &ClassDef {
        &self.classes[idx]
    }

    pub(crate) fn get_mut(&mut self, idx: ClassIdx) -> &mut ClassDef {
        &mut self.classes[idx]
    }

    pub(crate) fn by_name(&self, name: &str) -> Option<ClassIdx> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn method(&self, index: usize) -> Option<&MethodEntry> {
        self.methods.get(index)
    }

    pub(crate) fn field(&self, index: usize) -> Option<&FieldEntry> {
        self.fields.get(index)
    }

    /// Resolve a method declared on `class`, its superclasses, or interfaces
    pub(crate) fn find_method(&self, class: ClassIdx, name: &str, signature: &str, is_static: bool) -> Option<usize> {
        if name == "<init>" {
            // Constructors are not inherited
            return self
                .declared_methods
                .get(&(class, name.to_string(), signature.to_string()))
                .copied();
        }
        self.find_member(class, &|idx| {
            self.declared_methods
                .get(&(idx, name.to_string(), signature.to_string()))
                .copied()
                .filter(|m| self.methods[*m].is_static == is_static)
        })
    }

    /// Resolve a field declared on `class` or its superclasses
    pub(crate) fn find_field(&self, class: ClassIdx, name: &str, signature: &str, is_static: bool) -> Option<usize> {
        self.find_member(class, &|idx| {
            self.declared_fields
                .get(&(idx, name.to_string(), signature.to_string()))
                .copied()
                .filter(|f| self.fields[*f].is_static == is_static)
        })
    }

    fn find_member(&self, class: ClassIdx, lookup: &dyn Fn(ClassIdx) -> Option<usize>) -> Option<usize> {
        let mut current = Some(class);
        while let Some(idx) = current {
            if let Some(found) = lookup(idx) {
                return Some(found);
            }
            current = self.classes[idx].super_class;
        }
        // Interfaces last, depth first
        let mut current = Some(class);
        while let Some(idx) = current {
            for iface in &self.classes[idx].interfaces {
                if let Some(found) = self.find_member(*iface, lookup) {
                    return Some(found);
                }
            }
            current = self.classes[idx].super_class;
        }
        None
    }

    /// Whether `class` is `target` or one of its subtypes
    pub(crate) fn is_subclass(&self, class: ClassIdx, target: ClassIdx) -> bool {
        if class == target {
            return true;
        }
        let def = &self.classes[class];
        def.super_class.is_some_and(|s| self.is_subclass(s, target))
            || def.interfaces.iter().any(|i| self.is_subclass(*i, target))
    }
}

/// Kind of a field descriptor
pub(crate) fn field_kind(signature: &str) -> Option<ValueKind> {
    let mut chars = signature.chars();
    let kind = ValueKind::from_descriptor(chars.next()?)?;
    match kind {
        ValueKind::Void => None,
        ValueKind::Object if signature.starts_with('L') => signature.ends_with(';').then_some(kind),
        ValueKind::Object => field_kind(&signature[1..]).map(|_| kind),
        _ => chars.next().is_none().then_some(kind),
    }
}

/// Argument and return kinds of a method descriptor
pub(crate) fn method_kinds(signature: &str) -> Option<(Vec<ValueKind>, ValueKind)> {
    let rest = signature.strip_prefix('(')?;
    let close = rest.find(')')?;
    let (params, ret) = (&rest[..close], &rest[close + 1..]);

    let mut args = Vec::new();
    let bytes = params.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        while bytes[i] == b'[' {
            i += 1;
            if i >= bytes.len() {
                return None;
            }
        }
        if bytes[i] == b'L' {
            i += params[i..].find(';')?;
        }
        i += 1;
        args.push(field_kind(&params[start..i])?);
    }

    let ret = if ret == "V" { ValueKind::Void } else { field_kind(ret)? };
    Some((args, ret))
}
