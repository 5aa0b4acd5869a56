//! SandboxEnv — per-thread environment
//!
//! Every handle is checked on use. Misuse that a production VM turns into
//! memory corruption panics here with a description of what went wrong:
//! stale locals, locals used on the wrong thread, released globals, and any
//! call other than the permitted few while an exception is pending.
//!
//! Handle encoding:
//!
//! ```text
//! local   [ env serial : 32 ][ slot : 30 ][ 01 ]
//! global  [ global id       : 62        ][ 10 ]
//! ```

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use kopi_sdk::{FieldId, HandleKind, MethodId, RawHandle, ValueKind, VmEnv, VmError, VmResult, VmValue};

use crate::builtins::{
    ARRAY_INDEX_CLASS, NO_CLASS_DEF_CLASS, NO_SUCH_FIELD_CLASS, NO_SUCH_METHOD_CLASS, STRING_CLASS,
    THROWABLE_CLASS,
};
use crate::class::{ClassTable, FieldEntry, Invocation, MethodEntry};
use crate::heap::{Body, ClassIdx, Heap, HeapValue, ObjId};
use crate::runtime::Shared;

const LOCAL_TAG: usize = 1;
const GLOBAL_TAG: usize = 2;
const TAG_MASK: usize = 3;
const SLOT_MASK: usize = 0x3FFF_FFFF;

/// Largest local frame the sandbox will reserve
pub const MAX_FRAME_CAPACITY: usize = 1 << 16;

/// Environment of one attached thread
pub struct SandboxEnv {
    shared: Arc<Shared>,
    serial: u32,
    frames: RefCell<Vec<HashMap<u32, ObjId>>>,
    next_slot: Cell<u32>,
    pending: Cell<Option<ObjId>>,
    _not_send: PhantomData<*const ()>,
}

fn label(classes: &ClassTable, method: &MethodEntry) -> String {
    let owner = classes.get(method.class).name.as_str();
    format!("{}.{}{}", owner, method.name, method.signature)
}

impl SandboxEnv {
    pub(crate) fn new(shared: Arc<Shared>, serial: u32) -> Self {
        Self {
            shared,
            serial,
            frames: RefCell::new(vec![HashMap::new()]),
            next_slot: Cell::new(1),
            pending: Cell::new(None),
            _not_send: PhantomData,
        }
    }

    // ========================================================================
    // Handle bookkeeping
    // ========================================================================

    fn count(&self) {
        self.shared.stats.env_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn enter(&self, op: &str) {
        self.count();
        if let Some(exc) = self.pending.get() {
            panic!("{} called with pending exception {}", op, self.describe(exc));
        }
    }

    /// New local handle in the innermost frame
    pub(crate) fn local(&self, obj: ObjId) -> RawHandle {
        let slot = self.next_slot.get();
        if slot as usize > SLOT_MASK {
            panic!("local handle space of env {} exhausted", self.serial);
        }
        self.next_slot.set(slot + 1);
        if let Some(frame) = self.frames.borrow_mut().last_mut() {
            frame.insert(slot, obj);
        }
        let addr = (((self.serial as u64) << 32) as usize) | ((slot as usize) << 2) | LOCAL_TAG;
        match RawHandle::new(addr) {
            Some(handle) => handle,
            None => unreachable!("tagged handles are never null"),
        }
    }

    fn local_slot(&self, handle: RawHandle) -> Option<u32> {
        let addr = handle.addr();
        if addr & TAG_MASK != LOCAL_TAG || ((addr as u64) >> 32) as u32 != self.serial {
            return None;
        }
        Some(((addr >> 2) & SLOT_MASK) as u32)
    }

    /// Object a handle refers to
    pub(crate) fn resolve(&self, handle: RawHandle) -> ObjId {
        match handle.addr() & TAG_MASK {
            LOCAL_TAG => {
                let slot = self.local_slot(handle).unwrap_or_else(|| {
                    panic!("local handle {:?} used outside the thread that created it", handle)
                });
                self.frames
                    .borrow()
                    .iter()
                    .rev()
                    .find_map(|frame| frame.get(&slot).copied())
                    .unwrap_or_else(|| {
                        panic!("stale local handle {:?} (deleted or its frame was popped)", handle)
                    })
            }
            GLOBAL_TAG => self.shared.resolve_global(handle),
            _ => panic!("{:?} was not issued by this VM", handle),
        }
    }

    fn push_frame(&self) {
        self.frames.borrow_mut().push(HashMap::new());
    }

    fn pop_frame(&self, result: Option<RawHandle>) -> Option<RawHandle> {
        let carried = result.map(|h| self.resolve(h));
        {
            let mut frames = self.frames.borrow_mut();
            if frames.len() <= 1 {
                panic!("pop_local_frame without a matching push_local_frame");
            }
            frames.pop();
        }
        carried.map(|obj| self.local(obj))
    }

    /// Number of open local frames, including the base frame
    pub fn frame_depth(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Number of live local handles across all frames
    pub fn live_locals(&self) -> usize {
        self.frames.borrow().iter().map(HashMap::len).sum()
    }

    // ========================================================================
    // Heap helpers
    // ========================================================================

    pub(crate) fn with_heap<R>(&self, f: impl FnOnce(&mut Heap) -> R) -> R {
        f(&mut self.shared.heap.lock())
    }

    fn class_idx_of(&self, obj: ObjId) -> ClassIdx {
        self.shared.heap.lock().get(obj).class
    }

    /// Class index behind a class-mirror handle
    pub(crate) fn mirror_index(&self, class: RawHandle) -> ClassIdx {
        let obj = self.resolve(class);
        match self.shared.heap.lock().get(obj).body {
            Body::Class(idx) => idx,
            _ => panic!("{:?} is not a class", class),
        }
    }

    pub(crate) fn class_by_name(&self, name: &str) -> ClassIdx {
        self.shared
            .classes
            .read()
            .by_name(name)
            .unwrap_or_else(|| panic!("class {} is not defined", name))
    }

    pub(crate) fn class_name_at(&self, idx: ClassIdx) -> String {
        self.shared.classes.read().get(idx).name.clone()
    }

    /// Allocate an object of the named class with the given body
    pub(crate) fn alloc(&self, class: &str, body: Body) -> RawHandle {
        let idx = self.class_by_name(class);
        let obj = self.shared.heap.lock().alloc(idx, body);
        self.local(obj)
    }

    fn alloc_string(&self, s: &str) -> ObjId {
        let idx = self.class_by_name(STRING_CLASS);
        self.shared.heap.lock().alloc(idx, Body::Str(s.to_string()))
    }

    fn instantiate(&self, idx: ClassIdx) -> ObjId {
        let body = {
            let classes = self.shared.classes.read();
            let def = classes.get(idx);
            if def.is_interface {
                panic!("cannot instantiate interface {}", def.name);
            }
            match def.allocator {
                Some(allocator) => allocator(),
                None => Body::Instance(def.layout.iter().map(|k| HeapValue::zero(*k)).collect()),
            }
        };
        self.shared.heap.lock().alloc(idx, body)
    }

    fn ensure_array_class(&self, name: &str) -> ClassIdx {
        let mut classes = self.shared.classes.write();
        let mut heap = self.shared.heap.lock();
        classes
            .array_class(&mut heap, name)
            .unwrap_or_else(|| panic!("invalid array class {}", name))
    }

    fn describe(&self, obj: ObjId) -> String {
        let class = self.class_idx_of(obj);
        let name = self.class_name_at(class);
        let message = self.throwable_message(obj);
        let rendered = self.shared.heap.lock().render(obj, &name);
        match message {
            Some(message) => format!("{}: {}", rendered, message),
            None => rendered,
        }
    }

    fn throwable_message(&self, obj: ObjId) -> Option<String> {
        let slot = {
            let classes = self.shared.classes.read();
            let class = self.class_idx_of(obj);
            let field = classes.find_field(class, "message", "Ljava/lang/String;", false)?;
            classes.field(field)?.slot
        };
        let heap = self.shared.heap.lock();
        match &heap.get(obj).body {
            Body::Instance(slots) => match slots.get(slot) {
                Some(HeapValue::Ref(Some(s))) => match &heap.get(*s).body {
                    Body::Str(text) => Some(text.clone()),
                    _ => None,
                },
                _ => None,
            },
            _ => None,
        }
    }

    pub(crate) fn to_vm(&self, value: HeapValue) -> VmValue {
        match value {
            HeapValue::Boolean(b) => VmValue::Boolean(b),
            HeapValue::Byte(b) => VmValue::Byte(b),
            HeapValue::Char(c) => VmValue::Char(c),
            HeapValue::Short(s) => VmValue::Short(s),
            HeapValue::Int(i) => VmValue::Int(i),
            HeapValue::Long(l) => VmValue::Long(l),
            HeapValue::Float(f) => VmValue::Float(f),
            HeapValue::Double(d) => VmValue::Double(d),
            HeapValue::Ref(r) => VmValue::Object(r.map(|obj| self.local(obj))),
        }
    }

    pub(crate) fn to_heap(&self, value: VmValue) -> HeapValue {
        match value {
            VmValue::Void => panic!("void is not a storable value"),
            VmValue::Boolean(b) => HeapValue::Boolean(b),
            VmValue::Byte(b) => HeapValue::Byte(b),
            VmValue::Char(c) => HeapValue::Char(c),
            VmValue::Short(s) => HeapValue::Short(s),
            VmValue::Int(i) => HeapValue::Int(i),
            VmValue::Long(l) => HeapValue::Long(l),
            VmValue::Float(f) => HeapValue::Float(f),
            VmValue::Double(d) => HeapValue::Double(d),
            VmValue::Object(h) => HeapValue::Ref(h.map(|h| self.resolve(h))),
        }
    }

    // ========================================================================
    // Helpers for method bodies
    // ========================================================================

    /// Raise a new exception of the named class with `message`
    ///
    /// # Panics
    /// Panics if the class is not defined or is not a `java/lang/Throwable`.
    pub fn throw_named(&self, class: &str, message: &str) {
        let idx = self.class_by_name(class);
        let exc = self.new_throwable(idx, message);
        self.raise(exc);
    }

    /// Internal name of an object's class
    pub fn class_name(&self, obj: RawHandle) -> String {
        let class = self.class_idx_of(self.resolve(obj));
        self.class_name_at(class)
    }

    /// Render an object the way `Object.toString()` does
    pub fn display(&self, obj: RawHandle) -> String {
        let obj = self.resolve(obj);
        let class = self.class_idx_of(obj);
        let name = self.class_name_at(class);
        self.shared.heap.lock().render(obj, &name)
    }

    fn new_throwable(&self, idx: ClassIdx, message: &str) -> ObjId {
        let slot = {
            let classes = self.shared.classes.read();
            let throwable = classes
                .by_name(THROWABLE_CLASS)
                .unwrap_or_else(|| panic!("{} is not defined", THROWABLE_CLASS));
            if !classes.is_subclass(idx, throwable) {
                panic!("{} is not a throwable class", classes.get(idx).name);
            }
            classes
                .find_field(idx, "message", "Ljava/lang/String;", false)
                .and_then(|f| classes.field(f))
                .map(|f| f.slot)
        };
        let text = self.alloc_string(message);
        let exc = self.instantiate(idx);
        if let Some(slot) = slot {
            if let Body::Instance(slots) = &mut self.shared.heap.lock().get_mut(exc).body {
                slots[slot] = HeapValue::Ref(Some(text));
            }
        }
        exc
    }

    fn raise(&self, exc: ObjId) {
        self.shared.stats.exceptions_thrown.fetch_add(1, Ordering::Relaxed);
        log::trace!("env {} raised {}", self.serial, self.describe(exc));
        self.pending.set(Some(exc));
    }

    // ========================================================================
    // Invocation
    // ========================================================================

    fn method_entry(&self, method: MethodId) -> (MethodEntry, String) {
        let classes = self.shared.classes.read();
        let entry = classes
            .method(method.as_raw() - 1)
            .unwrap_or_else(|| panic!("{:?} was not issued by this VM", method));
        (entry.clone(), label(&classes, entry))
    }

    fn field_entry(&self, field: FieldId) -> FieldEntry {
        self.shared
            .classes
            .read()
            .field(field.as_raw() - 1)
            .cloned()
            .unwrap_or_else(|| panic!("{:?} was not issued by this VM", field))
    }

    fn check_args(&self, method: &MethodEntry, name: &str, args: &[VmValue]) {
        if args.len() != method.args.len() {
            panic!("{} takes {} arguments, got {}", name, method.args.len(), args.len());
        }
        for (index, (arg, kind)) in args.iter().zip(&method.args).enumerate() {
            if arg.kind() != *kind {
                panic!("argument {} of {}: expected {:?}, got {:?}", index, name, kind, arg.kind());
            }
            if let VmValue::Object(Some(handle)) = arg {
                self.resolve(*handle);
            }
        }
    }

    fn invoke(&self, method: &MethodEntry, name: &str, this: Option<RawHandle>, args: &[VmValue]) -> VmValue {
        self.check_args(method, name, args);
        self.shared.stats.invocations.fetch_add(1, Ordering::Relaxed);
        log::trace!("env {} invoke {}", self.serial, name);

        self.push_frame();
        let result = (method.body)(self, Invocation { this, args });
        if self.pending.get().is_some() {
            self.pop_frame(None);
            return VmValue::zero(method.ret);
        }
        if result.kind() != method.ret {
            panic!("{} returned {:?}, declared {:?}", name, result.kind(), method.ret);
        }
        match result {
            VmValue::Object(handle) => VmValue::Object(self.pop_frame(handle)),
            other => {
                self.pop_frame(None);
                other
            }
        }
    }

    fn lookup_method(&self, class: RawHandle, name: &str, signature: &str, is_static: bool) -> Option<MethodId> {
        self.shared.stats.lookups.fetch_add(1, Ordering::Relaxed);
        let idx = self.mirror_index(class);
        let found = self.shared.classes.read().find_method(idx, name, signature, is_static);
        match found {
            Some(index) => MethodId::new(index + 1),
            None => {
                let owner = self.class_name_at(idx).replace('/', ".");
                self.throw_named(NO_SUCH_METHOD_CLASS, &format!("{}.{}{}", owner, name, signature));
                None
            }
        }
    }

    fn lookup_field(&self, class: RawHandle, name: &str, signature: &str, is_static: bool) -> Option<FieldId> {
        self.shared.stats.lookups.fetch_add(1, Ordering::Relaxed);
        let idx = self.mirror_index(class);
        let found = self.shared.classes.read().find_field(idx, name, signature, is_static);
        match found {
            Some(index) => FieldId::new(index + 1),
            None => {
                let owner = self.class_name_at(idx).replace('/', ".");
                self.throw_named(NO_SUCH_FIELD_CLASS, &format!("{}.{} {}", owner, name, signature));
                None
            }
        }
    }

    fn require_subclass(&self, class: ClassIdx, owner: ClassIdx, what: &str) {
        let classes = self.shared.classes.read();
        if !classes.is_subclass(class, owner) {
            panic!(
                "{}: {} is not a subtype of {}",
                what,
                classes.get(class).name,
                classes.get(owner).name
            );
        }
    }

    fn array_index(&self, arr: RawHandle, index: usize) -> Option<ObjId> {
        let obj = self.resolve(arr);
        let len = match &self.shared.heap.lock().get(obj).body {
            Body::Objects(items) => items.len(),
            _ => panic!("{:?} is not an object array", arr),
        };
        if index >= len {
            self.throw_named(
                ARRAY_INDEX_CLASS,
                &format!("Index {} out of bounds for length {}", index, len),
            );
            return None;
        }
        Some(obj)
    }
}

impl VmEnv for SandboxEnv {
    // ========================================================================
    // Classes
    // ========================================================================

    fn find_class(&self, name: &str) -> Option<RawHandle> {
        self.enter("find_class");
        let mut found = self.shared.classes.read().by_name(name);
        if found.is_none() && name.starts_with('[') {
            let mut classes = self.shared.classes.write();
            let mut heap = self.shared.heap.lock();
            found = classes.array_class(&mut heap, name);
        }
        match found {
            Some(idx) => {
                let mirror = self.shared.classes.read().get(idx).mirror;
                Some(self.local(mirror))
            }
            None => {
                self.throw_named(NO_CLASS_DEF_CLASS, name);
                None
            }
        }
    }

    fn get_object_class(&self, obj: RawHandle) -> RawHandle {
        self.enter("get_object_class");
        let class = self.class_idx_of(self.resolve(obj));
        let mirror = self.shared.classes.read().get(class).mirror;
        self.local(mirror)
    }

    fn is_instance_of(&self, obj: RawHandle, class: RawHandle) -> bool {
        self.enter("is_instance_of");
        let actual = self.class_idx_of(self.resolve(obj));
        let target = self.mirror_index(class);
        self.shared.classes.read().is_subclass(actual, target)
    }

    fn is_same_object(&self, a: Option<RawHandle>, b: Option<RawHandle>) -> bool {
        self.enter("is_same_object");
        a.map(|h| self.resolve(h)) == b.map(|h| self.resolve(h))
    }

    // ========================================================================
    // Member lookup
    // ========================================================================

    fn get_method_id(&self, class: RawHandle, name: &str, signature: &str) -> Option<MethodId> {
        self.enter("get_method_id");
        self.lookup_method(class, name, signature, false)
    }

    fn get_static_method_id(&self, class: RawHandle, name: &str, signature: &str) -> Option<MethodId> {
        self.enter("get_static_method_id");
        self.lookup_method(class, name, signature, true)
    }

    fn get_field_id(&self, class: RawHandle, name: &str, signature: &str) -> Option<FieldId> {
        self.enter("get_field_id");
        self.lookup_field(class, name, signature, false)
    }

    fn get_static_field_id(&self, class: RawHandle, name: &str, signature: &str) -> Option<FieldId> {
        self.enter("get_static_field_id");
        self.lookup_field(class, name, signature, true)
    }

    // ========================================================================
    // Invocation
    // ========================================================================

    fn call_method(&self, obj: RawHandle, method: MethodId, ret: ValueKind, args: &[VmValue]) -> VmValue {
        self.enter("call_method");
        let class = self.class_idx_of(self.resolve(obj));
        let (declared, name) = self.method_entry(method);
        if declared.is_static || declared.name == "<init>" {
            panic!("call_method on {}", name);
        }
        self.require_subclass(class, declared.class, &name);
        let (entry, name) = {
            let classes = self.shared.classes.read();
            match classes
                .find_method(class, &declared.name, &declared.signature, false)
                .and_then(|index| classes.method(index))
            {
                Some(actual) => (actual.clone(), label(&classes, actual)),
                None => (declared, name),
            }
        };
        if entry.ret != ret {
            panic!("{} returns {:?}, called as {:?}", name, entry.ret, ret);
        }
        self.invoke(&entry, &name, Some(obj), args)
    }

    fn call_static_method(&self, class: RawHandle, method: MethodId, ret: ValueKind, args: &[VmValue]) -> VmValue {
        self.enter("call_static_method");
        let idx = self.mirror_index(class);
        let (entry, name) = self.method_entry(method);
        if !entry.is_static {
            panic!("call_static_method on instance method {}", name);
        }
        self.require_subclass(idx, entry.class, &name);
        if entry.ret != ret {
            panic!("{} returns {:?}, called as {:?}", name, entry.ret, ret);
        }
        self.invoke(&entry, &name, None, args)
    }

    fn new_object(&self, class: RawHandle, ctor: MethodId, args: &[VmValue]) -> Option<RawHandle> {
        self.enter("new_object");
        let idx = self.mirror_index(class);
        let (entry, name) = self.method_entry(ctor);
        if entry.name != "<init>" || entry.class != idx {
            panic!("new_object with {} is not a constructor of {}", name, self.class_name_at(idx));
        }
        let obj = self.local(self.instantiate(idx));
        self.invoke(&entry, &name, Some(obj), args);
        if self.pending.get().is_some() {
            self.delete_local_ref(obj);
            return None;
        }
        Some(obj)
    }

    // ========================================================================
    // Fields
    // ========================================================================

    fn get_field(&self, obj: RawHandle, field: FieldId, kind: ValueKind) -> VmValue {
        self.enter("get_field");
        let target = self.resolve(obj);
        let entry = self.field_entry(field);
        if entry.is_static || entry.kind != kind {
            panic!("get_field: {:?} read as {:?} (static: {})", entry.kind, kind, entry.is_static);
        }
        self.require_subclass(self.class_idx_of(target), entry.class, "get_field");
        let value = match &self.shared.heap.lock().get(target).body {
            Body::Instance(slots) => slots[entry.slot],
            _ => panic!("get_field on non-instance {:?}", obj),
        };
        self.to_vm(value)
    }

    fn set_field(&self, obj: RawHandle, field: FieldId, value: VmValue) {
        self.enter("set_field");
        let target = self.resolve(obj);
        let entry = self.field_entry(field);
        if entry.is_static || entry.kind != value.kind() {
            panic!("set_field: {:?} written as {:?} (static: {})", entry.kind, value.kind(), entry.is_static);
        }
        self.require_subclass(self.class_idx_of(target), entry.class, "set_field");
        let value = self.to_heap(value);
        match &mut self.shared.heap.lock().get_mut(target).body {
            Body::Instance(slots) => slots[entry.slot] = value,
            _ => panic!("set_field on non-instance {:?}", obj),
        }
    }

    fn get_static_field(&self, class: RawHandle, field: FieldId, kind: ValueKind) -> VmValue {
        self.enter("get_static_field");
        let idx = self.mirror_index(class);
        let entry = self.field_entry(field);
        if !entry.is_static || entry.kind != kind {
            panic!("get_static_field: {:?} read as {:?} (static: {})", entry.kind, kind, entry.is_static);
        }
        self.require_subclass(idx, entry.class, "get_static_field");
        let value = self.shared.classes.read().get(entry.class).static_values[entry.slot];
        self.to_vm(value)
    }

    fn set_static_field(&self, class: RawHandle, field: FieldId, value: VmValue) {
        self.enter("set_static_field");
        let idx = self.mirror_index(class);
        let entry = self.field_entry(field);
        if !entry.is_static || entry.kind != value.kind() {
            panic!(
                "set_static_field: {:?} written as {:?} (static: {})",
                entry.kind,
                value.kind(),
                entry.is_static
            );
        }
        self.require_subclass(idx, entry.class, "set_static_field");
        let value = self.to_heap(value);
        self.shared.classes.write().get_mut(entry.class).static_values[entry.slot] = value;
    }

    // ========================================================================
    // Exceptions
    // ========================================================================

    fn exception_check(&self) -> bool {
        self.count();
        self.pending.get().is_some()
    }

    fn exception_occurred(&self) -> Option<RawHandle> {
        self.count();
        self.pending.get().map(|exc| self.local(exc))
    }

    fn exception_clear(&self) {
        self.count();
        self.pending.set(None);
    }

    fn throw(&self, throwable: RawHandle) {
        self.enter("throw");
        let exc = self.resolve(throwable);
        let throwable_class = self.class_by_name(THROWABLE_CLASS);
        self.require_subclass(self.class_idx_of(exc), throwable_class, "throw");
        self.raise(exc);
    }

    fn throw_new(&self, class: RawHandle, message: &str) {
        self.enter("throw_new");
        let idx = self.mirror_index(class);
        let exc = self.new_throwable(idx, message);
        self.raise(exc);
    }

    // ========================================================================
    // References
    // ========================================================================

    fn new_local_ref(&self, obj: RawHandle) -> Option<RawHandle> {
        self.enter("new_local_ref");
        Some(self.local(self.resolve(obj)))
    }

    fn delete_local_ref(&self, obj: RawHandle) {
        self.count();
        let slot = self
            .local_slot(obj)
            .unwrap_or_else(|| panic!("delete_local_ref on {:?}, which is not a local of this thread", obj));
        let removed = self
            .frames
            .borrow_mut()
            .iter_mut()
            .rev()
            .find_map(|frame| frame.remove(&slot));
        if removed.is_none() {
            panic!("delete_local_ref on stale local handle {:?}", obj);
        }
    }

    fn new_global_ref(&self, obj: RawHandle) -> Option<RawHandle> {
        self.enter("new_global_ref");
        Some(self.shared.new_global(self.resolve(obj)))
    }

    fn delete_global_ref(&self, obj: RawHandle) {
        self.count();
        self.shared.release_global(obj);
    }

    fn ref_kind(&self, obj: RawHandle) -> HandleKind {
        self.count();
        match obj.addr() & TAG_MASK {
            LOCAL_TAG => match self.local_slot(obj) {
                Some(slot) if self.frames.borrow().iter().any(|f| f.contains_key(&slot)) => {
                    HandleKind::Transient
                }
                _ => HandleKind::Invalid,
            },
            GLOBAL_TAG if self.shared.is_live_global(obj) => HandleKind::Durable,
            _ => HandleKind::Invalid,
        }
    }

    fn push_local_frame(&self, capacity: usize) -> VmResult<()> {
        self.enter("push_local_frame");
        if capacity > MAX_FRAME_CAPACITY {
            return Err(VmError::FrameOverflow { requested: capacity });
        }
        self.push_frame();
        Ok(())
    }

    fn pop_local_frame(&self, result: Option<RawHandle>) -> Option<RawHandle> {
        self.count();
        self.pop_frame(result)
    }

    // ========================================================================
    // Strings and arrays
    // ========================================================================

    fn new_string(&self, s: &str) -> Option<RawHandle> {
        self.enter("new_string");
        Some(self.local(self.alloc_string(s)))
    }

    fn string_utf(&self, s: RawHandle) -> Option<String> {
        self.enter("string_utf");
        let obj = self.resolve(s);
        match &self.shared.heap.lock().get(obj).body {
            Body::Str(text) => Some(text.clone()),
            _ => None,
        }
    }

    fn new_byte_array(&self, data: &[u8]) -> Option<RawHandle> {
        self.enter("new_byte_array");
        let idx = self.ensure_array_class("[B");
        let obj = self.shared.heap.lock().alloc(idx, Body::Bytes(data.to_vec()));
        Some(self.local(obj))
    }

    fn byte_array_elements(&self, arr: RawHandle) -> Option<Vec<u8>> {
        self.enter("byte_array_elements");
        let obj = self.resolve(arr);
        match &self.shared.heap.lock().get(obj).body {
            Body::Bytes(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }

    fn new_object_array(&self, len: usize, element_class: RawHandle) -> Option<RawHandle> {
        self.enter("new_object_array");
        let element = self.class_name_at(self.mirror_index(element_class));
        let name = if element.starts_with('[') {
            format!("[{}", element)
        } else {
            format!("[L{};", element)
        };
        let idx = self.ensure_array_class(&name);
        let obj = self.shared.heap.lock().alloc(idx, Body::Objects(vec![None; len]));
        Some(self.local(obj))
    }

    fn object_array_element(&self, arr: RawHandle, index: usize) -> Option<RawHandle> {
        self.enter("object_array_element");
        let obj = self.array_index(arr, index)?;
        let element = match &self.shared.heap.lock().get(obj).body {
            Body::Objects(items) => items[index],
            _ => None,
        };
        element.map(|e| self.local(e))
    }

    fn set_object_array_element(&self, arr: RawHandle, index: usize, value: Option<RawHandle>) {
        self.enter("set_object_array_element");
        let value = value.map(|h| self.resolve(h));
        if let Some(obj) = self.array_index(arr, index) {
            if let Body::Objects(items) = &mut self.shared.heap.lock().get_mut(obj).body {
                items[index] = value;
            }
        }
    }

    fn array_length(&self, arr: RawHandle) -> usize {
        self.enter("array_length");
        let obj = self.resolve(arr);
        match &self.shared.heap.lock().get(obj).body {
            Body::Bytes(bytes) => bytes.len(),
            Body::Objects(items) => items.len(),
            _ => panic!("array_length on non-array {:?}", arr),
        }
    }
}
