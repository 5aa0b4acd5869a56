//! Object heap
//!
//! Objects are never collected: the sandbox exists to exercise reference
//! discipline at the boundary, not to manage memory. Every object records
//! the class it was allocated as and a body describing its payload.

use kopi_sdk::ValueKind;

/// Index of a class in the class table
pub(crate) type ClassIdx = usize;

/// Heap object identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ObjId(u32);

impl ObjId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A value as stored inside the heap (objects by id, not by handle)
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum HeapValue {
    Boolean(u8),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Ref(Option<ObjId>),
}

impl HeapValue {
    pub(crate) fn zero(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Boolean => HeapValue::Boolean(0),
            ValueKind::Byte => HeapValue::Byte(0),
            ValueKind::Char => HeapValue::Char(0),
            ValueKind::Short => HeapValue::Short(0),
            ValueKind::Int => HeapValue::Int(0),
            ValueKind::Long => HeapValue::Long(0),
            ValueKind::Float => HeapValue::Float(0.0),
            ValueKind::Double => HeapValue::Double(0.0),
            ValueKind::Object | ValueKind::Void => HeapValue::Ref(None),
        }
    }

    pub(crate) fn kind(&self) -> ValueKind {
        match self {
            HeapValue::Boolean(_) => ValueKind::Boolean,
            HeapValue::Byte(_) => ValueKind::Byte,
            HeapValue::Char(_) => ValueKind::Char,
            HeapValue::Short(_) => ValueKind::Short,
            HeapValue::Int(_) => ValueKind::Int,
            HeapValue::Long(_) => ValueKind::Long,
            HeapValue::Float(_) => ValueKind::Float,
            HeapValue::Double(_) => ValueKind::Double,
            HeapValue::Ref(_) => ValueKind::Object,
        }
    }

    fn render(&self) -> String {
        match self {
            HeapValue::Boolean(b) => (*b != 0).to_string(),
            HeapValue::Byte(b) => b.to_string(),
            HeapValue::Char(c) => char::from_u32(*c as u32)
                .map(String::from)
                .unwrap_or_else(|| format!("\\u{:04x}", c)),
            HeapValue::Short(s) => s.to_string(),
            HeapValue::Int(i) => i.to_string(),
            HeapValue::Long(l) => l.to_string(),
            HeapValue::Float(f) => f.to_string(),
            HeapValue::Double(d) => d.to_string(),
            HeapValue::Ref(Some(id)) => format!("@{}", id.0),
            HeapValue::Ref(None) => "null".to_string(),
        }
    }
}

/// Payload of a heap object
#[derive(Debug, Clone)]
pub(crate) enum Body {
    /// Plain instance with its field slots (inherited slots first)
    Instance(Vec<HeapValue>),
    /// `java/lang/String`
    Str(String),
    /// `[B`
    Bytes(Vec<u8>),
    /// Object arrays and key sets
    Objects(Vec<Option<ObjId>>),
    /// Class mirror
    Class(ClassIdx),
    /// Boxed primitive (`java/lang/Integer` and friends)
    Boxed(HeapValue),
    /// `java/util/HashMap` entries in insertion order
    Map(Vec<(ObjId, Option<ObjId>)>),
}

#[derive(Debug, Clone)]
pub(crate) struct HeapObject {
    pub(crate) class: ClassIdx,
    pub(crate) body: Body,
}

/// The object heap
#[derive(Debug, Default)]
pub(crate) struct Heap {
    objects: Vec<HeapObject>,
}

impl Heap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn alloc(&mut self, class: ClassIdx, body: Body) -> ObjId {
        let id = ObjId(self.objects.len() as u32);
        self.objects.push(HeapObject { class, body });
        id
    }

    pub(crate) fn get(&self, id: ObjId) -> &HeapObject {
        &self.objects[id.index()]
    }

    pub(crate) fn get_mut(&mut self, id: ObjId) -> &mut HeapObject {
        &mut self.objects[id.index()]
    }

    pub(crate) fn len(&self) -> usize {
        self.objects.len()
    }

    /// Key equality used by maps: identity, string contents, or boxed value
    pub(crate) fn same_key(&self, a: ObjId, b: ObjId) -> bool {
        if a == b {
            return true;
        }
        match (&self.get(a).body, &self.get(b).body) {
            (Body::Str(x), Body::Str(y)) => x == y,
            (Body::Boxed(x), Body::Boxed(y)) => x == y,
            _ => false,
        }
    }

    /// Human-readable rendering of an object's payload
    pub(crate) fn render(&self, id: ObjId, class_name: &str) -> String {
        match &self.get(id).body {
            Body::Str(s) => s.clone(),
            Body::Boxed(v) => v.render(),
            Body::Bytes(b) => format!("byte[{}]", b.len()),
            Body::Objects(items) => format!("{}[{}]", class_name, items.len()),
            Body::Class(_) => format!("class {}", class_name.replace('/', ".")),
            Body::Map(entries) => format!("{{{} entries}}", entries.len()),
            Body::Instance(_) => format!("{}@{}", class_name.replace('/', "."), id.0),
        }
    }
}
