//! Built-in classes
//!
//! The subset of the platform library the bridge depends on: the root
//! classes, throwables, the structured-error class, primitive boxes, and a
//! small insertion-ordered `HashMap`.

use kopi_sdk::{RawHandle, ValueKind, VmEnv, VmValue};

use crate::class::{ClassBuilder, CLASS_CLASS, OBJECT_CLASS};
use crate::env::SandboxEnv;
use crate::heap::{Body, HeapValue, ObjId};

/// `java/lang/String`
pub const STRING_CLASS: &str = "java/lang/String";
/// `java/lang/Throwable`
pub const THROWABLE_CLASS: &str = "java/lang/Throwable";
/// `java/lang/Exception`
pub const EXCEPTION_CLASS: &str = "java/lang/Exception";
/// `java/lang/RuntimeException`
pub const RUNTIME_EXCEPTION_CLASS: &str = "java/lang/RuntimeException";
/// `java/lang/Error`
pub const ERROR_CLASS: &str = "java/lang/Error";
/// Raised by `find_class` for unknown classes
pub const NO_CLASS_DEF_CLASS: &str = "java/lang/NoClassDefFoundError";
/// Raised by method lookups that fail
pub const NO_SUCH_METHOD_CLASS: &str = "java/lang/NoSuchMethodError";
/// Raised by field lookups that fail
pub const NO_SUCH_FIELD_CLASS: &str = "java/lang/NoSuchFieldError";
/// Raised by array accesses out of bounds
pub const ARRAY_INDEX_CLASS: &str = "java/lang/ArrayIndexOutOfBoundsException";
/// `java/lang/IllegalArgumentException`
pub const ILLEGAL_ARGUMENT_CLASS: &str = "java/lang/IllegalArgumentException";
/// `java/lang/IllegalStateException`
pub const ILLEGAL_STATE_CLASS: &str = "java/lang/IllegalStateException";
/// `java/lang/NullPointerException`
pub const NULL_POINTER_CLASS: &str = "java/lang/NullPointerException";
/// `java/lang/ClassCastException`
pub const CLASS_CAST_CLASS: &str = "java/lang/ClassCastException";
/// Structured error carrying an encoded payload
pub const BRIDGE_EXCEPTION_CLASS: &str = "dev/kopi/BridgeException";
/// `java/util/Map`
pub const MAP_CLASS: &str = "java/util/Map";
/// `java/util/Set`
pub const SET_CLASS: &str = "java/util/Set";
/// `java/util/HashMap`
pub const HASH_MAP_CLASS: &str = "java/util/HashMap";
/// Key view returned by `HashMap.keySet()`
pub const KEY_SET_CLASS: &str = "java/util/HashMap$KeySet";

const STRING_SIG: &str = "Ljava/lang/String;";

/// Box class, primitive descriptor, and unboxing method of every primitive
pub const BOXES: [(&str, &str, &str); 8] = [
    ("java/lang/Boolean", "Z", "booleanValue"),
    ("java/lang/Byte", "B", "byteValue"),
    ("java/lang/Character", "C", "charValue"),
    ("java/lang/Short", "S", "shortValue"),
    ("java/lang/Integer", "I", "intValue"),
    ("java/lang/Long", "J", "longValue"),
    ("java/lang/Float", "F", "floatValue"),
    ("java/lang/Double", "D", "doubleValue"),
];

fn void() -> VmValue {
    VmValue::Void
}

fn string(env: &SandboxEnv, s: &str) -> VmValue {
    VmValue::Object(env.new_string(s))
}

fn abstract_method(builder: ClassBuilder, name: &str, signature: &str) -> ClassBuilder {
    let label = format!("{}.{}{}", builder.name(), name, signature);
    builder.method(name, signature, move |_, _| panic!("abstract method {} invoked", label))
}

fn message_field(env: &SandboxEnv, this: RawHandle) -> Option<kopi_sdk::FieldId> {
    let class = env.get_object_class(this);
    env.get_field_id(class, "message", STRING_SIG)
}

fn set_message(env: &SandboxEnv, this: RawHandle, message: Option<RawHandle>) {
    if let Some(field) = message_field(env, this) {
        env.set_field(this, field, VmValue::Object(message));
    }
}

fn throwable(name: &str, super_name: &str) -> ClassBuilder {
    ClassBuilder::new(name)
        .extends(super_name)
        .constructor("()V", |_, _| void())
        .constructor("(Ljava/lang/String;)V", |env, inv| {
            set_message(env, inv.receiver(), inv.object(0));
            void()
        })
}

fn object() -> ClassBuilder {
    ClassBuilder::new(OBJECT_CLASS)
        .constructor("()V", |_, _| void())
        .method("toString", "()Ljava/lang/String;", |env, inv| {
            string(env, &env.display(inv.receiver()))
        })
        .method("hashCode", "()I", |env, inv| {
            VmValue::Int(env.resolve(inv.receiver()).index() as i32)
        })
        .method("equals", "(Ljava/lang/Object;)Z", |env, inv| {
            VmValue::from_bool(env.is_same_object(inv.this, inv.object(0)))
        })
        .method("getClass", "()Ljava/lang/Class;", |env, inv| {
            VmValue::Object(Some(env.get_object_class(inv.receiver())))
        })
}

fn class() -> ClassBuilder {
    ClassBuilder::new(CLASS_CLASS).method("getName", "()Ljava/lang/String;", |env, inv| {
        let idx = env.mirror_index(inv.receiver());
        string(env, &env.class_name_at(idx).replace('/', "."))
    })
}

fn string_class() -> ClassBuilder {
    ClassBuilder::new(STRING_CLASS)
        .allocator(|| Body::Str(String::new()))
        .constructor("()V", |_, _| void())
        .method("length", "()I", |env, inv| {
            let len = env.string_utf(inv.receiver()).map_or(0, |s| s.encode_utf16().count());
            VmValue::Int(len as i32)
        })
        .method("toString", "()Ljava/lang/String;", |_, inv| VmValue::Object(inv.this))
        .method("equals", "(Ljava/lang/Object;)Z", |env, inv| {
            let this = env.resolve(inv.receiver());
            let same = match inv.object(0) {
                Some(other) => {
                    let other = env.resolve(other);
                    env.with_heap(|heap| matches!(heap.get(other).body, Body::Str(_)) && heap.same_key(this, other))
                }
                None => false,
            };
            VmValue::from_bool(same)
        })
}

fn throwable_root() -> ClassBuilder {
    throwable(THROWABLE_CLASS, OBJECT_CLASS)
        .field("message", STRING_SIG)
        .method("getMessage", "()Ljava/lang/String;", |env, inv| {
            let this = inv.receiver();
            match message_field(env, this) {
                Some(field) => env.get_field(this, field, ValueKind::Object),
                None => VmValue::NULL,
            }
        })
        .method("toString", "()Ljava/lang/String;", |env, inv| {
            let this = inv.receiver();
            let name = env.class_name(this).replace('/', ".");
            let message = message_field(env, this)
                .and_then(|field| env.get_field(this, field, ValueKind::Object).as_object().flatten())
                .and_then(|m| env.string_utf(m));
            match message {
                Some(message) => string(env, &format!("{}: {}", name, message)),
                None => string(env, &name),
            }
        })
}

fn payload_field(env: &SandboxEnv, this: RawHandle) -> Option<kopi_sdk::FieldId> {
    let class = env.get_object_class(this);
    env.get_field_id(class, "payload", "[B")
}

fn bridge_exception() -> ClassBuilder {
    ClassBuilder::new(BRIDGE_EXCEPTION_CLASS)
        .extends(RUNTIME_EXCEPTION_CLASS)
        .field("payload", "[B")
        .constructor("([B)V", |env, inv| {
            let this = inv.receiver();
            let payload = inv.object(0);
            let len = payload.map_or(0, |p| env.array_length(p));
            if let Some(field) = payload_field(env, this) {
                env.set_field(this, field, VmValue::Object(payload));
            }
            let message = env.new_string(&format!("structured error ({} bytes)", len));
            set_message(env, this, message);
            void()
        })
        .method("toBytes", "()[B", |env, inv| {
            let this = inv.receiver();
            match payload_field(env, this) {
                Some(field) => env.get_field(this, field, ValueKind::Object),
                None => VmValue::NULL,
            }
        })
        .static_method(
            "fromBytes",
            "([B)Ldev/kopi/BridgeException;",
            |env, inv| {
                let Some(class) = env.find_class(BRIDGE_EXCEPTION_CLASS) else {
                    return VmValue::NULL;
                };
                let Some(ctor) = env.get_method_id(class, "<init>", "([B)V") else {
                    return VmValue::NULL;
                };
                VmValue::Object(env.new_object(class, ctor, &[VmValue::Object(inv.object(0))]))
            },
        )
}

fn boxed(name: &'static str, descriptor: &'static str, getter: &'static str) -> ClassBuilder {
    ClassBuilder::new(name)
        .static_method("valueOf", format!("({})L{};", descriptor, name), move |env, inv| {
            let value = env.to_heap(inv.args[0]);
            VmValue::Object(Some(env.alloc(name, Body::Boxed(value))))
        })
        .method(getter, format!("(){}", descriptor), |env, inv| {
            let this = env.resolve(inv.receiver());
            let value = env.with_heap(|heap| match heap.get(this).body {
                Body::Boxed(value) => value,
                _ => panic!("unboxing a non-box"),
            });
            env.to_vm(value)
        })
}

fn map_interface() -> ClassBuilder {
    let builder = ClassBuilder::new(MAP_CLASS).interface();
    let builder = abstract_method(builder, "size", "()I");
    let builder = abstract_method(builder, "get", "(Ljava/lang/Object;)Ljava/lang/Object;");
    let builder = abstract_method(
        builder,
        "put",
        "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;",
    );
    let builder = abstract_method(builder, "containsKey", "(Ljava/lang/Object;)Z");
    abstract_method(builder, "keySet", "()Ljava/util/Set;")
}

fn set_interface() -> ClassBuilder {
    let builder = ClassBuilder::new(SET_CLASS).interface();
    let builder = abstract_method(builder, "size", "()I");
    abstract_method(builder, "toArray", "()[Ljava/lang/Object;")
}

/// Outcome of a key lookup in a map body
enum MapLookup {
    /// The key is not in the map
    Absent,
    /// The key maps to this value (possibly null)
    Present(Option<ObjId>),
    /// The lookup raised (null key)
    Thrown,
}

fn map_lookup(env: &SandboxEnv, map: RawHandle, key: Option<RawHandle>) -> MapLookup {
    let Some(key) = key else {
        env.throw_named(NULL_POINTER_CLASS, "null key");
        return MapLookup::Thrown;
    };
    let (map, key) = (env.resolve(map), env.resolve(key));
    let found = env.with_heap(|heap| match &heap.get(map).body {
        Body::Map(entries) => entries
            .iter()
            .find(|(k, _)| heap.same_key(*k, key))
            .map(|(_, v)| *v),
        _ => panic!("map operation on a non-map"),
    });
    match found {
        Some(value) => MapLookup::Present(value),
        None => MapLookup::Absent,
    }
}

fn hash_map() -> ClassBuilder {
    ClassBuilder::new(HASH_MAP_CLASS)
        .implements(MAP_CLASS)
        .allocator(|| Body::Map(Vec::new()))
        .constructor("()V", |_, _| void())
        .method("size", "()I", |env, inv| {
            let this = env.resolve(inv.receiver());
            let len = env.with_heap(|heap| match &heap.get(this).body {
                Body::Map(entries) => entries.len(),
                _ => 0,
            });
            VmValue::Int(len as i32)
        })
        .method("get", "(Ljava/lang/Object;)Ljava/lang/Object;", |env, inv| {
            match map_lookup(env, inv.receiver(), inv.object(0)) {
                MapLookup::Present(Some(value)) => VmValue::Object(Some(env.local(value))),
                MapLookup::Present(None) | MapLookup::Absent | MapLookup::Thrown => VmValue::NULL,
            }
        })
        .method("containsKey", "(Ljava/lang/Object;)Z", |env, inv| {
            VmValue::from_bool(matches!(map_lookup(env, inv.receiver(), inv.object(0)), MapLookup::Present(_)))
        })
        .method(
            "put",
            "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;",
            |env, inv| {
                let Some(key) = inv.object(0) else {
                    env.throw_named(NULL_POINTER_CLASS, "null key");
                    return VmValue::NULL;
                };
                let (map, key) = (env.resolve(inv.receiver()), env.resolve(key));
                let value = inv.object(1).map(|v| env.resolve(v));
                let previous = env.with_heap(|heap| {
                    let position = match &heap.get(map).body {
                        Body::Map(entries) => entries.iter().position(|(k, _)| heap.same_key(*k, key)),
                        _ => panic!("put on a non-map"),
                    };
                    match &mut heap.get_mut(map).body {
                        Body::Map(entries) => match position {
                            Some(i) => std::mem::replace(&mut entries[i].1, value),
                            None => {
                                entries.push((key, value));
                                None
                            }
                        },
                        _ => None,
                    }
                });
                VmValue::Object(previous.map(|p| env.local(p)))
            },
        )
        .method("keySet", "()Ljava/util/Set;", |env, inv| {
            let this = env.resolve(inv.receiver());
            let keys = env.with_heap(|heap| match &heap.get(this).body {
                Body::Map(entries) => entries.iter().map(|(k, _)| Some(*k)).collect(),
                _ => Vec::new(),
            });
            VmValue::Object(Some(env.alloc(KEY_SET_CLASS, Body::Objects(keys))))
        })
}

fn key_set() -> ClassBuilder {
    ClassBuilder::new(KEY_SET_CLASS)
        .implements(SET_CLASS)
        .allocator(|| Body::Objects(Vec::new()))
        .method("size", "()I", |env, inv| VmValue::Int(env.array_length(inv.receiver()) as i32))
        .method("toArray", "()[Ljava/lang/Object;", |env, inv| {
            let this = env.resolve(inv.receiver());
            let keys = env.with_heap(|heap| match &heap.get(this).body {
                Body::Objects(keys) => keys.clone(),
                _ => Vec::new(),
            });
            let Some(object) = env.find_class(OBJECT_CLASS) else {
                return VmValue::NULL;
            };
            let Some(array) = env.new_object_array(keys.len(), object) else {
                return VmValue::NULL;
            };
            for (i, key) in keys.into_iter().enumerate() {
                env.set_object_array_element(array, i, key.map(|k| env.local(k)));
            }
            VmValue::Object(Some(array))
        })
}

/// Built-in classes in definition order
pub(crate) fn classes() -> Vec<ClassBuilder> {
    let mut classes = vec![
        object(),
        class(),
        string_class(),
        throwable_root(),
        throwable(EXCEPTION_CLASS, THROWABLE_CLASS),
        throwable(RUNTIME_EXCEPTION_CLASS, EXCEPTION_CLASS),
        throwable(ERROR_CLASS, THROWABLE_CLASS),
    ];
    for name in [NO_CLASS_DEF_CLASS, NO_SUCH_METHOD_CLASS, NO_SUCH_FIELD_CLASS] {
        classes.push(throwable(name, ERROR_CLASS));
    }
    for name in [
        ILLEGAL_ARGUMENT_CLASS,
        ILLEGAL_STATE_CLASS,
        NULL_POINTER_CLASS,
        ARRAY_INDEX_CLASS,
        CLASS_CAST_CLASS,
    ] {
        classes.push(throwable(name, RUNTIME_EXCEPTION_CLASS));
    }
    classes.push(bridge_exception());
    for (name, descriptor, getter) in BOXES {
        classes.push(boxed(name, descriptor, getter));
    }
    classes.extend([map_interface(), set_interface(), hash_map(), key_set()]);
    classes
}
