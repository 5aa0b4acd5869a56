//! Integration tests for the sandbox VM

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kopi_sdk::{HandleKind, ValueKind, VmEnv, VmRuntime, VmValue};
use kopi_vm::builtins::{BRIDGE_EXCEPTION_CLASS, NO_SUCH_METHOD_CLASS};
use kopi_vm::{ClassBuilder, SandboxVm};

fn vm_with_env() -> (SandboxVm, std::rc::Rc<dyn VmEnv>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let vm = SandboxVm::new();
    let env = vm.attach_current_thread().unwrap();
    (vm, env)
}

fn define_animals(vm: &SandboxVm) {
    vm.define_class(
        ClassBuilder::new("zoo/Animal")
            .field("legs", "I")
            .constructor("()V", |_, _| VmValue::Void)
            .method("sound", "()Ljava/lang/String;", |env, _| {
                VmValue::Object(env.new_string("..."))
            })
            .static_field("count", "J"),
    )
    .unwrap();
    vm.define_class(
        ClassBuilder::new("zoo/Dog")
            .extends("zoo/Animal")
            .constructor("()V", |_, _| VmValue::Void)
            .method("sound", "()Ljava/lang/String;", |env, _| {
                VmValue::Object(env.new_string("woof"))
            }),
    )
    .unwrap();
}

#[test]
fn test_virtual_dispatch_and_fields() {
    let (vm, env) = vm_with_env();
    define_animals(&vm);

    let animal = env.find_class("zoo/Animal").unwrap();
    let dog_class = env.find_class("zoo/Dog").unwrap();
    let ctor = env.get_method_id(dog_class, "<init>", "()V").unwrap();
    let dog = env.new_object(dog_class, ctor, &[]).unwrap();
    assert!(env.is_instance_of(dog, animal));

    // Resolved on the superclass, dispatched to the override
    let sound = env.get_method_id(animal, "sound", "()Ljava/lang/String;").unwrap();
    let result = env.call_method(dog, sound, ValueKind::Object, &[]);
    let text = env.string_utf(result.as_object().flatten().unwrap()).unwrap();
    assert_eq!(text, "woof");

    let legs = env.get_field_id(dog_class, "legs", "I").unwrap();
    env.set_field(dog, legs, VmValue::Int(4));
    assert_eq!(env.get_field(dog, legs, ValueKind::Int), VmValue::Int(4));

    let count = env.get_static_field_id(animal, "count", "J").unwrap();
    env.set_static_field(animal, count, VmValue::Long(2));
    assert_eq!(env.get_static_field(dog_class, count, ValueKind::Long), VmValue::Long(2));
    drop(env);
    vm.detach_current_thread().unwrap();
}

#[test]
fn test_missing_members_raise() {
    let (vm, env) = vm_with_env();
    let object = env.find_class("java/lang/Object").unwrap();

    assert!(env.get_method_id(object, "nope", "()V").is_none());
    let exc = env.exception_occurred().unwrap();
    env.exception_clear();
    let expected = env.find_class(NO_SUCH_METHOD_CLASS).unwrap();
    assert!(env.is_instance_of(exc, expected));

    assert!(env.find_class("no/Such").is_none());
    assert!(env.exception_check());
    env.exception_clear();
    assert!(vm.stats().exceptions_thrown >= 2);
}

#[test]
fn test_exceptions_from_bodies_zero_the_result() {
    let (vm, env) = vm_with_env();
    vm.define_class(ClassBuilder::new("t/Fails").static_method("boom", "(I)I", |env, inv| {
        env.throw_named("java/lang/IllegalStateException", &format!("bad {:?}", inv.args[0]));
        VmValue::Int(99)
    }))
    .unwrap();

    let class = env.find_class("t/Fails").unwrap();
    let boom = env.get_static_method_id(class, "boom", "(I)I").unwrap();
    let result = env.call_static_method(class, boom, ValueKind::Int, &[VmValue::Int(1)]);
    assert_eq!(result, VmValue::Int(0));
    assert!(env.exception_check());

    let exc = env.exception_occurred().unwrap();
    env.exception_clear();
    let throwable = env.find_class("java/lang/Throwable").unwrap();
    let get_message = env.get_method_id(throwable, "getMessage", "()Ljava/lang/String;").unwrap();
    let message = env.call_method(exc, get_message, ValueKind::Object, &[]);
    assert_eq!(env.string_utf(message.as_object().flatten().unwrap()).unwrap(), "bad Int(1)");
}

#[test]
fn test_bridge_exception_payload_roundtrip() {
    let (_vm, env) = vm_with_env();
    let class = env.find_class(BRIDGE_EXCEPTION_CLASS).unwrap();
    let from_bytes = env
        .get_static_method_id(class, "fromBytes", "([B)Ldev/kopi/BridgeException;")
        .unwrap();
    let bytes = env.new_byte_array(b"{\"code\":\"x\"}").unwrap();
    let exc = env.call_static_method(class, from_bytes, ValueKind::Object, &[VmValue::Object(Some(bytes))]);
    let exc = exc.as_object().flatten().unwrap();

    let to_bytes = env.get_method_id(class, "toBytes", "()[B").unwrap();
    let payload = env.call_method(exc, to_bytes, ValueKind::Object, &[]);
    let payload = env.byte_array_elements(payload.as_object().flatten().unwrap()).unwrap();
    assert_eq!(payload, b"{\"code\":\"x\"}");

    let runtime_exception = env.find_class("java/lang/RuntimeException").unwrap();
    assert!(env.is_instance_of(exc, runtime_exception));
}

#[test]
fn test_hash_map_key_set() {
    let (_vm, env) = vm_with_env();
    let class = env.find_class("java/util/HashMap").unwrap();
    let ctor = env.get_method_id(class, "<init>", "()V").unwrap();
    let map = env.new_object(class, ctor, &[]).unwrap();
    let map_iface = env.find_class("java/util/Map").unwrap();
    let put = env
        .get_method_id(map_iface, "put", "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;")
        .unwrap();
    let get = env.get_method_id(map_iface, "get", "(Ljava/lang/Object;)Ljava/lang/Object;").unwrap();

    for (k, v) in [("a", "1"), ("b", "2"), ("a", "3")] {
        let key = env.new_string(k);
        let value = env.new_string(v);
        env.call_method(map, put, ValueKind::Object, &[VmValue::Object(key), VmValue::Object(value)]);
    }

    let lookup = env.new_string("a");
    let found = env.call_method(map, get, ValueKind::Object, &[VmValue::Object(lookup)]);
    assert_eq!(env.string_utf(found.as_object().flatten().unwrap()).unwrap(), "3");

    let key_set = env.get_method_id(map_iface, "keySet", "()Ljava/util/Set;").unwrap();
    let keys = env.call_method(map, key_set, ValueKind::Object, &[]).as_object().flatten().unwrap();
    let set = env.find_class("java/util/Set").unwrap();
    let to_array = env.get_method_id(set, "toArray", "()[Ljava/lang/Object;").unwrap();
    let array = env.call_method(keys, to_array, ValueKind::Object, &[]).as_object().flatten().unwrap();
    assert_eq!(env.array_length(array), 2);
    let first = env.object_array_element(array, 0).unwrap();
    assert_eq!(env.string_utf(first).unwrap(), "a");

    assert!(env.object_array_element(array, 5).is_none());
    assert!(env.exception_check());
    env.exception_clear();
}

#[test]
fn test_local_frames() {
    let (_vm, env) = vm_with_env();
    env.push_local_frame(8).unwrap();
    let inner = env.new_string("kept").unwrap();
    let dropped = env.new_string("dropped").unwrap();
    let carried = env.pop_local_frame(Some(inner)).unwrap();

    assert_eq!(env.ref_kind(carried), HandleKind::Transient);
    assert_eq!(env.ref_kind(inner), HandleKind::Invalid);
    assert_eq!(env.ref_kind(dropped), HandleKind::Invalid);
    assert_eq!(env.string_utf(carried).unwrap(), "kept");

    assert!(env.push_local_frame(usize::MAX).is_err());
}

#[test]
#[should_panic(expected = "stale local handle")]
fn test_stale_local_panics() {
    let (_vm, env) = vm_with_env();
    env.push_local_frame(4).unwrap();
    let s = env.new_string("gone").unwrap();
    env.pop_local_frame(None);
    env.string_utf(s);
}

#[test]
#[should_panic(expected = "pending exception")]
fn test_call_with_pending_exception_panics() {
    let (_vm, env) = vm_with_env();
    env.find_class("no/Such");
    env.new_string("not allowed");
}

#[test]
#[should_panic(expected = "outside the thread")]
fn test_local_from_other_thread_panics() {
    let (vm, env) = vm_with_env();
    let s = env.new_string("mine").unwrap();
    let remote = vm.clone();
    let joined = std::thread::spawn(move || {
        let env = remote.attach_current_thread().unwrap();
        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            env.string_utf(s);
        }));
        drop(env);
        remote.detach_current_thread().unwrap();
        caught
    })
    .join()
    .unwrap();
    if let Err(panic) = joined {
        std::panic::resume_unwind(panic);
    }
}

#[test]
fn test_native_bodies_see_the_calling_env() {
    let (vm, env) = vm_with_env();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    vm.define_class(
        ClassBuilder::new("t/Echo").static_method(
            "echo",
            "(Ljava/lang/String;)Ljava/lang/String;",
            move |env, inv| {
                counter.fetch_add(1, Ordering::SeqCst);
                let text = env.string_utf(inv.object(0).unwrap()).unwrap();
                VmValue::Object(env.new_string(&text.to_uppercase()))
            },
        ),
    )
    .unwrap();

    let class = env.find_class("t/Echo").unwrap();
    let echo = env
        .get_static_method_id(class, "echo", "(Ljava/lang/String;)Ljava/lang/String;")
        .unwrap();
    let arg = env.new_string("hi");
    let out = env.call_static_method(class, echo, ValueKind::Object, &[VmValue::Object(arg)]);
    assert_eq!(env.string_utf(out.as_object().flatten().unwrap()).unwrap(), "HI");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(vm.stats().invocations, 1);
}
