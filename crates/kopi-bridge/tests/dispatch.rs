//! Call dispatcher integration tests
//!
//! Every test runs against a fresh sandbox VM with the fixture classes from
//! `common`.

mod common;

use std::panic::{catch_unwind, AssertUnwindSafe};

use common::{setup, CALC};
use kopi_bridge::{Error, Scope, Signature, SymbolKind, Value};
use kopi_sdk::VmValue;
use kopi_vm::{ClassBuilder, SandboxVm};

#[test]
fn test_primitive_roundtrips() {
    let (_vm, bridge) = setup();
    let scope = bridge.scope().unwrap();
    let calc = scope.new_object(CALC, &[], &[]).unwrap();

    for b in [true, false] {
        let echoed = scope
            .call_method(calc, "echoBool", &[Signature::Boolean], &Signature::Boolean, &[Value::Boolean(b)])
            .unwrap();
        assert!(matches!(echoed, Value::Boolean(v) if v == b));
    }

    let sum: i32 = scope
        .call(calc, "add", &[Signature::Int, Signature::Int], &Signature::Int, &[Value::Int(40), Value::Int(2)])
        .unwrap();
    assert_eq!(sum, 42);

    let mixed: f32 = scope
        .call(
            calc,
            "mix",
            &[Signature::Char, Signature::Byte, Signature::Short],
            &Signature::Float,
            &[Value::Char(1), Value::Byte(-2), Value::Short(300)],
        )
        .unwrap();
    assert_eq!(mixed, 299.0);

    let scaled: f64 = scope
        .call(
            calc,
            "scale",
            &[Signature::Long, Signature::Double],
            &Signature::Double,
            &[Value::Long(1 << 40), Value::Double(0.5)],
        )
        .unwrap();
    assert_eq!(scaled, (1u64 << 39) as f64);
}

#[test]
fn test_strings_and_arrays() {
    let (_vm, bridge) = setup();
    let scope = bridge.scope().unwrap();
    let calc = scope.new_object(CALC, &[], &[]).unwrap();
    let string = Signature::string();

    let greeting: String = scope
        .call(calc, "greet", &[string.clone()], &string, &[Value::String("kopi".into())])
        .unwrap();
    assert_eq!(greeting, "hello, kopi");

    let reversed: Vec<u8> = scope
        .call(calc, "reverse", &[Signature::bytes()], &Signature::bytes(), &[Value::Bytes(vec![1, 2, 3])])
        .unwrap();
    assert_eq!(reversed, vec![3, 2, 1]);

    let joined: String = scope
        .call(
            calc,
            "join",
            &[Signature::strings()],
            &string,
            &[Value::Strings(vec!["a".into(), "b".into(), "c".into()])],
        )
        .unwrap();
    assert_eq!(joined, "a,b,c");

    let parts: Vec<String> = scope
        .call(calc, "split", &[string.clone()], &Signature::strings(), &[Value::String("x,y".into())])
        .unwrap();
    assert_eq!(parts, vec!["x".to_string(), "y".to_string()]);

    let nothing = scope
        .call_object_method(calc, "nothing", &[], &Signature::object(), &[])
        .unwrap();
    assert!(nothing.is_null());
}

#[test]
fn test_null_string_array_element_is_conversion_error() {
    let (_vm, bridge) = setup();
    let scope = bridge.scope().unwrap();
    let calc = scope.new_object(CALC, &[], &[]).unwrap();

    let err = scope
        .call_method(
            calc,
            "split",
            &[Signature::string()],
            &Signature::strings(),
            &[Value::String("a,-,c".into())],
        )
        .unwrap_err();
    assert_eq!(
        err,
        Error::Conversion {
            index: 1,
            received: "null".into(),
            expected: Signature::string(),
        }
    );
}

#[test]
fn test_boolean_compares_against_true_sentinel() {
    let (_vm, bridge) = setup();
    let scope = bridge.scope().unwrap();
    let calc = scope.new_object(CALC, &[], &[]).unwrap();

    // The method returns the raw byte 2, which is not the VM's true
    assert!(!scope.call_boolean_method(calc, "weird", &[], &[]).unwrap());
}

#[test]
fn test_argument_count_checked_before_vm() {
    let (vm, bridge) = setup();
    let scope = bridge.scope().unwrap();
    let calc = scope.new_object(CALC, &[], &[]).unwrap();

    let before = vm.stats().env_calls;
    let err = scope
        .call_method(calc, "add", &[Signature::Int, Signature::Int], &Signature::Int, &[Value::Int(1)])
        .unwrap_err();
    assert_eq!(err, Error::ArgumentCount { expected: 2, got: 1 });

    let err = scope
        .call_static_method(CALC, "twice", &[Signature::Int], &Signature::Int, &[])
        .unwrap_err();
    assert_eq!(err, Error::ArgumentCount { expected: 1, got: 0 });
    assert_eq!(vm.stats().env_calls, before);
}

#[test]
fn test_object_call_with_primitive_return_is_fatal_before_vm() {
    let (vm, bridge) = setup();
    let scope = bridge.scope().unwrap();
    let calc = scope.new_object(CALC, &[], &[]).unwrap();

    let before = vm.stats().env_calls;
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let _ = scope.call_object_method(calc, "add", &[Signature::Int, Signature::Int], &Signature::Int, &[
            Value::Int(1),
            Value::Int(2),
        ]);
    }));
    let panic = outcome.unwrap_err();
    let message = panic.downcast_ref::<String>().cloned().unwrap_or_default();
    assert!(message.contains("kopi fatal error"), "{}", message);
    assert_eq!(vm.stats().env_calls, before);
}

#[test]
fn test_conversion_errors() {
    let (_vm, bridge) = setup();
    let scope = bridge.scope().unwrap();
    let calc = scope.new_object(CALC, &[], &[]).unwrap();

    // No implicit widening
    let err = scope
        .call_method(calc, "add", &[Signature::Int, Signature::Int], &Signature::Int, &[
            Value::Int(1),
            Value::Long(2),
        ])
        .unwrap_err();
    assert_eq!(
        err,
        Error::Conversion {
            index: 1,
            received: "Long(2)".into(),
            expected: Signature::Int,
        }
    );

    // Native values never cross as objects
    let native = Value::Native(std::sync::Arc::new(5u8));
    let err = scope
        .call_method(calc, "greet", &[Signature::string()], &Signature::string(), &[native])
        .unwrap_err();
    match err {
        Error::Conversion { index, received, .. } => {
            assert_eq!(index, 0);
            assert_eq!(received, "Native(..)");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_lookup_errors() {
    let (_vm, bridge) = setup();
    let scope = bridge.scope().unwrap();
    let calc = scope.new_object(CALC, &[], &[]).unwrap();

    let err = scope
        .call_method(calc, "add", &[Signature::Long], &Signature::Int, &[Value::Long(1)])
        .unwrap_err();
    assert_eq!(err, Error::lookup(SymbolKind::Method, "add", "(J)I"));

    let err = scope.new_object("test.Missing", &[], &[]).unwrap_err();
    assert!(matches!(err, Error::Lookup { kind: SymbolKind::Class, .. }));

    // The scope is still usable after failed lookups
    let sum: i32 = scope
        .call(calc, "add", &[Signature::Int, Signature::Int], &Signature::Int, &[Value::Int(1), Value::Int(1)])
        .unwrap();
    assert_eq!(sum, 2);
}

#[test]
fn test_static_calls_and_cached_methods() {
    let (_vm, bridge) = setup();
    let scope = bridge.scope().unwrap();

    let doubled = scope
        .call_static_method(CALC, "twice", &[Signature::Int], &Signature::Int, &[Value::Int(21)])
        .unwrap();
    assert!(matches!(doubled, Value::Int(42)));

    let add = scope
        .method_ref(CALC, "add", &[Signature::Int, Signature::Int], &Signature::Int)
        .unwrap();
    assert_eq!(add.owner(), "test/Calc");
    assert_eq!(add.signature().to_string(), "(II)I");

    let calc = scope.new_object(CALC, &[], &[]).unwrap();
    let sum = scope.invoke(&add, Some(calc), &[Value::Int(2), Value::Int(3)]).unwrap();
    assert!(matches!(sum, Value::Int(5)));

    // Cached identifiers stay bound to the class they were resolved against
    let other = scope.new_object("test.Other", &[], &[]).unwrap();
    let err = scope.invoke(&add, Some(other), &[Value::Int(2), Value::Int(3)]).unwrap_err();
    assert!(matches!(err, Error::WrongOwner { ref owner, .. } if owner == "test.Calc"));

    let before = bridge.registry().method_count();
    scope
        .method_ref(CALC, "add", &[Signature::Int, Signature::Int], &Signature::Int)
        .unwrap();
    assert_eq!(bridge.registry().method_count(), before);
}

#[test]
fn test_fields() {
    let (_vm, bridge) = setup();
    let scope = bridge.scope().unwrap();
    let calc = scope.new_object(CALC, &[], &[]).unwrap();

    scope.set_field(calc, "total", &Signature::Int, &Value::Int(7)).unwrap();
    assert!(matches!(scope.get_field(calc, "total", &Signature::Int).unwrap(), Value::Int(7)));

    scope
        .set_field(calc, "label", &Signature::string(), &Value::String("seven".into()))
        .unwrap();
    let label: String = scope.get_field(calc, "label", &Signature::string()).unwrap().get().unwrap();
    assert_eq!(label, "seven");

    scope
        .set_static_field(CALC, "instances", &Signature::Long, &Value::Long(3))
        .unwrap();
    let instances: i64 = scope
        .get_static_field(CALC, "instances", &Signature::Long)
        .unwrap()
        .get()
        .unwrap();
    assert_eq!(instances, 3);

    let err = scope.get_field(calc, "missing", &Signature::Int).unwrap_err();
    assert_eq!(err, Error::lookup(SymbolKind::Field, "missing", "I"));
}

#[test]
fn test_map_entries_with_boxing() {
    let (_vm, bridge) = setup();
    let scope = bridge.scope().unwrap();
    let object = Signature::object();
    let map = scope.new_object("java.util.HashMap", &[], &[]).unwrap();

    for (key, count) in [("apples", 3), ("pears", 5)] {
        let key = scope.new_string(key).unwrap();
        let count = scope.box_value(&Value::Int(count)).unwrap().unwrap();
        scope
            .call_object_method(
                map,
                "put",
                &[object.clone(), object.clone()],
                &object,
                &[Value::Object(key), Value::Object(count)],
            )
            .unwrap();
    }
    assert!(scope.instance_of(map, "java.util.Map").unwrap());
    assert!(!scope.instance_of(map, "java.lang.String").unwrap());

    let entries = scope.map_entries(map, &Signature::string(), &Signature::Int).unwrap();
    let entries: Vec<(String, i32)> = entries
        .into_iter()
        .map(|(k, v)| (k.get().unwrap(), v.get().unwrap()))
        .collect();
    assert_eq!(entries, vec![("apples".to_string(), 3), ("pears".to_string(), 5)]);
}

/// Live local handles in the calling thread's frames
fn live_locals(scope: &Scope) -> i32 {
    scope
        .call_static_method("test.Frames", "liveLocals", &[], &Signature::Int, &[])
        .unwrap()
        .get()
        .unwrap()
}

fn define_frames(vm: &SandboxVm) {
    vm.define_class(
        ClassBuilder::new("test/Frames")
            .static_method("liveLocals", "()I", |env, _| VmValue::Int(env.live_locals() as i32)),
    )
    .unwrap();
}

#[test]
fn test_map_entries_release_decoded_locals() {
    let (vm, bridge) = setup();
    define_frames(&vm);
    let scope = bridge.scope().unwrap();
    let object = Signature::object();
    let map = scope.new_object("java.util.HashMap", &[], &[]).unwrap();

    for index in 0..200 {
        let key = scope.new_string(&format!("key-{}", index)).unwrap();
        let count = scope.box_value(&Value::Int(index)).unwrap().unwrap();
        scope
            .call_object_method(
                map,
                "put",
                &[object.clone(), object.clone()],
                &object,
                &[Value::Object(key), Value::Object(count)],
            )
            .unwrap();
        scope.delete_local(key);
        scope.delete_local(count);
    }
    // Warm the method cache before measuring
    scope.map_entries(map, &Signature::string(), &Signature::Int).unwrap();
    live_locals(&scope);

    let before = live_locals(&scope);
    let entries = scope.map_entries(map, &Signature::string(), &Signature::Int).unwrap();
    assert_eq!(entries.len(), 200);
    assert_eq!(live_locals(&scope), before);

    // Object-typed entries stay alive for the caller
    let entries = scope.map_entries(map, &Signature::string(), &object).unwrap();
    assert_eq!(live_locals(&scope), before + 200);
    let total: i32 = entries
        .into_iter()
        .map(|(_, value)| scope.unbox_value(value.as_handle().unwrap(), &Signature::Int).unwrap().get::<i32>().unwrap())
        .sum();
    assert_eq!(total, (0..200).sum::<i32>());
}
