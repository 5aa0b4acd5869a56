//! Exception bridge integration tests

mod common;

use common::{setup, CALC};
use kopi_bridge::{Error, Signature, StructuredError, Value};
use kopi_sdk::{VmEnv, VmValue};
use kopi_vm::builtins::{BRIDGE_EXCEPTION_CLASS, ILLEGAL_STATE_CLASS, RUNTIME_EXCEPTION_CLASS};
use kopi_vm::{ClassBuilder, SandboxVm};

const THROWER: &str = "test.Thrower";

/// A throwable whose `getMessage` itself throws, and a class that raises it
/// or a structured exception with an undecodable payload
fn define_thrower(vm: &SandboxVm) {
    vm.define_class(
        ClassBuilder::new("test/Bad")
            .extends(RUNTIME_EXCEPTION_CLASS)
            .constructor("()V", |_, _| VmValue::Void)
            .method("getMessage", "()Ljava/lang/String;", |env, _| {
                env.throw_named(ILLEGAL_STATE_CLASS, "message is broken");
                VmValue::NULL
            }),
    )
    .unwrap();
    vm.define_class(
        ClassBuilder::new("test/Thrower")
            .constructor("()V", |_, _| VmValue::Void)
            .method("throwBad", "()V", |env, _| {
                let class = env.find_class("test/Bad").unwrap();
                let ctor = env.get_method_id(class, "<init>", "()V").unwrap();
                let exc = env.new_object(class, ctor, &[]).unwrap();
                env.throw(exc);
                VmValue::Void
            })
            .method("throwGarbled", "()V", |env, _| {
                let class = env.find_class(BRIDGE_EXCEPTION_CLASS).unwrap();
                let ctor = env.get_method_id(class, "<init>", "([B)V").unwrap();
                let payload = env.new_byte_array(b"{not json");
                let exc = env.new_object(class, ctor, &[VmValue::Object(payload)]).unwrap();
                env.throw(exc);
                VmValue::Void
            }),
    )
    .unwrap();
}

#[test]
fn test_vm_exception_becomes_error() {
    let (_vm, bridge) = setup();
    let scope = bridge.scope().unwrap();
    let calc = scope.new_object(CALC, &[], &[]).unwrap();

    let err = scope
        .call_void_method(calc, "fail", &[Signature::string()], &[Value::String("closed".into())])
        .unwrap_err();
    assert_eq!(
        err,
        Error::Vm {
            class: "java.lang.IllegalStateException".into(),
            message: "closed".into(),
        }
    );
    assert!(!scope.env().exception_check());
}

#[test]
fn test_null_message_becomes_empty() {
    let (_vm, bridge) = setup();
    let scope = bridge.scope().unwrap();
    let calc = scope.new_object(CALC, &[], &[]).unwrap();

    let err = scope.call_void_method(calc, "failSilently", &[], &[]).unwrap_err();
    assert_eq!(
        err,
        Error::Vm {
            class: "java.lang.IllegalArgumentException".into(),
            message: String::new(),
        }
    );
}

#[test]
fn test_structured_exception_is_decoded() {
    let (_vm, bridge) = setup();
    let scope = bridge.scope().unwrap();
    let calc = scope.new_object(CALC, &[], &[]).unwrap();

    let err = scope
        .call_void_method(calc, "failStructured", &[Signature::string()], &[Value::String("negative".into())])
        .unwrap_err();
    let expected = StructuredError::new("calc.rejected", "negative").with_detail("operand", "x");
    assert_eq!(err, Error::Structured(expected));
}

#[test]
fn test_raise_roundtrips_through_vm() {
    let (_vm, bridge) = setup();
    let scope = bridge.scope().unwrap();

    let original = Error::Vm {
        class: "java.io.IOException".into(),
        message: "disk full".into(),
    };
    scope.raise(&original);
    assert!(scope.env().exception_check());

    let caught = scope.take_pending().unwrap();
    assert_eq!(caught, Error::Structured(original.to_structured()));
    assert!(!scope.env().exception_check());
    assert!(scope.take_pending().is_none());

    let structured = StructuredError::new("app.denied", "no access");
    scope.raise(&Error::Structured(structured.clone()));
    assert_eq!(scope.take_pending(), Some(Error::Structured(structured)));
}

#[test]
fn test_structured_values_cross_as_arguments() {
    let (_vm, bridge) = setup();
    let scope = bridge.scope().unwrap();

    let error = StructuredError::new("app.timeout", "took too long").with_detail("ms", "500");
    let handle = scope.new_error(&error).unwrap();
    assert!(scope.instance_of(handle, "java.lang.RuntimeException").unwrap());
    assert_eq!(scope.error_value(handle).unwrap(), error);

    let message: String = scope
        .call(handle, "getMessage", &[], &Signature::string(), &[])
        .unwrap();
    assert!(message.starts_with("structured error"));
}

#[test]
fn test_failing_message_degrades_to_placeholder() {
    let (vm, bridge) = setup();
    define_thrower(&vm);
    let scope = bridge.scope().unwrap();
    let thrower = scope.new_object(THROWER, &[], &[]).unwrap();

    let err = scope.call_void_method(thrower, "throwBad", &[], &[]).unwrap_err();
    assert_eq!(
        err,
        Error::Vm {
            class: "test.Bad".into(),
            message: "<message unavailable>".into(),
        }
    );
    assert!(!scope.env().exception_check());

    // Still usable afterwards
    let calc = scope.new_object(CALC, &[], &[]).unwrap();
    let sum: i32 = scope
        .call(calc, "add", &[Signature::Int, Signature::Int], &Signature::Int, &[Value::Int(2), Value::Int(2)])
        .unwrap();
    assert_eq!(sum, 4);
}

#[test]
fn test_undecodable_payload_is_codec_error() {
    let (vm, bridge) = setup();
    define_thrower(&vm);
    let scope = bridge.scope().unwrap();
    let thrower = scope.new_object(THROWER, &[], &[]).unwrap();

    let err = scope.call_void_method(thrower, "throwGarbled", &[], &[]).unwrap_err();
    assert!(matches!(err, Error::Codec(_)), "{:?}", err);
    assert!(!scope.env().exception_check());
}
