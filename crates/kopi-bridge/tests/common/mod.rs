//! Shared fixtures for the bridge integration tests

#![allow(dead_code)]

use std::sync::Arc;

use kopi_bridge::{Bridge, BridgeConfig};
use kopi_sdk::{RawHandle, VmEnv, VmValue};
use kopi_vm::builtins::{BRIDGE_EXCEPTION_CLASS, ILLEGAL_ARGUMENT_CLASS, ILLEGAL_STATE_CLASS, STRING_CLASS};
use kopi_vm::{ClassBuilder, SandboxEnv, SandboxVm};

pub const CALC: &str = "test.Calc";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A sandbox with the fixture classes and a bridge on top of it
pub fn setup() -> (SandboxVm, Bridge) {
    setup_with(BridgeConfig::default())
}

pub fn setup_with(config: BridgeConfig) -> (SandboxVm, Bridge) {
    init_logging();
    let vm = SandboxVm::new();
    define_calc(&vm);
    let bridge = Bridge::with_config(Arc::new(vm.clone()), config).unwrap();
    (vm, bridge)
}

fn text(env: &SandboxEnv, handle: Option<RawHandle>) -> String {
    handle.and_then(|h| env.string_utf(h)).unwrap_or_else(|| "<null>".to_string())
}

fn string(env: &SandboxEnv, s: &str) -> VmValue {
    VmValue::Object(env.new_string(s))
}

fn define_calc(vm: &SandboxVm) {
    vm.define_class(
        ClassBuilder::new("test/Calc")
            .field("total", "I")
            .field("label", "Ljava/lang/String;")
            .static_field("instances", "J")
            .constructor("()V", |_, _| VmValue::Void)
            .method("echoBool", "(Z)Z", |_, inv| inv.args[0])
            .method("mix", "(CBS)F", |_, inv| match inv.args {
                [VmValue::Char(c), VmValue::Byte(b), VmValue::Short(s)] => {
                    VmValue::Float(*c as f32 + *b as f32 + *s as f32)
                }
                _ => VmValue::Float(f32::NAN),
            })
            .method("add", "(II)I", |_, inv| match inv.args {
                [VmValue::Int(a), VmValue::Int(b)] => VmValue::Int(a.wrapping_add(*b)),
                _ => VmValue::Int(-1),
            })
            .method("scale", "(JD)D", |_, inv| match inv.args {
                [VmValue::Long(a), VmValue::Double(b)] => VmValue::Double(*a as f64 * b),
                _ => VmValue::Double(f64::NAN),
            })
            .method("greet", "(Ljava/lang/String;)Ljava/lang/String;", |env, inv| {
                string(env, &format!("hello, {}", text(env, inv.object(0))))
            })
            .method("reverse", "([B)[B", |env, inv| {
                let mut bytes = inv.object(0).and_then(|b| env.byte_array_elements(b)).unwrap_or_default();
                bytes.reverse();
                VmValue::Object(env.new_byte_array(&bytes))
            })
            .method("join", "([Ljava/lang/String;)Ljava/lang/String;", |env, inv| {
                let Some(array) = inv.object(0) else {
                    return string(env, "<null>");
                };
                let parts: Vec<String> = (0..env.array_length(array))
                    .map(|i| text(env, env.object_array_element(array, i)))
                    .collect();
                string(env, &parts.join(","))
            })
            .method("split", "(Ljava/lang/String;)[Ljava/lang/String;", |env, inv| {
                let source = text(env, inv.object(0));
                let parts: Vec<&str> = source.split(',').collect();
                let Some(class) = env.find_class(STRING_CLASS) else {
                    return VmValue::NULL;
                };
                let Some(array) = env.new_object_array(parts.len(), class) else {
                    return VmValue::NULL;
                };
                for (i, part) in parts.iter().enumerate() {
                    // "-" marks a hole
                    let element = if *part == "-" { None } else { env.new_string(part) };
                    env.set_object_array_element(array, i, element);
                }
                VmValue::Object(Some(array))
            })
            .method("weird", "()Z", |_, _| VmValue::Boolean(2))
            .method("nothing", "()Ljava/lang/Object;", |_, _| VmValue::NULL)
            .method("fail", "(Ljava/lang/String;)V", |env, inv| {
                env.throw_named(ILLEGAL_STATE_CLASS, &text(env, inv.object(0)));
                VmValue::Void
            })
            .method("failSilently", "()V", |env, _| {
                let class = env.find_class(ILLEGAL_ARGUMENT_CLASS).unwrap();
                let ctor = env.get_method_id(class, "<init>", "()V").unwrap();
                let exc = env.new_object(class, ctor, &[]).unwrap();
                env.throw(exc);
                VmValue::Void
            })
            .method("failStructured", "(Ljava/lang/String;)V", |env, inv| {
                let payload = format!(
                    "{{\"code\":\"calc.rejected\",\"message\":\"{}\",\"details\":{{\"operand\":\"x\"}}}}",
                    text(env, inv.object(0))
                );
                let class = env.find_class(BRIDGE_EXCEPTION_CLASS).unwrap();
                let ctor = env.get_method_id(class, "<init>", "([B)V").unwrap();
                let bytes = env.new_byte_array(payload.as_bytes());
                let exc = env.new_object(class, ctor, &[VmValue::Object(bytes)]).unwrap();
                env.throw(exc);
                VmValue::Void
            })
            .static_method("twice", "(I)I", |_, inv| match inv.args {
                [VmValue::Int(v)] => VmValue::Int(v * 2),
                _ => VmValue::Int(-1),
            }),
    )
    .unwrap();

    vm.define_class(
        ClassBuilder::new("test/Other")
            .constructor("()V", |_, _| VmValue::Void)
            .method("add", "(II)I", |_, _| VmValue::Int(0)),
    )
    .unwrap();
}
