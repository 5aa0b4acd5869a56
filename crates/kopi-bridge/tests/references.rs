//! Reference lifetimes: transient handles, durable handles and pins

mod common;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use common::{setup, CALC};
use kopi_bridge::{Bridge, Signature, Value};
use kopi_sdk::HandleKind;

/// Resolve the fixture class once so its cached global does not show up in
/// the counters a test compares
fn warm_class_cache(bridge: &Bridge) {
    bridge
        .with_scope(|scope| scope.new_object(CALC, &[], &[]).map(|_| ()))
        .unwrap();
}

#[test]
fn test_promote_and_release() {
    let (vm, bridge) = setup();
    warm_class_cache(&bridge);
    let before = vm.stats();

    let durable = bridge
        .with_scope(|scope| {
            let calc = scope.new_object(CALC, &[], &[])?;
            assert_eq!(scope.handle_kind(calc), HandleKind::Transient);
            scope.promote(calc)
        })
        .unwrap();
    assert_eq!(vm.stats().live_globals, before.live_globals + 1);

    // Outlives the scope that created it
    {
        let scope = bridge.scope().unwrap();
        let calc = durable.bind(&scope);
        assert_eq!(scope.handle_kind(calc), HandleKind::Durable);
        let sum: i32 = scope
            .call(calc, "add", &[Signature::Int, Signature::Int], &Signature::Int, &[Value::Int(1), Value::Int(2)])
            .unwrap();
        assert_eq!(sum, 3);
    }

    durable.release();
    let after = vm.stats();
    assert_eq!(after.live_globals, before.live_globals);
    assert_eq!(after.globals_created - before.globals_created, 1);
    assert_eq!(after.globals_released - before.globals_released, 1);
}

#[test]
fn test_drop_releases_once() {
    let (vm, bridge) = setup();
    warm_class_cache(&bridge);
    let before = vm.stats();
    {
        let scope = bridge.scope().unwrap();
        let calc = scope.new_object(CALC, &[], &[]).unwrap();
        let _durable = scope.promote(calc).unwrap();
    }
    let after = vm.stats();
    assert_eq!(after.globals_created - before.globals_created, 1);
    assert_eq!(after.globals_released - before.globals_released, 1);
}

#[test]
fn test_durable_crosses_threads() {
    let (_vm, bridge) = setup();
    let durable = bridge
        .with_scope(|scope| {
            let calc = scope.new_object(CALC, &[], &[])?;
            scope.set_field(calc, "total", &Signature::Int, &Value::Int(11))?;
            scope.promote(calc)
        })
        .map(Arc::new)
        .unwrap();

    let worker = {
        let bridge = bridge.clone();
        let durable = Arc::clone(&durable);
        thread::spawn(move || {
            bridge.with_scope(|scope| scope.get_field(durable.bind(scope), "total", &Signature::Int)?.get::<i32>())
        })
    };
    assert_eq!(worker.join().unwrap().unwrap(), 11);
}

#[test]
fn test_duplicate_and_identity() {
    let (_vm, bridge) = setup();
    let scope = bridge.scope().unwrap();
    let calc = scope.new_object(CALC, &[], &[]).unwrap();
    let other = scope.new_object(CALC, &[], &[]).unwrap();

    let copy = scope.duplicate(calc).unwrap();
    assert_ne!(copy, calc);
    assert!(scope.is_same_object(Some(copy), Some(calc)));
    assert!(!scope.is_same_object(Some(other), Some(calc)));
    assert!(scope.is_same_object(None, None));
    assert!(!scope.is_same_object(Some(calc), None));

    scope.delete_local(copy);
    assert_eq!(scope.handle_kind(calc), HandleKind::Transient);
}

#[test]
fn test_nested_scopes_reuse_attachment() {
    let (vm, bridge) = setup();
    let outer = bridge.scope().unwrap();
    let calc = outer.new_object(CALC, &[], &[]).unwrap();
    {
        let inner = bridge.scope().unwrap();
        let local = inner.new_string("inner").unwrap();
        assert_eq!(inner.handle_kind(local), HandleKind::Transient);
    }
    // The outer frame survives the inner one
    assert_eq!(outer.handle_kind(calc), HandleKind::Transient);
    drop(outer);
    assert_eq!(vm.stats().attached_threads, 0);
}

#[test]
fn test_pins_count_and_unpin() {
    let (_vm, bridge) = setup();
    let pins = bridge.pins();
    let payload = Arc::new(String::from("pinned"));

    let key = pins.pin(&payload);
    assert_eq!(pins.pin(&payload), key);
    assert_eq!(pins.count(key), 2);
    assert_eq!(*pins.get_as::<String>(key), "pinned");

    pins.unpin(key);
    assert_eq!(pins.count(key), 1);
    pins.unpin_value(&payload);
    assert!(pins.is_empty());
    assert!(pins.get(key).is_none());
}

#[test]
fn test_out_of_order_scope_end_is_fatal() {
    let (vm, bridge) = setup();
    let outer = bridge.scope().unwrap();
    let inner = bridge.scope().unwrap();
    let text = inner.new_string("inner").unwrap();

    let outcome = catch_unwind(AssertUnwindSafe(move || drop(outer)));
    let panic = outcome.unwrap_err();
    let message = panic.downcast_ref::<String>().cloned().unwrap_or_default();
    assert!(message.contains("kopi fatal error"), "{}", message);

    // The inner scope keeps its frame and the thread stays attached
    assert_eq!(vm.stats().attached_threads, 1);
    assert_eq!(inner.handle_kind(text), HandleKind::Transient);
    assert_eq!(inner.string_value(text).unwrap(), "inner");

    drop(inner);
    assert_eq!(vm.stats().attached_threads, 0);
}

#[test]
fn test_attachment_outlives_the_attaching_scope() {
    let (vm, bridge) = setup();
    let outer = bridge.scope().unwrap();
    let durable = {
        let calc = outer.new_object(CALC, &[], &[]).unwrap();
        outer.promote(calc).unwrap()
    };
    drop(outer);
    assert_eq!(vm.stats().attached_threads, 0);

    // A fresh scope attaches again and sees the durable object
    let scope = bridge.scope().unwrap();
    assert_eq!(vm.stats().attached_threads, 1);
    assert_eq!(scope.handle_kind(durable.bind(&scope)), HandleKind::Durable);
}
