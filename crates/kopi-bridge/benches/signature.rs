use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kopi_bridge::{Bridge, Signature, Value};
use kopi_sdk::VmValue;
use kopi_vm::{ClassBuilder, SandboxVm};

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");

    for descriptor in [
        "(II)I",
        "(Ljava/lang/String;[B)V",
        "(J[Ljava/lang/String;Ljava/util/Map;)Ljava/lang/Object;",
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(descriptor), &descriptor, |b, source| {
            b.iter(|| black_box(source).parse::<Signature>().unwrap());
        });
    }

    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let signature = Signature::function(
        [Signature::Long, Signature::strings(), Signature::object()],
        Signature::bytes(),
    );

    c.bench_function("render_function", |b| {
        b.iter(|| black_box(&signature).to_string());
    });
}

fn bench_dispatch(c: &mut Criterion) {
    let vm = SandboxVm::new();
    vm.define_class(
        ClassBuilder::new("bench/Adder")
            .constructor("()V", |_, _| VmValue::Void)
            .method("add", "(II)I", |_, inv| match inv.args {
                [VmValue::Int(a), VmValue::Int(b)] => VmValue::Int(a.wrapping_add(*b)),
                _ => VmValue::Int(0),
            }),
    )
    .unwrap();
    let bridge = Bridge::new(Arc::new(vm)).unwrap();
    let scope = bridge.scope().unwrap();
    let adder = scope.new_object("bench.Adder", &[], &[]).unwrap();
    let args = [Signature::Int, Signature::Int];
    let add = scope.method_ref("bench.Adder", "add", &args, &Signature::Int).unwrap();

    let mut group = c.benchmark_group("dispatch");
    group.bench_function("by_name", |b| {
        b.iter(|| {
            scope
                .call_method(adder, "add", &args, &Signature::Int, &[Value::Int(1), black_box(Value::Int(2))])
                .unwrap()
        });
    });
    group.bench_function("cached", |b| {
        b.iter(|| scope.invoke(&add, Some(adder), &[Value::Int(1), black_box(Value::Int(2))]).unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_parse, bench_render, bench_dispatch);
criterion_main!(benches);
