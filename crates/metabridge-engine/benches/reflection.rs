use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use metabridge_engine::host::{HostFramework, HostObject, MemoryRuntime};
use metabridge_engine::reflect::SignalDecl;
use metabridge_engine::{
    BridgeContext, DispatchRouter, MetaObjectBuilder, MetaTable, MethodKind, RouterOptions,
};
use metabridge_sdk::{ConverterRegistry, ObjRef, TypeRole, Value};

fn context() -> (Arc<MemoryRuntime>, Arc<HostFramework>, Arc<BridgeContext>) {
    let runtime = MemoryRuntime::new();
    let framework = HostFramework::new();
    let ctx = Arc::new(BridgeContext::new(
        runtime.clone(),
        framework.clone(),
        Arc::new(ConverterRegistry::with_primitives()),
    ));
    (runtime, framework, ctx)
}

fn bench_materialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("materialize");

    for count in [4usize, 32, 256] {
        let (runtime, _framework, ctx) = context();
        let wrapper = runtime.native_class("QObject");
        let class = runtime.class("Wide", &[wrapper], TypeRole::NativeDerived);
        for i in 0..count {
            runtime.define(
                &class,
                &format!("signal{}", i),
                Value::Object(ObjRef::new(SignalDecl::new("int"))),
            );
        }

        group.bench_with_input(BenchmarkId::new("scan", count), &class, |b, class| {
            b.iter(|| {
                let mut builder = MetaObjectBuilder::for_type(ctx.clone(), black_box(class), MetaTable::root());
                builder.update()
            });
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let (_runtime, _framework, ctx) = context();
    let mut builder = MetaObjectBuilder::new(ctx, "Lookup", MetaTable::root());
    for i in 0..128 {
        builder.add_slot(&format!("slot{}(int,QString)", i));
    }
    let table = builder.update();

    c.bench_function("index_of_slot", |b| {
        b.iter(|| table.index_of_method(MethodKind::Slot, black_box("slot97(int,QString)")));
    });
}

fn bench_proxy_emit(c: &mut Criterion) {
    let (runtime, framework, ctx) = context();
    let router = DispatchRouter::new(
        ctx,
        RouterOptions {
            register_at_exit: false,
            ..RouterOptions::default()
        },
    );
    let table = Arc::new(MetaTable::new("Emitter", Some(MetaTable::root())).with_signal("fired(int)"));
    let sender = HostObject::new(table);
    framework.register(sender.clone());
    let function = runtime.function("sink", 1, |_| Ok(Value::None));
    router
        .connect_callback(sender.as_ref(), "2fired(int)", &function)
        .unwrap();

    c.bench_function("proxy_emit", |b| {
        b.iter(|| {
            router
                .emit_signal(sender.as_ref(), "2fired(int)", black_box(&[Value::Int(1)]))
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_materialize, bench_lookup, bench_proxy_emit);
criterion_main!(benches);
