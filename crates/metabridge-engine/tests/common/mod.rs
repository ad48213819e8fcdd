//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use metabridge_engine::host::{BridgedObject, HostFramework, HostObject, MemoryRuntime};
use metabridge_engine::{BridgeContext, DispatchRouter, MetaTable, NativeObject, RouterOptions};
use metabridge_sdk::{ConverterRegistry, ObjRef, TypeRole, Value};
use parking_lot::Mutex;

/// A runtime, a framework and a router wired together
pub struct Bridge {
    pub runtime: Arc<MemoryRuntime>,
    pub framework: Arc<HostFramework>,
    pub ctx: Arc<BridgeContext>,
    pub router: DispatchRouter,
}

pub fn bridge() -> Bridge {
    bridge_with(RouterOptions {
        register_at_exit: false,
        ..RouterOptions::default()
    })
}

pub fn bridge_with(options: RouterOptions) -> Bridge {
    let runtime = MemoryRuntime::new();
    let framework = HostFramework::new();
    let ctx = Arc::new(BridgeContext::new(
        runtime.clone(),
        framework.clone(),
        Arc::new(ConverterRegistry::with_primitives()),
    ));
    let router = DispatchRouter::new(ctx.clone(), options);
    Bridge {
        runtime,
        framework,
        ctx,
        router,
    }
}

/// A native base class with two slots and no superclass
pub fn base_table() -> Arc<MetaTable> {
    Arc::new(MetaTable::new("Base", None).with_slot("a()").with_slot("b()"))
}

/// A native table declaring `fired(int)` and `done()` on top of the root
pub fn sender_table() -> Arc<MetaTable> {
    Arc::new(
        MetaTable::new("Emitter", Some(MetaTable::root()))
            .with_signal("fired(int)")
            .with_signal("done()"),
    )
}

impl Bridge {
    /// Register a plain native object
    pub fn native(&self, table: Arc<MetaTable>) -> Arc<HostObject> {
        let object = HostObject::new(table);
        self.framework.register(object.clone());
        object
    }

    /// Register a native object extended by `companion`'s class
    pub fn bridged(&self, table: Arc<MetaTable>, companion: &ObjRef) -> Arc<BridgedObject> {
        let object = BridgedObject::new(table, &self.router);
        self.framework.register(object.clone());
        self.framework.bind_companion(object.object_id(), companion);
        object
    }

    /// Create a dynamic class derived from the wrapper of a native class
    pub fn derived_class(&self, name: &str, native: &str) -> ObjRef {
        let wrapper = self.runtime.native_class(native);
        self.runtime.class(name, &[wrapper], TypeRole::NativeDerived)
    }

    /// Define a method on `class` recording its integer argument
    pub fn recording_method(&self, class: &ObjRef, name: &str) -> Arc<Mutex<Vec<i64>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let function = self.runtime.function(name, 2, move |args| {
            sink.lock().push(args[1].as_int().unwrap_or(-1));
            Ok(Value::None)
        });
        self.runtime.define(class, name, Value::Object(function));
        seen
    }
}
