//! Integration tests for built-in dispatch of dynamic-runtime authored
//! objects: property access, slot and signal invocation, error reporting.

mod common;

use std::sync::Arc;

use common::{bridge, Bridge};
use metabridge_engine::host::BridgedObject;
use metabridge_engine::reflect::{PropertyDecl, SignalDecl, SlotDecl};
use metabridge_engine::{MetaCall, MetaCallErrorHandler, MetaTable, NativeObject};
use metabridge_sdk::{NativeValue, ObjRef, ObjectId, RuntimeError, Value};
use parking_lot::Mutex;

/// A `Counter` object with an int property `value` backed by `cell`
struct Counter {
    object: Arc<BridgedObject>,
    class: ObjRef,
    cell: Arc<Mutex<i64>>,
    _companion: ObjRef,
}

fn counter(b: &Bridge) -> Counter {
    let class = b.derived_class("Counter", "QObject");
    let cell = Arc::new(Mutex::new(5));

    let read = cell.clone();
    let getter = b
        .runtime
        .function("value", 1, move |_| Ok(Value::Int(*read.lock())));
    let write = cell.clone();
    let setter = b.runtime.function("setValue", 2, move |args| {
        *write.lock() = args[1].as_int().unwrap_or(-1);
        Ok(Value::None)
    });
    let clear = cell.clone();
    let reset = b.runtime.function("resetValue", 1, move |_| {
        *clear.lock() = 0;
        Ok(Value::None)
    });
    b.runtime.define(
        &class,
        "value",
        Value::Object(ObjRef::new(
            PropertyDecl::new("int")
                .with_getter(getter)
                .with_setter(setter)
                .with_reset(reset),
        )),
    );

    let companion = b.runtime.instance(&class);
    let object = b.bridged(MetaTable::root(), &companion);
    Counter {
        object,
        class,
        cell,
        _companion: companion,
    }
}

fn property_index(c: &Counter) -> i32 {
    c.object.meta_table().index_of_property("value").unwrap() as i32
}

// ============================================================================
// Property Tests
// ============================================================================

mod properties {
    use super::*;

    #[test]
    fn test_read_property() {
        let b = bridge();
        let c = counter(&b);
        let index = property_index(&c);
        let mut args = [NativeValue::Invalid];

        let code = c.object.meta_call(MetaCall::ReadProperty, index, &mut args, None);

        assert_eq!(args[0], NativeValue::Int(5));
        assert_eq!(code, index - c.object.meta_table().property_count() as i32);
    }

    #[test]
    fn test_write_and_reset_property() {
        let b = bridge();
        let c = counter(&b);
        let index = property_index(&c);

        let mut args = [NativeValue::i32(42)];
        c.object.meta_call(MetaCall::WriteProperty, index, &mut args, None);
        assert_eq!(*c.cell.lock(), 42);

        c.object
            .meta_call(MetaCall::ResetProperty, index, &mut [], None);
        assert_eq!(*c.cell.lock(), 0);
    }

    #[test]
    fn test_inherited_property_index_passes_through() {
        let b = bridge();
        let c = counter(&b);
        let mut args = [NativeValue::Invalid];
        let code = c.object.meta_call(MetaCall::ReadProperty, 0, &mut args, None);
        assert!(args[0].is_invalid());
        assert_eq!(code, -(c.object.meta_table().property_count() as i32));
    }

    #[test]
    fn test_raising_getter_is_printed() {
        let b = bridge();
        let class = b.derived_class("Faulty", "QObject");
        let getter = b.runtime.function("broken", 1, |_| {
            Err(RuntimeError::raised("ValueError", "bad value"))
        });
        b.runtime.define(
            &class,
            "broken",
            Value::Object(ObjRef::new(PropertyDecl::new("int").with_getter(getter))),
        );
        let companion = b.runtime.instance(&class);
        let object = b.bridged(MetaTable::root(), &companion);
        let index = object.meta_table().index_of_property("broken").unwrap() as i32;

        let mut args = [NativeValue::Invalid];
        let code = object.meta_call(MetaCall::ReadProperty, index, &mut args, None);
        assert_eq!(code, index - object.meta_table().property_count() as i32);
        assert_eq!(b.runtime.printed_errors(), vec!["ValueError: bad value"]);

        let target = object.object_id();
        let handler: MetaCallErrorHandler = Arc::new(move |id: ObjectId| (id == target).then_some(-7));
        b.router.set_meta_call_error_handler(Some(handler));
        let code = object.meta_call(MetaCall::ReadProperty, index, &mut args, None);
        assert_eq!(code, -7);
        assert_eq!(b.runtime.printed_errors().len(), 2);
    }

    #[test]
    fn test_read_only_property_write_reports_error() {
        let b = bridge();
        let class = b.derived_class("Fixed", "QObject");
        let getter = b.runtime.function("size", 1, |_| Ok(Value::Int(3)));
        b.runtime.define(
            &class,
            "size",
            Value::Object(ObjRef::new(PropertyDecl::new("int").with_getter(getter))),
        );
        let companion = b.runtime.instance(&class);
        let object = b.bridged(MetaTable::root(), &companion);
        let index = object.meta_table().index_of_property("size").unwrap() as i32;

        let mut args = [NativeValue::i32(1)];
        object.meta_call(MetaCall::WriteProperty, index, &mut args, None);
        assert_eq!(
            b.runtime.printed_errors(),
            vec!["AttributeError: property is read-only"]
        );
    }
}

// ============================================================================
// Method Tests
// ============================================================================

mod methods {
    use super::*;

    #[test]
    fn test_slot_invocation_calls_companion_method() {
        let b = bridge();
        let c = counter(&b);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let bump = b.runtime.function("bump", 2, move |args| {
            sink.lock().push(args[1].as_int().unwrap_or(-1));
            Ok(Value::None)
        });
        b.runtime.mark_slots(&bump, vec![SlotDecl::new("bump(int)")]);
        b.runtime.define(&c.class, "bump", Value::Object(bump));

        let table = c.object.meta_table();
        let index = table.index_of_slot("bump(int)").unwrap() as i32;
        let mut args = [NativeValue::Invalid, NativeValue::i32(3)];
        let code = c.object.meta_call(MetaCall::InvokeMetaMethod, index, &mut args, None);

        assert_eq!(*seen.lock(), vec![3]);
        assert_eq!(code, index - table.method_count() as i32);
    }

    #[test]
    fn test_slot_result_is_stored() {
        let b = bridge();
        let class = b.derived_class("Doubler", "QObject");
        let twice = b.runtime.function("twice", 2, |args| {
            Ok(Value::Int(args[1].as_int().unwrap_or(0) * 2))
        });
        b.runtime
            .mark_slots(&twice, vec![SlotDecl::new("twice(int)").with_result("int")]);
        b.runtime.define(&class, "twice", Value::Object(twice));
        let companion = b.runtime.instance(&class);
        let object = b.bridged(MetaTable::root(), &companion);

        let index = object.meta_table().index_of_slot("twice(int)").unwrap() as i32;
        let mut args = [NativeValue::Invalid, NativeValue::i32(21)];
        object.meta_call(MetaCall::InvokeMetaMethod, index, &mut args, None);
        assert_eq!(args[0], NativeValue::Int(42));
    }

    #[test]
    fn test_missing_slot_attribute_is_reported() {
        let b = bridge();
        let c = counter(&b);
        let index = b
            .router
            .register_meta_method(c.object.as_ref(), "ghost()", metabridge_engine::MethodKind::Slot)
            .unwrap() as i32;

        let mut args = [NativeValue::Invalid];
        c.object.meta_call(MetaCall::InvokeMetaMethod, index, &mut args, None);
        assert_eq!(
            b.runtime.printed_errors(),
            vec!["AttributeError: Slot 'Counter::ghost()' not found."]
        );
    }

    #[test]
    fn test_malformed_non_ascii_slot_is_rejected() {
        log::set_max_level(log::LevelFilter::Warn);
        let b = bridge();
        let c = counter(&b);
        let methods = c.object.meta_table().method_count();

        let index = b.router.register_meta_method(
            c.object.as_ref(),
            "(é",
            metabridge_engine::MethodKind::Slot,
        );

        assert_eq!(index, None);
        assert_eq!(c.object.meta_table().method_count(), methods);
        assert!(b
            .runtime
            .warnings()
            .iter()
            .any(|w| w.contains("Invalid method signature provided for \"(é\"")));
    }

    #[test]
    fn test_signal_invocation_activates_connections() {
        let b = bridge();
        let class = b.derived_class("Ticker", "QObject");
        b.runtime.define(
            &class,
            "ticked",
            Value::Object(ObjRef::new(SignalDecl::new("int"))),
        );
        let companion = b.runtime.instance(&class);
        let object = b.bridged(MetaTable::root(), &companion);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener = b.runtime.function("listener", 1, move |args| {
            sink.lock().push(args[0].as_int().unwrap_or(-1));
            Ok(Value::None)
        });
        b.router
            .connect_functor(object.as_ref(), "2ticked(int)", &listener)
            .unwrap();

        let index = object.meta_table().index_of_signal("ticked(int)").unwrap() as i32;
        let mut args = [NativeValue::Invalid, NativeValue::i32(9)];
        object.meta_call(MetaCall::InvokeMetaMethod, index, &mut args, None);
        assert_eq!(*seen.lock(), vec![9]);
    }

    #[test]
    fn test_unhandled_calls_pass_through() {
        let b = bridge();
        let c = counter(&b);
        let table = c.object.meta_table();
        let code = c
            .object
            .meta_call(MetaCall::CreateInstance, 10, &mut [], None);
        assert_eq!(code, 10 - table.method_count() as i32);

        let code = c
            .object
            .meta_call(MetaCall::RegisterPropertyMetaType, 3, &mut [], None);
        assert_eq!(code, 3 - table.property_count() as i32);
    }
}
