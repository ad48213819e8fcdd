//! Class member ingestion
//!
//! Walks a dynamic-runtime class and its plain mixin bases and registers
//! their declared members on a [`MetaObjectBuilder`]:
//!
//! 1. signals of every involved type
//! 2. properties and slot-decorated callables of every involved type
//! 3. enumerations registered on the class itself
//!
//! Signals go first so property notify lookups resolve regardless of
//! declaration order, and so the appended method range lists signals before
//! slots. Members already present in the base table are skipped.

use metabridge_sdk::{ObjRef, TypeRole, Value};

use crate::defaults::SLOT_LIST_ATTR;
use crate::reflect::builder::MetaObjectBuilder;
use crate::reflect::decl::{EnumDecl, PropertyDecl, SignalDecl, SlotList};

/// Register the declared members of `ty` on `builder`
pub fn scan_type(builder: &mut MetaObjectBuilder, ty: &ObjRef) {
    let runtime = builder.context().runtime().clone();
    let _gil = runtime.interpreter_lock().acquire();
    let base = builder.base().clone();

    let mut types = vec![ty.clone()];
    types.extend(
        runtime
            .type_mro(ty)
            .into_iter()
            .filter(|t| !t.ptr_eq(ty) && runtime.type_role(t) == TypeRole::Plain),
    );
    let namespaces: Vec<Vec<(String, Value)>> =
        types.iter().map(|t| runtime.type_members(t)).collect();

    for members in &namespaces {
        for (key, value) in members {
            let Value::Object(obj) = value else {
                continue;
            };
            let Some(signal) = obj.downcast_ref::<SignalDecl>() else {
                continue;
            };
            for signature in signal.full_signatures(key) {
                if base.index_of_signal(&signature).is_none() {
                    builder.add_signal_with_names(&signature, signal.arguments.clone());
                }
            }
        }
    }

    for members in &namespaces {
        for (key, value) in members {
            let Value::Object(obj) = value else {
                continue;
            };
            if let Some(property) = obj.downcast_ref::<PropertyDecl>() {
                if base.index_of_property(key).is_none() {
                    builder.add_property(key, property);
                }
            } else if runtime.is_callable(obj) && runtime.has_attr(obj, SLOT_LIST_ATTR) {
                let Ok(Value::Object(list)) = runtime.get_attr(obj, SLOT_LIST_ATTR) else {
                    continue;
                };
                let Some(slots) = list.downcast_ref::<SlotList>() else {
                    continue;
                };
                for slot in &slots.0 {
                    if base.index_of_slot(&slot.signature).is_none() {
                        builder.add_slot_with(&slot.signature, &slot.result_type, &slot.tag);
                    }
                }
            }
        }
    }

    if let Some(members) = namespaces.first() {
        for (_, value) in members {
            if let Value::Object(obj) = value {
                if let Some(decl) = obj.downcast_ref::<EnumDecl>() {
                    builder.add_enumerator(&decl.name, decl.is_flag, true, &decl.entries);
                }
            }
        }
    }
}
