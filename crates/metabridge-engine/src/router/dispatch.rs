//! Built-in dispatch for dynamic-runtime authored classes
//!
//! Native objects whose class was extended from the dynamic runtime forward
//! their `meta_call` here. Property calls run the accessors of the
//! matching [`PropertyDecl`]; method calls either activate a signal or
//! call the same-named attribute of the companion object.
//!
//! Ids are absolute. The returned code is the id minus the handled range.

use metabridge_sdk::{NativeValue, ObjectId, RuntimeError};

use crate::callable::{call_meta_method, display_signature, report_dispatch_error};
use crate::native::{MetaCall, NativeObject};
use crate::reflect::{find_property, MethodKind, PropertyCallError, PropertyDecl};
use crate::router::DispatchRouter;

impl DispatchRouter {
    /// Native dispatch entry point of a dynamic-runtime authored object
    pub fn dispatch(
        &self,
        object: &dyn NativeObject,
        call: MetaCall,
        id: i32,
        args: &mut [NativeValue],
    ) -> i32 {
        match call {
            MetaCall::ReadProperty | MetaCall::WriteProperty | MetaCall::ResetProperty => {
                self.property_meta_call(object, call, id, args)
            }
            MetaCall::InvokeMetaMethod => self.method_meta_call(object, id, args),
            MetaCall::RegisterPropertyMetaType | MetaCall::BindableProperty => {
                id - self.meta_table_for(object).property_count() as i32
            }
            MetaCall::CreateInstance
            | MetaCall::IndexOfMethod
            | MetaCall::RegisterMethodArgumentMetaType
            | MetaCall::CustomCall => {
                let table = self.meta_table_for(object);
                log::debug!("{}: {} #{} not handled", table.class_name(), call, id);
                id - table.method_count() as i32
            }
            MetaCall::ConstructInPlace => id,
        }
    }

    fn property_meta_call(
        &self,
        object: &dyn NativeObject,
        call: MetaCall,
        id: i32,
        args: &mut [NativeValue],
    ) -> i32 {
        let table = self.meta_table_for(object);
        let mut result = id - table.property_count() as i32;
        let Some(property) = usize::try_from(id).ok().and_then(|i| table.property(i)) else {
            return result;
        };
        log::debug!(
            "{}: {} #{} \"{}\"",
            table.class_name(),
            call,
            id,
            property.name
        );

        let ctx = self.context();
        let object_id = object.object_id();
        let runtime = ctx.runtime().clone();
        let _gil = runtime.interpreter_lock().acquire();

        let declaration = ctx
            .framework()
            .companion(object_id)
            .and_then(|companion| {
                find_property(runtime.as_ref(), &companion, &property.name).map(|d| (companion, d))
            });
        let Some((companion, declaration)) = declaration else {
            log::warn!("Invalid property: {}.", property.name);
            return result;
        };
        let Some(decl) = declaration.downcast_ref::<PropertyDecl>() else {
            return result;
        };

        match decl.meta_call(runtime.as_ref(), ctx.converters(), &companion, call, args) {
            Ok(()) => {}
            Err(PropertyCallError::UnknownType) => {
                let accessor = if call == MetaCall::WriteProperty {
                    "fset"
                } else {
                    "fget"
                };
                ctx.warn(&format!(
                    "Unknown property type '{}' of QObject '{}' used in {}",
                    property.type_name,
                    table.class_name(),
                    accessor
                ));
            }
            Err(PropertyCallError::Raised(err)) => {
                log::warn!(
                    "An error occurred executing the property metacall {} on property \"{}\" of {}",
                    call,
                    property.name,
                    object_id
                );
                self.handle_meta_call_error(object_id, &mut result, &err);
            }
        }
        result
    }

    fn method_meta_call(&self, object: &dyn NativeObject, id: i32, args: &mut [NativeValue]) -> i32 {
        let table = self.meta_table_for(object);
        let mut result = id - table.method_count() as i32;
        let Some((index, method)) = usize::try_from(id)
            .ok()
            .and_then(|i| table.method(i).map(|m| (i, m)))
        else {
            return result;
        };
        log::debug!(
            "{}: InvokeMetaMethod #{} {}",
            table.class_name(),
            id,
            method.signature
        );

        let ctx = self.context();
        let object_id = object.object_id();
        if method.kind == MethodKind::Signal {
            ctx.framework().activate(object_id, index, args);
            return result;
        }

        let runtime = ctx.runtime().clone();
        let _gil = runtime.interpreter_lock().acquire();
        let callable = ctx
            .framework()
            .companion(object_id)
            .and_then(|companion| runtime.get_attr(&companion, method.name()).ok())
            .and_then(|value| value.as_object().cloned());
        let Some(callable) = callable else {
            let err = RuntimeError::Attribute(format!(
                "Slot '{}::{}' not found.",
                table.class_name(),
                method.signature
            ));
            log::error!("{}", err.message());
            self.handle_meta_call_error(object_id, &mut result, &err);
            return result;
        };

        let parameter_types = method.parameter_types();
        let signature = display_signature(method.name(), &parameter_types, method.type_name());
        if let Err(err) = call_meta_method(
            runtime.as_ref(),
            ctx.converters(),
            &signature,
            &parameter_types,
            method.type_name(),
            args,
            &callable,
        ) {
            self.handle_meta_call_error(object_id, &mut result, &err);
        }
        result
    }

    fn handle_meta_call_error(&self, object: ObjectId, result: &mut i32, err: &RuntimeError) {
        if let Some(handler) = self.error_handler() {
            if let Some(code) = handler(object) {
                *result = code;
            }
        }
        let runtime = self.context().runtime();
        let _gil = runtime.interpreter_lock().acquire();
        report_dispatch_error(runtime.as_ref(), err);
    }
}
