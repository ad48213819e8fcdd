//! Argument marshaling and dispatch error reporting

use metabridge_sdk::{ConverterRegistry, DynamicRuntime, NativeValue, ObjRef, RuntimeError, RuntimeResult};

use crate::defaults::{RECURSION_LIMIT_BUMP, RECURSION_LIMIT_CEILING, VOID_TYPE};

fn returns_value(return_type: &str) -> bool {
    !return_type.is_empty() && return_type != VOID_TYPE
}

/// Human-readable signature used in marshaling errors:
/// `"[return ]name(T1, T2)"`
pub fn display_signature(name: &str, parameter_types: &[String], return_type: &str) -> String {
    let mut out = String::new();
    if returns_value(return_type) {
        out.push_str(return_type);
        out.push(' ');
    }
    out.push_str(name);
    out.push('(');
    out.push_str(&parameter_types.join(", "));
    out.push(')');
    out
}

/// Convert `args[1..]` to foreign values, call `callable`, and store the
/// converted result in `args[0]`.
///
/// Every parameter and the return type must have a registered converter;
/// the call is not attempted otherwise. A `None` result is never
/// converted. Must be called with the interpreter token held.
pub fn call_meta_method(
    runtime: &dyn DynamicRuntime,
    converters: &ConverterRegistry,
    signature: &str,
    parameter_types: &[String],
    return_type: &str,
    args: &mut [NativeValue],
    callable: &ObjRef,
) -> RuntimeResult<()> {
    let mut foreign = Vec::with_capacity(parameter_types.len());
    for (i, type_name) in parameter_types.iter().enumerate() {
        let Some(converter) = converters.find_converter(type_name) else {
            return Err(RuntimeError::Type(format!(
                "Cannot call meta function \"{}\" because parameter {} of type \"{}\" cannot be converted.",
                signature, i, type_name
            )));
        };
        let raw = args.get(i + 1).cloned().unwrap_or_default();
        foreign.push(converter.to_foreign(&raw));
    }

    let result_converter = if returns_value(return_type) {
        match converters.find_converter(return_type) {
            Some(converter) => Some(converter),
            None => {
                return Err(RuntimeError::Runtime(format!(
                    "The return value of \"{}\" cannot be converted.",
                    signature
                )))
            }
        }
    } else {
        None
    };

    let result = runtime.call(callable, foreign)?;
    if let Some(converter) = result_converter {
        if !result.is_none() {
            let native = converter.to_native(&result)?;
            if let Some(slot) = args.first_mut() {
                *slot = native;
            }
        }
    }
    Ok(())
}

/// Print an error raised during dispatch and swallow it.
///
/// The recursion limit is raised for the duration of the print so that
/// formatting the report cannot itself overflow, then restored. Must be
/// called with the interpreter token held.
pub fn report_dispatch_error(runtime: &dyn DynamicRuntime, error: &RuntimeError) {
    log::debug!("dispatch raised {}", error);
    let limit = runtime.recursion_limit();
    let bumped = limit < RECURSION_LIMIT_CEILING;
    if bumped {
        runtime.set_recursion_limit(limit + RECURSION_LIMIT_BUMP);
    }
    runtime.print_error(error);
    if bumped {
        runtime.set_recursion_limit(limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryRuntime;
    use metabridge_sdk::Value;

    #[test]
    fn test_display_signature() {
        let params = vec!["int".to_string(), "QString".to_string()];
        assert_eq!(display_signature("slot", &params, ""), "slot(int, QString)");
        assert_eq!(display_signature("slot", &params, "void"), "slot(int, QString)");
        assert_eq!(display_signature("calc", &[], "double"), "double calc()");
    }

    #[test]
    fn test_arguments_and_result_are_converted() {
        let runtime = MemoryRuntime::new();
        let converters = ConverterRegistry::with_primitives();
        let add = runtime.function("add", 2, |args| {
            let a = args[0].as_int().unwrap_or(0);
            let b = args[1].as_int().unwrap_or(0);
            Ok(Value::Int(a + b))
        });
        let params = vec!["int".to_string(), "int".to_string()];
        let mut args = vec![NativeValue::Invalid, NativeValue::i32(2), NativeValue::i32(40)];

        call_meta_method(runtime.as_ref(), &converters, "int add(int, int)", &params, "int", &mut args, &add)
            .unwrap();
        assert_eq!(args[0], NativeValue::i32(42));
    }

    #[test]
    fn test_unconvertible_parameter_is_a_type_error() {
        let runtime = MemoryRuntime::new();
        let converters = ConverterRegistry::with_primitives();
        let f = runtime.function("f", 1, |_| Ok(Value::None));
        let params = vec!["FooBar".to_string()];
        let mut args = vec![NativeValue::Invalid, NativeValue::Invalid];

        let err = call_meta_method(runtime.as_ref(), &converters, "f(FooBar)", &params, "", &mut args, &f)
            .unwrap_err();
        assert_eq!(
            err,
            RuntimeError::Type(
                "Cannot call meta function \"f(FooBar)\" because parameter 0 of type \"FooBar\" cannot be converted."
                    .to_string()
            )
        );
        assert_eq!(runtime.call_count(), 0);
    }

    #[test]
    fn test_unconvertible_return_type() {
        let runtime = MemoryRuntime::new();
        let converters = ConverterRegistry::with_primitives();
        let f = runtime.function("f", 0, |_| Ok(Value::Int(1)));
        let mut args = vec![NativeValue::Invalid];

        let err = call_meta_method(runtime.as_ref(), &converters, "FooBar f()", &[], "FooBar", &mut args, &f)
            .unwrap_err();
        assert_eq!(err.type_name(), "RuntimeError");
        assert_eq!(err.message(), "The return value of \"FooBar f()\" cannot be converted.");
    }

    #[test]
    fn test_none_result_is_not_converted() {
        let runtime = MemoryRuntime::new();
        let converters = ConverterRegistry::with_primitives();
        let f = runtime.function("f", 0, |_| Ok(Value::None));
        let mut args = vec![NativeValue::i32(7)];

        call_meta_method(runtime.as_ref(), &converters, "int f()", &[], "int", &mut args, &f).unwrap();
        assert_eq!(args[0], NativeValue::i32(7));
    }

    #[test]
    fn test_report_restores_recursion_limit() {
        let runtime = MemoryRuntime::new();
        runtime.set_recursion_limit(100);
        report_dispatch_error(runtime.as_ref(), &RuntimeError::raised("ValueError", "boom"));
        assert_eq!(runtime.recursion_limit(), 100);
        assert_eq!(runtime.printed_errors(), vec!["ValueError: boom".to_string()]);
        assert_eq!(runtime.limit_seen_while_printing(), Some(105));
    }
}
