//! Dynamic-runtime callables as native dispatch targets
//!
//! A callable handed to the bridge is first classified by shape, then keyed
//! by [`CallableIdentity`] and finally wrapped in a [`CallableAdapter`]
//! that can invoke it later with marshaled native arguments.
//!
//! ## Identity
//!
//! Identities are computed from object addresses only. The runtime's own
//! equality or hashing of the callable is never consulted.

mod adapter;
mod invoke;

pub use adapter::{CallableAdapter, InvokeOutcome};
pub use invoke::{call_meta_method, display_signature, report_dispatch_error};

use std::fmt;

use metabridge_sdk::{DynamicRuntime, ObjRef};

/// Shape of a dynamic-runtime callable
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CallableKind {
    /// A bound method the runtime recognizes natively
    Method,
    /// A bound method exposing its function and receiver as attributes
    CompiledMethod,
    /// A plain function
    PlainFunction,
    /// Any other callable object
    Callable,
}

impl CallableKind {
    /// Classify `callable`. Must be called with the interpreter token held.
    pub fn classify(runtime: &dyn DynamicRuntime, callable: &ObjRef) -> Self {
        if runtime.bound_method_parts(callable).is_some() {
            if runtime.is_compiled_method(callable) {
                CallableKind::CompiledMethod
            } else {
                CallableKind::Method
            }
        } else if runtime.is_function(callable) {
            CallableKind::PlainFunction
        } else {
            CallableKind::Callable
        }
    }

    /// True for the two bound-method shapes
    pub fn is_bound(&self) -> bool {
        matches!(self, CallableKind::Method | CallableKind::CompiledMethod)
    }
}

/// Hash key distinguishing callables by `(bound self, function)` address
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct CallableIdentity {
    /// Address of the bound receiver, if any
    pub bound_self: Option<usize>,
    /// Address of the underlying function (or of the callable itself)
    pub function: usize,
}

impl CallableIdentity {
    /// Identity of an unbound callable
    pub fn plain(function: usize) -> Self {
        Self {
            bound_self: None,
            function,
        }
    }

    /// Identity of a method bound to `receiver`
    pub fn bound(receiver: usize, function: usize) -> Self {
        Self {
            bound_self: Some(receiver),
            function,
        }
    }

    /// Compute the identity of `callable`. Must be called with the
    /// interpreter token held.
    pub fn of(runtime: &dyn DynamicRuntime, callable: &ObjRef) -> Self {
        match runtime.bound_method_parts(callable) {
            Some((function, receiver)) => Self::bound(receiver.identity(), function.identity()),
            None => Self::plain(callable.identity()),
        }
    }
}

impl fmt::Debug for CallableIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bound_self {
            Some(receiver) => write!(f, "({:#x}, {:#x})", receiver, self.function),
            None => write!(f, "(null, {:#x})", self.function),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryRuntime;
    use metabridge_sdk::{TypeRole, Value};

    #[test]
    fn test_classify_shapes() {
        let runtime = MemoryRuntime::new();
        let class = runtime.class("Handler", &[], TypeRole::Plain);
        let method = runtime.function("handle", 1, |_| Ok(Value::None));
        runtime.define(&class, "handle", Value::Object(method.clone()));
        let compiled = runtime.compiled_function("fast", 1, |_| Ok(Value::None));
        runtime.define(&class, "fast", Value::Object(compiled));
        let instance = runtime.instance(&class);

        let bound = runtime.method(&instance, "handle").unwrap();
        let fast = runtime.method(&instance, "fast").unwrap();
        let opaque = runtime.callable_object("functor", |_| Ok(Value::None));

        let rt = runtime.as_ref();
        assert_eq!(CallableKind::classify(rt, &bound), CallableKind::Method);
        assert_eq!(CallableKind::classify(rt, &fast), CallableKind::CompiledMethod);
        assert_eq!(CallableKind::classify(rt, &method), CallableKind::PlainFunction);
        assert_eq!(CallableKind::classify(rt, &opaque), CallableKind::Callable);
    }

    #[test]
    fn test_identity_ignores_fresh_bound_wrappers() {
        let runtime = MemoryRuntime::new();
        let class = runtime.class("Handler", &[], TypeRole::Plain);
        let method = runtime.function("handle", 1, |_| Ok(Value::None));
        runtime.define(&class, "handle", Value::Object(method.clone()));
        let a = runtime.instance(&class);
        let b = runtime.instance(&class);

        let first = runtime.method(&a, "handle").unwrap();
        let second = runtime.method(&a, "handle").unwrap();
        assert!(!first.ptr_eq(&second));

        let rt = runtime.as_ref();
        assert_eq!(CallableIdentity::of(rt, &first), CallableIdentity::of(rt, &second));
        assert_ne!(
            CallableIdentity::of(rt, &first),
            CallableIdentity::of(rt, &runtime.method(&b, "handle").unwrap())
        );
        assert_eq!(
            CallableIdentity::of(rt, &method),
            CallableIdentity::plain(method.identity())
        );
    }
}
