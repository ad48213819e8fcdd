//! Callable adapter variants
//!
//! - `Plain` owns the callable for its whole life.
//! - `Bound` owns the underlying function and watches the receiver weakly.
//!   The bound call is rebuilt at every invocation because runtimes may
//!   hand out a fresh bound wrapper on every attribute access.
//! - `Tracked` is `Bound` plus a death hook that lets the owner tear down
//!   everything registered for this callable as soon as the receiver dies.

use std::fmt;

use metabridge_sdk::{DeathCallback, DynamicRuntime, NativeValue, ObjRef, RuntimeError, RuntimeResult};

use crate::callable::invoke::{call_meta_method, display_signature};
use crate::callable::{CallableIdentity, CallableKind};
use crate::context::BridgeContext;
use crate::weak::WeakNotifier;

/// Result of invoking a callable adapter
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeOutcome {
    /// The call completed
    Ok,
    /// The bound receiver died; the call was skipped
    TargetDead,
    /// Marshaling failed or the callable raised
    Raised(RuntimeError),
}

/// A dynamic-runtime callable ready for native dispatch
pub enum CallableAdapter {
    /// Unbound function or opaque callable, held strongly
    Plain {
        /// The callable
        callable: ObjRef,
        /// Its shape
        kind: CallableKind,
    },
    /// Method whose receiver is held weakly
    Bound {
        /// Underlying function
        function: ObjRef,
        /// Weak reference to the receiver
        target: WeakNotifier,
        /// Its shape
        kind: CallableKind,
    },
    /// Method whose receiver's death is reported to the owner
    Tracked {
        /// Underlying function
        function: ObjRef,
        /// Weak reference to the receiver, carrying the death hook
        target: WeakNotifier,
        /// Its shape
        kind: CallableKind,
    },
}

impl CallableAdapter {
    /// Wrap `callable`, choosing the variant from its shape.
    ///
    /// Bound methods become `Tracked` when `on_target_death` is given and
    /// `Bound` otherwise; the hook is unused for unbound callables. Must be
    /// called with the interpreter token held.
    pub fn create(
        runtime: &dyn DynamicRuntime,
        callable: &ObjRef,
        on_target_death: Option<DeathCallback>,
    ) -> RuntimeResult<Self> {
        let kind = CallableKind::classify(runtime, callable);
        let Some((function, receiver)) = runtime.bound_method_parts(callable) else {
            return Ok(CallableAdapter::Plain {
                callable: callable.clone(),
                kind,
            });
        };
        match on_target_death {
            Some(hook) => Ok(CallableAdapter::Tracked {
                function,
                target: WeakNotifier::watch(runtime, &receiver, hook)?,
                kind,
            }),
            None => Ok(CallableAdapter::Bound {
                function,
                target: WeakNotifier::silent(runtime, &receiver)?,
                kind,
            }),
        }
    }

    /// Shape of the wrapped callable
    pub fn kind(&self) -> CallableKind {
        match self {
            CallableAdapter::Plain { kind, .. }
            | CallableAdapter::Bound { kind, .. }
            | CallableAdapter::Tracked { kind, .. } => *kind,
        }
    }

    /// Identity of the wrapped callable
    pub fn identity(&self) -> CallableIdentity {
        match self {
            CallableAdapter::Plain { callable, .. } => CallableIdentity::plain(callable.identity()),
            CallableAdapter::Bound {
                function, target, ..
            }
            | CallableAdapter::Tracked {
                function, target, ..
            } => CallableIdentity::bound(target.identity(), function.identity()),
        }
    }

    /// The underlying function or callable
    pub fn function(&self) -> &ObjRef {
        match self {
            CallableAdapter::Plain { callable, .. } => callable,
            CallableAdapter::Bound { function, .. } | CallableAdapter::Tracked { function, .. } => {
                function
            }
        }
    }

    /// False once a bound receiver died
    pub fn is_alive(&self) -> bool {
        match self {
            CallableAdapter::Plain { .. } => true,
            CallableAdapter::Bound { target, .. } | CallableAdapter::Tracked { target, .. } => {
                target.is_alive()
            }
        }
    }

    /// Resolve the object to call, rebinding methods to their receiver.
    ///
    /// `Ok(None)` means the receiver is gone.
    fn resolve(&self, runtime: &dyn DynamicRuntime) -> RuntimeResult<Option<ObjRef>> {
        match self {
            CallableAdapter::Plain { callable, .. } => Ok(Some(callable.clone())),
            CallableAdapter::Bound {
                function, target, ..
            }
            | CallableAdapter::Tracked {
                function, target, ..
            } => match target.upgrade() {
                Some(receiver) => runtime.bind(function, &receiver).map(Some),
                None => Ok(None),
            },
        }
    }

    /// Invoke with native arguments (`args[0]` receives the result).
    ///
    /// Acquires the interpreter token.
    pub fn invoke(
        &self,
        ctx: &BridgeContext,
        name: &str,
        parameter_types: &[String],
        return_type: &str,
        args: &mut [NativeValue],
    ) -> InvokeOutcome {
        let runtime = ctx.runtime();
        let _gil = runtime.interpreter_lock().acquire();
        let callable = match self.resolve(runtime.as_ref()) {
            Ok(Some(callable)) => callable,
            Ok(None) => return InvokeOutcome::TargetDead,
            Err(err) => return InvokeOutcome::Raised(err),
        };
        let signature = display_signature(name, parameter_types, return_type);
        match call_meta_method(
            runtime.as_ref(),
            ctx.converters(),
            &signature,
            parameter_types,
            return_type,
            args,
            &callable,
        ) {
            Ok(()) => InvokeOutcome::Ok,
            Err(err) => InvokeOutcome::Raised(err),
        }
    }
}

impl fmt::Debug for CallableAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallableAdapter::Plain { callable, kind } => {
                write!(f, "PlainCallable({:?}, {:?})", kind, callable)
            }
            CallableAdapter::Bound {
                function, target, ..
            } => write!(
                f,
                "BoundMethod(self={:#x}, function={:?}, alive={})",
                target.identity(),
                function,
                target.is_alive()
            ),
            CallableAdapter::Tracked {
                function, target, ..
            } => write!(
                f,
                "TrackedBoundMethod(self={:#x}, function={:?}, alive={})",
                target.identity(),
                function,
                target.is_alive()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostFramework, MemoryRuntime};
    use metabridge_sdk::{ConverterRegistry, TypeRole, Value};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn context(runtime: &Arc<MemoryRuntime>) -> BridgeContext {
        BridgeContext::new(
            runtime.clone(),
            HostFramework::new(),
            Arc::new(ConverterRegistry::with_primitives()),
        )
    }

    #[test]
    fn test_bound_rebinds_at_call_time() {
        let runtime = MemoryRuntime::new();
        let ctx = context(&runtime);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let class = runtime.class("Handler", &[], TypeRole::Plain);
        let handle = runtime.function("handle", 2, move |args| {
            sink.lock().push((args[0].as_object().map(|o| o.identity()), args[1].as_int()));
            Ok(Value::None)
        });
        runtime.define(&class, "handle", Value::Object(handle));
        let instance = runtime.instance(&class);
        let bound = runtime.method(&instance, "handle").unwrap();

        let adapter = CallableAdapter::create(runtime.as_ref(), &bound, None).unwrap();
        drop(bound);
        assert!(matches!(adapter, CallableAdapter::Bound { .. }));

        let mut args = vec![NativeValue::Invalid, NativeValue::i32(5)];
        let outcome = adapter.invoke(&ctx, "handle", &["int".to_string()], "", &mut args);
        assert_eq!(outcome, InvokeOutcome::Ok);
        assert_eq!(*seen.lock(), vec![(Some(instance.identity()), Some(5))]);
    }

    #[test]
    fn test_adapter_does_not_keep_receiver_alive() {
        let runtime = MemoryRuntime::new();
        let ctx = context(&runtime);
        let class = runtime.class("Handler", &[], TypeRole::Plain);
        let handle = runtime.function("handle", 1, |_| Ok(Value::None));
        runtime.define(&class, "handle", Value::Object(handle));
        let instance = runtime.instance(&class);
        let bound = runtime.method(&instance, "handle").unwrap();

        let adapter = CallableAdapter::create(runtime.as_ref(), &bound, None).unwrap();
        drop(bound);
        drop(instance);

        assert!(!adapter.is_alive());
        let mut args = vec![NativeValue::Invalid];
        assert_eq!(
            adapter.invoke(&ctx, "handle", &[], "", &mut args),
            InvokeOutcome::TargetDead
        );
        assert_eq!(runtime.call_count(), 0);
    }

    #[test]
    fn test_tracked_runs_hook_on_death() {
        let runtime = MemoryRuntime::new();
        let class = runtime.class("Handler", &[], TypeRole::Plain);
        let handle = runtime.function("handle", 1, |_| Ok(Value::None));
        runtime.define(&class, "handle", Value::Object(handle));
        let instance = runtime.instance(&class);
        let bound = runtime.method(&instance, "handle").unwrap();

        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let adapter = CallableAdapter::create(
            runtime.as_ref(),
            &bound,
            Some(Box::new(move || flag.store(true, Ordering::SeqCst))),
        )
        .unwrap();
        assert!(matches!(adapter, CallableAdapter::Tracked { .. }));
        let identity = adapter.identity();
        assert_eq!(identity.bound_self, Some(instance.identity()));

        drop(bound);
        drop(instance);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_plain_raises_are_reported_as_outcome() {
        let runtime = MemoryRuntime::new();
        let ctx = context(&runtime);
        let f = runtime.function("f", 0, |_| Err(RuntimeError::raised("ValueError", "bad")));
        let adapter = CallableAdapter::create(runtime.as_ref(), &f, None).unwrap();
        assert_eq!(adapter.kind(), CallableKind::PlainFunction);

        let mut args = vec![NativeValue::Invalid];
        assert_eq!(
            adapter.invoke(&ctx, "f", &[], "", &mut args),
            InvokeOutcome::Raised(RuntimeError::raised("ValueError", "bad"))
        );
    }
}
