//! Connecting native signals to dynamic-runtime callables
//!
//! A callable bound to a native object's companion is connected straight
//! to that object whenever its slot can live in the object's own table.
//! Everything else goes through a proxy: unbound callables, methods of
//! plain objects, and methods reached through a decorator (the bound method
//! is not the receiver's own attribute).

use std::sync::Arc;

use metabridge_sdk::{DynamicRuntime, NativeValue, ObjRef, ObjectId, RuntimeError, Value};

use crate::callable::{
    report_dispatch_error, CallableAdapter, CallableIdentity, CallableKind, InvokeOutcome,
};
use crate::context::BridgeContext;
use crate::defaults::CALLBACK_NAME_PREFIX;
use crate::error::{BridgeError, BridgeResult};
use crate::native::{ConnectionHandle, NativeObject, SlotFunctor};
use crate::proxy::ProxyDispatchTarget;
use crate::reflect::signature::{callback_signature, encode_callback_name, strip_signal_code};
use crate::reflect::{MethodDescriptor, MethodKind};
use crate::router::{ConnectionKey, DispatchRouter};

/// Where a callable's connection lands
struct Receiver {
    target: Option<Arc<dyn NativeObject>>,
    proxy: Option<Arc<ProxyDispatchTarget>>,
    signature: String,
    slot_index: Option<usize>,
}

fn signal_signature(signal: &str) -> BridgeResult<&str> {
    strip_signal_code(signal).ok_or_else(|| BridgeError::MalformedSignal(signal.to_string()))
}

/// True if the bound method is not what the receiver's attribute of the
/// same name resolves to
fn is_method_decorator(runtime: &dyn DynamicRuntime, function: &ObjRef, receiver: &ObjRef) -> bool {
    let Some(name) = runtime.function_name(function) else {
        return false;
    };
    match runtime.get_attr(receiver, &name) {
        Ok(Value::Object(other)) => runtime
            .bound_method_parts(&other)
            .map_or(true, |(other_function, _)| !other_function.ptr_eq(function)),
        _ => true,
    }
}

/// Name and arity a callable is connected under
fn callback_parts(runtime: &dyn DynamicRuntime, callable: &ObjRef, kind: CallableKind) -> (String, Option<usize>) {
    match kind {
        CallableKind::Callable => (
            format!("{}{}", CALLBACK_NAME_PREFIX, callable.identity()),
            None,
        ),
        _ => (
            runtime.function_name(callable).unwrap_or_default(),
            runtime.function_arity(callable),
        ),
    }
}

/// Slot signature of `callable` for `signal`. Proxy slots carry the
/// callable identity in their name.
fn slot_signature(runtime: &dyn DynamicRuntime, callable: &ObjRef, signal: &str, encode: bool) -> String {
    let kind = CallableKind::classify(runtime, callable);
    let (name, arity) = callback_parts(runtime, callable, kind);
    let name = if encode {
        let identity = CallableIdentity::of(runtime, callable);
        encode_callback_name(&name, identity.bound_self, identity.function)
    } else {
        name
    };
    callback_signature(&name, signal, arity)
}

// ============================================================================
// Functor connections
// ============================================================================

/// Connection target running a callable adapter
struct AdapterFunctor {
    ctx: Arc<BridgeContext>,
    adapter: CallableAdapter,
    name: String,
    arity: Option<usize>,
}

impl SlotFunctor for AdapterFunctor {
    fn invoke(&self, sender: ObjectId, signal: &MethodDescriptor, args: &mut [NativeValue]) {
        let mut parameter_types = signal.parameter_types();
        if let Some(arity) = self.arity {
            parameter_types.truncate(arity);
        }
        match self
            .adapter
            .invoke(&self.ctx, &self.name, &parameter_types, "", args)
        {
            InvokeOutcome::Ok => {}
            InvokeOutcome::TargetDead => {
                log::debug!(
                    "functor for {} on {} skipped: receiver is gone",
                    signal.signature,
                    sender
                );
            }
            InvokeOutcome::Raised(err) => {
                let runtime = self.ctx.runtime();
                let _gil = runtime.interpreter_lock().acquire();
                report_dispatch_error(runtime.as_ref(), &err);
            }
        }
    }
}

impl DispatchRouter {
    fn receiver_for(
        &self,
        sender: Option<ObjectId>,
        signal: &str,
        callable: &ObjRef,
        create: bool,
    ) -> BridgeResult<Receiver> {
        let ctx = self.context().clone();
        let runtime = ctx.runtime().clone();
        let _gil = runtime.interpreter_lock().acquire();
        let rt = runtime.as_ref();
        if !rt.is_callable(callable) {
            return Err(BridgeError::InvalidCallable(signal.to_string()));
        }
        let kind = CallableKind::classify(rt, callable);

        let mut receiver_id = None;
        let mut force_proxy = false;
        if let Some((function, bound_self)) = rt.bound_method_parts(callable) {
            receiver_id = ctx.framework().native_of(&bound_self);
            force_proxy = is_method_decorator(rt, &function, &bound_self);
        }
        let mut target = receiver_id.and_then(|id| ctx.framework().object(id));
        let mut use_proxy = target.is_none() || force_proxy;
        let mut signature = String::new();
        let mut slot_index = None;

        if let (false, Some(object)) = (use_proxy, &target) {
            signature = slot_signature(rt, callable, signal, false);
            let table = self.meta_table_for(object.as_ref());
            slot_index = table.index_of_slot(&signature);
            if slot_index.is_some_and(|i| i < table.method_offset()) && kind == CallableKind::Method {
                use_proxy = true;
            }
        }

        let mut proxy = None;
        if use_proxy {
            let resolved = if create {
                Some(self.resolve_or_create_proxy(sender, callable, receiver_id)?)
            } else {
                self.find_proxy(callable)
            };
            match resolved {
                Some(p) => {
                    signature = slot_signature(rt, callable, signal, true);
                    slot_index = p.meta_table().index_of_slot(&signature);
                    target = Some(p.clone() as Arc<dyn NativeObject>);
                    proxy = Some(p);
                }
                None => {
                    target = None;
                    slot_index = None;
                }
            }
        }

        Ok(Receiver {
            target,
            proxy,
            signature,
            slot_index,
        })
    }

    fn release_receiver(&self, sender: ObjectId, receiver: &Receiver) {
        if let Some(proxy) = &receiver.proxy {
            self.release_proxy(Some(sender), proxy);
        }
    }

    /// Connect `signal` (with signal code prefix) of `source` to a callable.
    ///
    /// The signal is added to the source's per-instance table if it is not
    /// declared. The callable's slot is registered on the receiver or on a
    /// proxy as needed.
    pub fn connect_callback(
        &self,
        source: &dyn NativeObject,
        signal: &str,
        callable: &ObjRef,
    ) -> BridgeResult<ConnectionHandle> {
        let signal = signal_signature(signal)?;
        let source_id = source.object_id();
        let signal_index = self.try_register_meta_method(source, signal, MethodKind::Signal)?;
        let receiver = self.receiver_for(Some(source_id), signal, callable, true)?;

        let Some(target) = receiver.target.clone() else {
            return Err(BridgeError::InvalidCallable(signal.to_string()));
        };
        let slot_index = match receiver.slot_index {
            Some(index) => index,
            None => {
                let registered = match &receiver.proxy {
                    Some(proxy) => proxy.add_slot(&receiver.signature),
                    None => self.register_meta_method(target.as_ref(), &receiver.signature, MethodKind::Slot),
                };
                match registered {
                    Some(index) => index,
                    None => {
                        self.release_receiver(source_id, &receiver);
                        return Err(BridgeError::SlotRegistration(receiver.signature));
                    }
                }
            }
        };

        let Some(handle) = self
            .context()
            .framework()
            .connect(source_id, signal_index, &target, slot_index)
        else {
            self.release_receiver(source_id, &receiver);
            return Err(BridgeError::ConnectFailed {
                signal: signal.to_string(),
                slot: receiver.signature,
            });
        };
        if let Some(proxy) = &receiver.proxy {
            self.notify_proxy(proxy);
        }
        log::debug!(
            "connected {} #{} {} to {} #{} {}",
            source_id,
            signal_index,
            signal,
            target.object_id(),
            slot_index,
            receiver.signature
        );
        Ok(handle)
    }

    /// Undo one [`connect_callback`](Self::connect_callback).
    ///
    /// Returns false if no such connection exists.
    pub fn disconnect_callback(
        &self,
        source: &dyn NativeObject,
        signal: &str,
        callable: &ObjRef,
    ) -> BridgeResult<bool> {
        let signal = signal_signature(signal)?;
        let source_id = source.object_id();
        let table = self.meta_table_for(source);
        let Some(signal_index) = table.index_of_signal(signal) else {
            return Err(BridgeError::UnknownSignal {
                class_name: table.class_name().to_string(),
                signature: signal.to_string(),
            });
        };
        let receiver = self.receiver_for(None, signal, callable, false)?;
        let (Some(target), Some(slot_index)) = (&receiver.target, receiver.slot_index) else {
            return Ok(false);
        };
        if !self.context().framework().disconnect_one(
            source_id,
            signal_index,
            target.object_id(),
            slot_index,
        ) {
            return Ok(false);
        }
        self.release_receiver(source_id, &receiver);
        Ok(true)
    }

    /// Connect `signal` of `source` to a callable without a proxy.
    ///
    /// The connection is recorded in the connection table.
    pub fn connect_functor(
        &self,
        source: &dyn NativeObject,
        signal: &str,
        callable: &ObjRef,
    ) -> BridgeResult<ConnectionHandle> {
        let signal = signal_signature(signal)?;
        let source_id = source.object_id();
        let signal_index = self.try_register_meta_method(source, signal, MethodKind::Signal)?;

        let functor = {
            let runtime = self.context().runtime().clone();
            let _gil = runtime.interpreter_lock().acquire();
            let rt = runtime.as_ref();
            if !rt.is_callable(callable) {
                return Err(BridgeError::InvalidCallable(signal.to_string()));
            }
            let adapter = CallableAdapter::create(rt, callable, None)?;
            let (name, arity) = callback_parts(rt, callable, adapter.kind());
            Arc::new(AdapterFunctor {
                ctx: self.context().clone(),
                adapter,
                name,
                arity,
            })
        };

        let handle = self
            .context()
            .framework()
            .connect_functor(source_id, signal_index, functor)
            .ok_or_else(|| BridgeError::ConnectFailed {
                signal: signal.to_string(),
                slot: "<functor>".to_string(),
            })?;
        self.register_connection(source_id, signal_index, callable, handle);
        Ok(handle)
    }

    /// Undo one [`connect_functor`](Self::connect_functor).
    ///
    /// Returns false if no such connection is recorded.
    pub fn disconnect_functor(
        &self,
        source: &dyn NativeObject,
        signal: &str,
        callable: &ObjRef,
    ) -> BridgeResult<bool> {
        let signal = signal_signature(signal)?;
        let table = self.meta_table_for(source);
        let Some(signal_index) = table.index_of_signal(signal) else {
            return Err(BridgeError::UnknownSignal {
                class_name: table.class_name().to_string(),
                signature: signal.to_string(),
            });
        };
        let key = {
            let runtime = self.context().runtime();
            let _gil = runtime.interpreter_lock().acquire();
            ConnectionKey::new(
                source.object_id(),
                signal_index,
                CallableIdentity::of(runtime.as_ref(), callable),
            )
        };
        Ok(self.unregister_connection(&key))
    }

    /// Emit `signal` (with signal code prefix) of `source`.
    ///
    /// Returns false if the source has no such signal.
    pub fn emit_signal(&self, source: &dyn NativeObject, signal: &str, args: &[Value]) -> BridgeResult<bool> {
        let signal = signal_signature(signal)?;
        let table = self.meta_table_for(source);
        let Some(index) = table.index_of_signal(signal) else {
            return Ok(false);
        };
        let parameter_types = table
            .method(index)
            .map(|m| m.parameter_types())
            .unwrap_or_default();

        let mut native = Vec::with_capacity(parameter_types.len() + 1);
        native.push(NativeValue::Invalid);
        {
            let runtime = self.context().runtime();
            let _gil = runtime.interpreter_lock().acquire();
            let converters = self.context().converters();
            for (i, type_name) in parameter_types.iter().enumerate() {
                let Some(converter) = converters.find_converter(type_name) else {
                    return Err(RuntimeError::Type(format!(
                        "Cannot call meta function \"{}\" because parameter {} of type \"{}\" cannot be converted.",
                        signal, i, type_name
                    ))
                    .into());
                };
                let value = args.get(i).cloned().unwrap_or_default();
                native.push(converter.to_native(&value)?);
            }
        }

        self.context()
            .framework()
            .activate(source.object_id(), index, &mut native);
        Ok(true)
    }
}
