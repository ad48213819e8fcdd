//! In-memory dynamic runtime
//!
//! A small object model with classes, instances, functions, bound methods
//! and opaque callables. Instances and classes run their death callbacks
//! when the last reference is dropped, which makes lifetime scenarios deterministic.
//! Warnings and printed errors are collected for inspection.

use std::any::Any;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use metabridge_sdk::{
    DeathCallback, DynamicRuntime, ForeignObject, InterpreterLock, ObjRef, RuntimeError,
    RuntimeResult, TypeRole, Value, WarningCategory, WeakObjRef, WeakSlot,
};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::defaults::SLOT_LIST_ATTR;
use crate::reflect::{SlotDecl, SlotList};

const DEFAULT_RECURSION_LIMIT: u32 = 1000;

/// Body of a host function
pub type HostFn = Arc<dyn Fn(&[Value]) -> RuntimeResult<Value> + Send + Sync>;

// ============================================================================
// Objects
// ============================================================================

struct Function {
    name: String,
    params: Option<usize>,
    compiled: bool,
    body: HostFn,
    attrs: RwLock<FxHashMap<String, Value>>,
}

struct BoundMethod {
    function: ObjRef,
    receiver: ObjRef,
    compiled: bool,
}

struct CallableObject {
    name: String,
    body: HostFn,
}

struct Class {
    name: String,
    bases: Vec<ObjRef>,
    role: TypeRole,
    members: RwLock<Vec<(String, Value)>>,
    watchers: Arc<Mutex<Watchers>>,
}

impl Drop for Class {
    fn drop(&mut self) {
        fire_watchers(&self.watchers);
    }
}

#[derive(Default)]
struct Watchers {
    next: u64,
    entries: Vec<(u64, DeathCallback)>,
}

struct Instance {
    class: ObjRef,
    class_name: String,
    attrs: RwLock<FxHashMap<String, Value>>,
    watchers: Arc<Mutex<Watchers>>,
}

fn fire_watchers(watchers: &Mutex<Watchers>) {
    let entries = std::mem::take(&mut watchers.lock().entries);
    for (_, on_death) in entries {
        on_death();
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        fire_watchers(&self.watchers);
    }
}

macro_rules! foreign_object {
    ($ty:ty, $name:expr) => {
        impl ForeignObject for $ty {
            fn type_name(&self) -> &str {
                $name
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }
    };
}

foreign_object!(Function, "function");
foreign_object!(BoundMethod, "method");
foreign_object!(CallableObject, "callable");
foreign_object!(Class, "type");

impl ForeignObject for Instance {
    fn type_name(&self) -> &str {
        &self.class_name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct WatchedSlot {
    target: WeakObjRef,
    watchers: Weak<Mutex<Watchers>>,
    id: u64,
}

impl WeakSlot for WatchedSlot {
    fn upgrade(&self) -> Option<ObjRef> {
        self.target.upgrade()
    }

    fn cancel(&self) {
        if let Some(watchers) = self.watchers.upgrade() {
            let removed: Vec<(u64, DeathCallback)> = {
                let mut watchers = watchers.lock();
                let (removed, kept) = std::mem::take(&mut watchers.entries)
                    .into_iter()
                    .partition(|(id, _)| *id == self.id);
                watchers.entries = kept;
                removed
            };
            drop(removed);
        }
    }
}

// ============================================================================
// MemoryRuntime
// ============================================================================

/// In-memory implementation of [`DynamicRuntime`]
pub struct MemoryRuntime {
    lock: InterpreterLock,
    object_type: ObjRef,
    binding_root: ObjRef,
    recursion_limit: AtomicU32,
    limit_while_printing: AtomicU64,
    calls: AtomicUsize,
    warnings_as_errors: RwLock<bool>,
    warnings: Mutex<Vec<(WarningCategory, String)>>,
    printed: Mutex<Vec<String>>,
}

impl MemoryRuntime {
    /// Create a new runtime with its two root types
    pub fn new() -> Arc<Self> {
        let object_type = ObjRef::new(Class {
            name: "object".to_string(),
            bases: Vec::new(),
            role: TypeRole::UniversalRoot,
            members: RwLock::new(Vec::new()),
            watchers: Arc::new(Mutex::new(Watchers::default())),
        });
        let binding_root = ObjRef::new(Class {
            name: "Shiboken.Object".to_string(),
            bases: vec![object_type.clone()],
            role: TypeRole::BindingRoot,
            members: RwLock::new(Vec::new()),
            watchers: Arc::new(Mutex::new(Watchers::default())),
        });
        Arc::new(Self {
            lock: InterpreterLock::new(),
            object_type,
            binding_root,
            recursion_limit: AtomicU32::new(DEFAULT_RECURSION_LIMIT),
            limit_while_printing: AtomicU64::new(u64::MAX),
            calls: AtomicUsize::new(0),
            warnings_as_errors: RwLock::new(false),
            warnings: Mutex::new(Vec::new()),
            printed: Mutex::new(Vec::new()),
        })
    }

    // ------------------------------------------------------------------------
    // Construction helpers
    // ------------------------------------------------------------------------

    /// The universal root type
    pub fn object_type(&self) -> ObjRef {
        self.object_type.clone()
    }

    /// The binding root type
    pub fn binding_root(&self) -> ObjRef {
        self.binding_root.clone()
    }

    /// Create a class. Classes without bases derive from the universal root.
    pub fn class(&self, name: &str, bases: &[ObjRef], role: TypeRole) -> ObjRef {
        let bases = if bases.is_empty() {
            vec![self.object_type.clone()]
        } else {
            bases.to_vec()
        };
        ObjRef::new(Class {
            name: name.to_string(),
            bases,
            role,
            members: RwLock::new(Vec::new()),
            watchers: Arc::new(Mutex::new(Watchers::default())),
        })
    }

    /// Create the wrapper type of a native class
    pub fn native_class(&self, name: &str) -> ObjRef {
        self.class(name, &[self.binding_root.clone()], TypeRole::NativeWrapper)
    }

    /// Add or replace a class member
    pub fn define(&self, class: &ObjRef, name: &str, value: Value) {
        if let Some(class) = class.downcast_ref::<Class>() {
            let mut members = class.members.write();
            match members.iter_mut().find(|(key, _)| key == name) {
                Some(entry) => entry.1 = value,
                None => members.push((name.to_string(), value)),
            }
        }
    }

    /// Create an instance of `class`
    pub fn instance(&self, class: &ObjRef) -> ObjRef {
        let class_name = class
            .downcast_ref::<Class>()
            .map(|c| c.name.clone())
            .unwrap_or_else(|| "object".to_string());
        ObjRef::new(Instance {
            class: class.clone(),
            class_name,
            attrs: RwLock::new(FxHashMap::default()),
            watchers: Arc::new(Mutex::new(Watchers::default())),
        })
    }

    fn make_function<F>(name: &str, params: Option<usize>, compiled: bool, body: F) -> ObjRef
    where
        F: Fn(&[Value]) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        ObjRef::new(Function {
            name: name.to_string(),
            params,
            compiled,
            body: Arc::new(body),
            attrs: RwLock::new(FxHashMap::default()),
        })
    }

    /// Create a function taking exactly `params` positional arguments
    /// (including the receiver when used as a method)
    pub fn function<F>(&self, name: &str, params: usize, body: F) -> ObjRef
    where
        F: Fn(&[Value]) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        Self::make_function(name, Some(params), false, body)
    }

    /// Create a function accepting any number of arguments
    pub fn varargs_function<F>(&self, name: &str, body: F) -> ObjRef
    where
        F: Fn(&[Value]) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        Self::make_function(name, None, false, body)
    }

    /// Create a compiled function; binding it yields a compiled method
    pub fn compiled_function<F>(&self, name: &str, params: usize, body: F) -> ObjRef
    where
        F: Fn(&[Value]) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        Self::make_function(name, Some(params), true, body)
    }

    /// Create an opaque callable object
    pub fn callable_object<F>(&self, name: &str, body: F) -> ObjRef
    where
        F: Fn(&[Value]) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        ObjRef::new(CallableObject {
            name: name.to_string(),
            body: Arc::new(body),
        })
    }

    /// Attach slot declarations to a function, as the slot decorator does
    pub fn mark_slots(&self, function: &ObjRef, slots: Vec<SlotDecl>) {
        if let Some(f) = function.downcast_ref::<Function>() {
            f.attrs
                .write()
                .insert(SLOT_LIST_ATTR.to_string(), Value::Object(ObjRef::new(SlotList(slots))));
        }
    }

    /// Look up a bound method or callable attribute
    pub fn method(&self, obj: &ObjRef, name: &str) -> Option<ObjRef> {
        self.get_attr(obj, name).ok().and_then(|v| v.as_object().cloned())
    }

    // ------------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------------

    /// Escalate warnings to errors
    pub fn set_warnings_as_errors(&self, enabled: bool) {
        *self.warnings_as_errors.write() = enabled;
    }

    /// Messages of all warnings emitted so far
    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().iter().map(|(_, m)| m.clone()).collect()
    }

    /// Errors printed so far, rendered as `Type: message`
    pub fn printed_errors(&self) -> Vec<String> {
        self.printed.lock().clone()
    }

    /// Recursion limit in effect during the last error print
    pub fn limit_seen_while_printing(&self) -> Option<u32> {
        u32::try_from(self.limit_while_printing.load(Ordering::SeqCst)).ok()
    }

    /// Number of function bodies run so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Forget collected warnings and errors
    pub fn clear_diagnostics(&self) {
        self.warnings.lock().clear();
        self.printed.lock().clear();
    }

    // ------------------------------------------------------------------------
    // Object model
    // ------------------------------------------------------------------------

    fn linearize(ty: &ObjRef) -> Vec<ObjRef> {
        let Some(class) = ty.downcast_ref::<Class>() else {
            return vec![ty.clone()];
        };
        let mut sequences: Vec<Vec<ObjRef>> = class.bases.iter().map(Self::linearize).collect();
        sequences.push(class.bases.clone());

        let mut out = vec![ty.clone()];
        loop {
            sequences.retain(|s| !s.is_empty());
            if sequences.is_empty() {
                break;
            }
            let candidate = sequences.iter().map(|s| s[0].clone()).find(|c| {
                !sequences
                    .iter()
                    .any(|s| s[1..].iter().any(|t| t.ptr_eq(c)))
            });
            let Some(next) = candidate else {
                log::warn!("inconsistent class hierarchy for {}", class.name);
                break;
            };
            for sequence in sequences.iter_mut() {
                if sequence[0].ptr_eq(&next) {
                    sequence.remove(0);
                }
            }
            out.push(next);
        }
        out
    }

    fn lookup_member(ty: &ObjRef, name: &str) -> Option<Value> {
        Self::linearize(ty).iter().find_map(|t| {
            t.downcast_ref::<Class>().and_then(|c| {
                c.members
                    .read()
                    .iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, v)| v.clone())
            })
        })
    }

    fn bind_member(value: Value, receiver: &ObjRef) -> Value {
        match &value {
            Value::Object(obj) => match obj.downcast_ref::<Function>() {
                Some(f) => Value::Object(ObjRef::new(BoundMethod {
                    function: obj.clone(),
                    receiver: receiver.clone(),
                    compiled: f.compiled,
                })),
                None => value,
            },
            _ => value,
        }
    }

    fn attribute_error(obj: &ObjRef, name: &str) -> RuntimeError {
        RuntimeError::Attribute(format!(
            "'{}' object has no attribute '{}'",
            obj.type_name(),
            name
        ))
    }
}

impl DynamicRuntime for MemoryRuntime {
    fn interpreter_lock(&self) -> &InterpreterLock {
        &self.lock
    }

    fn get_attr(&self, obj: &ObjRef, name: &str) -> RuntimeResult<Value> {
        if let Some(instance) = obj.downcast_ref::<Instance>() {
            if let Some(value) = instance.attrs.read().get(name).cloned() {
                return Ok(value);
            }
            return Self::lookup_member(&instance.class, name)
                .map(|v| Self::bind_member(v, obj))
                .ok_or_else(|| Self::attribute_error(obj, name));
        }
        if let Some(function) = obj.downcast_ref::<Function>() {
            if name == "__name__" {
                return Ok(Value::str(&function.name));
            }
            return function
                .attrs
                .read()
                .get(name)
                .cloned()
                .ok_or_else(|| Self::attribute_error(obj, name));
        }
        if let Some(method) = obj.downcast_ref::<BoundMethod>() {
            return match name {
                "im_func" | "__func__" => Ok(Value::Object(method.function.clone())),
                "im_self" | "__self__" => Ok(Value::Object(method.receiver.clone())),
                _ => self.get_attr(&method.function, name),
            };
        }
        if let Some(class) = obj.downcast_ref::<Class>() {
            if name == "__name__" {
                return Ok(Value::str(&class.name));
            }
            return Self::lookup_member(obj, name).ok_or_else(|| Self::attribute_error(obj, name));
        }
        Err(Self::attribute_error(obj, name))
    }

    fn set_attr(&self, obj: &ObjRef, name: &str, value: Value) -> RuntimeResult<()> {
        if let Some(instance) = obj.downcast_ref::<Instance>() {
            instance.attrs.write().insert(name.to_string(), value);
            return Ok(());
        }
        if let Some(function) = obj.downcast_ref::<Function>() {
            function.attrs.write().insert(name.to_string(), value);
            return Ok(());
        }
        if obj.downcast_ref::<Class>().is_some() {
            self.define(obj, name, value);
            return Ok(());
        }
        Err(RuntimeError::Attribute(format!(
            "'{}' object attribute '{}' is read-only",
            obj.type_name(),
            name
        )))
    }

    fn has_attr(&self, obj: &ObjRef, name: &str) -> bool {
        self.get_attr(obj, name).is_ok()
    }

    fn is_callable(&self, obj: &ObjRef) -> bool {
        obj.downcast_ref::<Function>().is_some()
            || obj.downcast_ref::<BoundMethod>().is_some()
            || obj.downcast_ref::<CallableObject>().is_some()
    }

    fn call(&self, callable: &ObjRef, args: Vec<Value>) -> RuntimeResult<Value> {
        if let Some(function) = callable.downcast_ref::<Function>() {
            if let Some(params) = function.params {
                if args.len() != params {
                    return Err(RuntimeError::Type(format!(
                        "{}() takes {} positional arguments but {} were given",
                        function.name,
                        params,
                        args.len()
                    )));
                }
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            return (function.body)(&args);
        }
        if let Some(method) = callable.downcast_ref::<BoundMethod>() {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(Value::Object(method.receiver.clone()));
            full.extend(args);
            return self.call(&method.function, full);
        }
        if let Some(object) = callable.downcast_ref::<CallableObject>() {
            self.calls.fetch_add(1, Ordering::SeqCst);
            log::trace!("calling {}", object.name);
            return (object.body)(&args);
        }
        Err(RuntimeError::Type(format!(
            "'{}' object is not callable",
            callable.type_name()
        )))
    }

    fn bound_method_parts(&self, obj: &ObjRef) -> Option<(ObjRef, ObjRef)> {
        obj.downcast_ref::<BoundMethod>()
            .map(|m| (m.function.clone(), m.receiver.clone()))
    }

    fn is_compiled_method(&self, obj: &ObjRef) -> bool {
        obj.downcast_ref::<BoundMethod>().is_some_and(|m| m.compiled)
    }

    fn is_function(&self, obj: &ObjRef) -> bool {
        obj.downcast_ref::<Function>().is_some()
    }

    fn bind(&self, function: &ObjRef, receiver: &ObjRef) -> RuntimeResult<ObjRef> {
        match function.downcast_ref::<Function>() {
            Some(f) => Ok(ObjRef::new(BoundMethod {
                function: function.clone(),
                receiver: receiver.clone(),
                compiled: f.compiled,
            })),
            None => Err(RuntimeError::Type(format!(
                "cannot bind '{}' object",
                function.type_name()
            ))),
        }
    }

    fn function_name(&self, obj: &ObjRef) -> Option<String> {
        if let Some(function) = obj.downcast_ref::<Function>() {
            return Some(function.name.clone());
        }
        obj.downcast_ref::<BoundMethod>()
            .and_then(|m| self.function_name(&m.function))
    }

    fn function_arity(&self, obj: &ObjRef) -> Option<usize> {
        if let Some(function) = obj.downcast_ref::<Function>() {
            return function.params;
        }
        obj.downcast_ref::<BoundMethod>()
            .and_then(|m| self.function_arity(&m.function))
            .map(|params| params.saturating_sub(1))
    }

    fn type_of(&self, obj: &ObjRef) -> ObjRef {
        match obj.downcast_ref::<Instance>() {
            Some(instance) => instance.class.clone(),
            None => self.object_type.clone(),
        }
    }

    fn type_name(&self, ty: &ObjRef) -> String {
        ty.downcast_ref::<Class>()
            .map(|c| c.name.clone())
            .unwrap_or_else(|| ty.type_name().to_string())
    }

    fn type_mro(&self, ty: &ObjRef) -> Vec<ObjRef> {
        Self::linearize(ty)
    }

    fn type_members(&self, ty: &ObjRef) -> Vec<(String, Value)> {
        ty.downcast_ref::<Class>()
            .map(|c| c.members.read().clone())
            .unwrap_or_default()
    }

    fn type_role(&self, ty: &ObjRef) -> TypeRole {
        ty.downcast_ref::<Class>()
            .map_or(TypeRole::Plain, |c| c.role)
    }

    fn watch(&self, obj: &ObjRef, on_death: DeathCallback) -> RuntimeResult<Box<dyn WeakSlot>> {
        let watchers = match (obj.downcast_ref::<Instance>(), obj.downcast_ref::<Class>()) {
            (Some(instance), _) => &instance.watchers,
            (None, Some(class)) => &class.watchers,
            (None, None) => {
                return Err(RuntimeError::Type(format!(
                    "cannot create weak reference to '{}' object",
                    obj.type_name()
                )))
            }
        };
        let id = {
            let mut watchers = watchers.lock();
            watchers.next += 1;
            let id = watchers.next;
            watchers.entries.push((id, on_death));
            id
        };
        Ok(Box::new(WatchedSlot {
            target: obj.downgrade(),
            watchers: Arc::downgrade(watchers),
            id,
        }))
    }

    fn warn(&self, category: WarningCategory, message: &str) -> RuntimeResult<()> {
        self.warnings.lock().push((category, message.to_string()));
        if *self.warnings_as_errors.read() {
            return Err(RuntimeError::Warning(message.to_string()));
        }
        Ok(())
    }

    fn print_error(&self, error: &RuntimeError) {
        self.limit_while_printing
            .store(u64::from(self.recursion_limit()), Ordering::SeqCst);
        self.printed.lock().push(error.to_string());
    }

    fn recursion_limit(&self) -> u32 {
        self.recursion_limit.load(Ordering::SeqCst)
    }

    fn set_recursion_limit(&self, limit: u32) {
        self.recursion_limit.store(limit, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mro_is_c3() {
        let runtime = MemoryRuntime::new();
        let base = runtime.native_class("QObject");
        let mixin = runtime.class("Mixin", &[], TypeRole::Plain);
        let derived = runtime.class("Derived", &[base.clone(), mixin.clone()], TypeRole::NativeDerived);

        let names: Vec<String> = runtime
            .type_mro(&derived)
            .iter()
            .map(|t| runtime.type_name(t))
            .collect();
        assert_eq!(names, vec!["Derived", "QObject", "Shiboken.Object", "Mixin", "object"]);
    }

    #[test]
    fn test_methods_bind_fresh_each_time() {
        let runtime = MemoryRuntime::new();
        let class = runtime.class("Handler", &[], TypeRole::Plain);
        let f = runtime.function("handle", 2, |args| Ok(args[1].clone()));
        runtime.define(&class, "handle", Value::Object(f.clone()));
        let instance = runtime.instance(&class);

        let a = runtime.method(&instance, "handle").unwrap();
        let b = runtime.method(&instance, "handle").unwrap();
        assert!(!a.ptr_eq(&b));
        assert_eq!(runtime.function_arity(&a), Some(1));
        assert_eq!(runtime.call(&a, vec![Value::Int(4)]).unwrap(), Value::Int(4));

        let err = runtime.call(&a, vec![]).unwrap_err();
        assert_eq!(err.type_name(), "TypeError");
    }

    #[test]
    fn test_class_death_runs_watchers() {
        let runtime = MemoryRuntime::new();
        let class = runtime.class("Transient", &[], TypeRole::Plain);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let slot = runtime
            .watch(
                &class,
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        let instance = runtime.instance(&class);
        drop(class);
        assert!(slot.upgrade().is_some());
        drop(instance);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(slot.upgrade().is_none());

        let function = runtime.function("f", 0, |_| Ok(Value::None));
        assert!(runtime.watch(&function, Box::new(|| {})).is_err());
    }

    #[test]
    fn test_warnings_can_escalate() {
        let runtime = MemoryRuntime::new();
        assert!(runtime.warn(WarningCategory::Runtime, "first").is_ok());
        runtime.set_warnings_as_errors(true);
        assert_eq!(
            runtime.warn(WarningCategory::Runtime, "second"),
            Err(RuntimeError::Warning("second".to_string()))
        );
        assert_eq!(runtime.warnings(), vec!["first", "second"]);
    }
}
