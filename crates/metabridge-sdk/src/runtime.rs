//! Dynamic runtime collaborator interface
//!
//! The bridge consumes the dynamic runtime only through [`DynamicRuntime`]:
//! attribute access, calls, type introspection, weak references and the
//! warning channel. The runtime decides what its objects are; the bridge
//! decides when to touch them.
//!
//! ## Threading
//!
//! All methods except [`DynamicRuntime::interpreter_lock`] must be called
//! with the interpreter token held.

use crate::error::{RuntimeError, RuntimeResult};
use crate::lock::InterpreterLock;
use crate::value::{ObjRef, Value};

/// Callback run once when a watched object dies
pub type DeathCallback = Box<dyn FnOnce() + Send>;

/// Registered weak reference with a death callback
pub trait WeakSlot: Send + Sync {
    /// Recover the referent if it is still alive
    fn upgrade(&self) -> Option<ObjRef>;

    /// Unregister the death callback without running it
    fn cancel(&self);
}

/// Category of a runtime warning
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WarningCategory {
    /// Something went wrong at run time but execution continues
    Runtime,
    /// Use of a deprecated feature
    Deprecation,
    /// Generic user-facing warning
    User,
}

/// Role a type plays in a class hierarchy, as far as reflection is concerned
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TypeRole {
    /// The universal root type of the runtime (`object`)
    UniversalRoot,
    /// The root type of the binding layer
    BindingRoot,
    /// A wrapper around a native class with a static reflection table
    NativeWrapper,
    /// A user-defined type derived from a native wrapper
    NativeDerived,
    /// Any other user-defined type or mixin
    Plain,
}

/// Operations the bridge needs from the dynamic runtime
pub trait DynamicRuntime: Send + Sync {
    /// The global execution token
    fn interpreter_lock(&self) -> &InterpreterLock;

    // ========================================================================
    // Attributes and calls
    // ========================================================================

    /// Look up an attribute, binding methods to the instance
    fn get_attr(&self, obj: &ObjRef, name: &str) -> RuntimeResult<Value>;

    /// Set an attribute
    fn set_attr(&self, obj: &ObjRef, name: &str, value: Value) -> RuntimeResult<()>;

    /// True if the attribute exists
    fn has_attr(&self, obj: &ObjRef, name: &str) -> bool;

    /// True if the object can be called
    fn is_callable(&self, obj: &ObjRef) -> bool;

    /// Call an object with positional arguments
    fn call(&self, callable: &ObjRef, args: Vec<Value>) -> RuntimeResult<Value>;

    // ========================================================================
    // Functions and bound methods
    // ========================================================================

    /// Split a bound method into `(function, self)`.
    ///
    /// Returns `None` for anything that is not a bound method. Compiled
    /// methods that expose their function and receiver as attributes count.
    fn bound_method_parts(&self, obj: &ObjRef) -> Option<(ObjRef, ObjRef)>;

    /// True if the object is a compiled method (function and receiver
    /// exposed as attributes rather than natively)
    fn is_compiled_method(&self, obj: &ObjRef) -> bool;

    /// True if the object is a plain function
    fn is_function(&self, obj: &ObjRef) -> bool;

    /// Bind a function to a receiver, producing a fresh bound method
    fn bind(&self, function: &ObjRef, receiver: &ObjRef) -> RuntimeResult<ObjRef>;

    /// Name of a function or method
    fn function_name(&self, obj: &ObjRef) -> Option<String>;

    /// Number of positional parameters excluding the receiver.
    ///
    /// `None` means the callable accepts any number of arguments.
    fn function_arity(&self, obj: &ObjRef) -> Option<usize>;

    // ========================================================================
    // Types
    // ========================================================================

    /// The type of an instance
    fn type_of(&self, obj: &ObjRef) -> ObjRef;

    /// Name of a type
    fn type_name(&self, ty: &ObjRef) -> String;

    /// Method resolution order, starting with the type itself
    fn type_mro(&self, ty: &ObjRef) -> Vec<ObjRef>;

    /// The type's own namespace in definition order
    fn type_members(&self, ty: &ObjRef) -> Vec<(String, Value)>;

    /// Reflection role of a type
    fn type_role(&self, ty: &ObjRef) -> TypeRole;

    // ========================================================================
    // Lifetime and diagnostics
    // ========================================================================

    /// Create a weak reference that runs `on_death` when `obj` dies
    fn watch(&self, obj: &ObjRef, on_death: DeathCallback) -> RuntimeResult<Box<dyn WeakSlot>>;

    /// Emit a warning. Fails if the runtime escalates warnings to errors.
    fn warn(&self, category: WarningCategory, message: &str) -> RuntimeResult<()>;

    /// Print a pending error to the runtime's error stream
    fn print_error(&self, error: &RuntimeError);

    /// Current recursion limit
    fn recursion_limit(&self) -> u32;

    /// Change the recursion limit
    fn set_recursion_limit(&self, limit: u32);
}
