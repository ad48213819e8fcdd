//! Native framework collaborator interface
//!
//! The native side owns objects with deterministic lifetimes, their static
//! reflection tables, signal activation and the connection machinery. The
//! bridge addresses it only through [`NativeObject`] and [`NativeFramework`].
//!
//! ## Dispatch convention
//!
//! `meta_call` receives an argument array whose slot 0 holds the return
//! value and slots 1.. the arguments. The returned code is the id minus the
//! handled range (negative when the call was consumed), mirroring how the
//! native framework chains dispatch through its class hierarchy.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use metabridge_sdk::{NativeValue, ObjRef, ObjectId};

use crate::reflect::{MetaTable, MethodDescriptor};

/// Kind of a native dispatch call
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MetaCall {
    /// Invoke a method (signal or slot)
    InvokeMetaMethod,
    /// Read a property into slot 0
    ReadProperty,
    /// Write slot 0 to a property
    WriteProperty,
    /// Reset a property to its default
    ResetProperty,
    /// Construct an instance
    CreateInstance,
    /// Resolve a method pointer to an index
    IndexOfMethod,
    /// Register the meta type of a property
    RegisterPropertyMetaType,
    /// Register the meta type of a method argument
    RegisterMethodArgumentMetaType,
    /// Obtain a bindable interface for a property
    BindableProperty,
    /// Framework-defined custom call
    CustomCall,
    /// Construct an instance in preallocated storage
    ConstructInPlace,
}

impl MetaCall {
    /// Name as the native framework prints it
    pub fn name(&self) -> &'static str {
        match self {
            MetaCall::InvokeMetaMethod => "InvokeMetaMethod",
            MetaCall::ReadProperty => "ReadProperty",
            MetaCall::WriteProperty => "WriteProperty",
            MetaCall::ResetProperty => "ResetProperty",
            MetaCall::CreateInstance => "CreateInstance",
            MetaCall::IndexOfMethod => "IndexOfMethod",
            MetaCall::RegisterPropertyMetaType => "RegisterPropertyMetaType",
            MetaCall::RegisterMethodArgumentMetaType => "RegisterMethodArgumentMetaType",
            MetaCall::BindableProperty => "BindableProperty",
            MetaCall::CustomCall => "CustomCall",
            MetaCall::ConstructInPlace => "ConstructInPlace",
        }
    }

    /// True for read/write/reset property calls
    pub fn is_property_access(&self) -> bool {
        matches!(
            self,
            MetaCall::ReadProperty | MetaCall::WriteProperty | MetaCall::ResetProperty
        )
    }
}

impl fmt::Display for MetaCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque handle to a native connection
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    /// Allocate a new unique connection handle
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// A native object that can be addressed by the dispatch machinery
pub trait NativeObject: Send + Sync {
    /// Identity of this object
    fn object_id(&self) -> ObjectId;

    /// The compile-time reflection table of the object's native class
    fn static_meta_table(&self) -> Arc<MetaTable>;

    /// The reflection table currently describing this object
    fn meta_table(&self) -> Arc<MetaTable> {
        self.static_meta_table()
    }

    /// Native dispatch entry point
    fn meta_call(
        &self,
        call: MetaCall,
        id: i32,
        args: &mut [NativeValue],
        sender: Option<ObjectId>,
    ) -> i32;
}

/// A connection target that is not a native object (an anonymous functor)
pub trait SlotFunctor: Send + Sync {
    /// Run the functor for an activation of `signal`
    fn invoke(&self, sender: ObjectId, signal: &MethodDescriptor, args: &mut [NativeValue]);
}

/// Listener for native object destruction
pub type DestroyedListener = Arc<dyn Fn(ObjectId) + Send + Sync>;

/// Operations the bridge needs from the native framework
pub trait NativeFramework: Send + Sync {
    /// Look up a live native object
    fn object(&self, id: ObjectId) -> Option<Arc<dyn NativeObject>>;

    /// The dynamic-runtime wrapper of a native object, if it has one
    fn companion(&self, id: ObjectId) -> Option<ObjRef>;

    /// The native object wrapped by a dynamic-runtime object
    fn native_of(&self, obj: &ObjRef) -> Option<ObjectId>;

    /// Activate a signal, invoking every connected receiver
    fn activate(&self, sender: ObjectId, signal_index: usize, args: &mut [NativeValue]);

    /// Connect a signal index to a receiver's method index.
    ///
    /// The framework holds the receiver weakly.
    fn connect(
        &self,
        sender: ObjectId,
        signal_index: usize,
        receiver: &Arc<dyn NativeObject>,
        slot_index: usize,
    ) -> Option<ConnectionHandle>;

    /// Connect a signal index to a functor
    fn connect_functor(
        &self,
        sender: ObjectId,
        signal_index: usize,
        functor: Arc<dyn SlotFunctor>,
    ) -> Option<ConnectionHandle>;

    /// Remove a connection by handle
    fn disconnect(&self, handle: ConnectionHandle) -> bool;

    /// Remove one connection between a signal and a receiver's method
    fn disconnect_one(
        &self,
        sender: ObjectId,
        signal_index: usize,
        receiver: ObjectId,
        slot_index: usize,
    ) -> bool;

    /// Subscribe to the "object destroyed" notification
    fn subscribe_destroyed(&self, listener: DestroyedListener);

    /// Set (or clear with `None`) a dynamic property on a native object
    fn set_dynamic_property(&self, object: ObjectId, name: &str, value: Option<NativeValue>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_call_names() {
        assert_eq!(MetaCall::InvokeMetaMethod.to_string(), "InvokeMetaMethod");
        assert!(MetaCall::ResetProperty.is_property_access());
        assert!(!MetaCall::BindableProperty.is_property_access());
    }

    #[test]
    fn test_connection_handles_unique() {
        assert_ne!(ConnectionHandle::new(), ConnectionHandle::new());
    }
}
