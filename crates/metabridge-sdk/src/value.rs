//! Values on both sides of the bridge
//!
//! - [`Value`] / [`ObjRef`]: values owned by the dynamic runtime. Object
//!   handles are strong references; dropping the last one is what makes a
//!   dynamic-runtime object unreachable.
//! - [`NativeValue`]: values as the native framework passes them through
//!   its dispatch entry point.
//! - [`ObjectId`]: identity of a native object.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

// ============================================================================
// Dynamic-runtime objects
// ============================================================================

/// An object allocated by the dynamic runtime.
///
/// The runtime owns the concrete types; the bridge only downcasts to the
/// declaration objects it defines itself (signals, properties, slot lists).
pub trait ForeignObject: Any + Send + Sync {
    /// Name of the object's runtime type, used in messages
    fn type_name(&self) -> &str;

    /// Upcast for downcasting to a concrete type
    fn as_any(&self) -> &dyn Any;
}

/// Strong handle to a dynamic-runtime object.
///
/// Identity is the address of the shared allocation, which never calls into
/// the object's own equality or hashing.
#[derive(Clone)]
pub struct ObjRef(Arc<dyn ForeignObject>);

impl ObjRef {
    /// Wrap a freshly allocated object
    pub fn new<T: ForeignObject>(object: T) -> Self {
        ObjRef(Arc::new(object))
    }

    /// Wrap an existing shared allocation
    pub fn from_arc(object: Arc<dyn ForeignObject>) -> Self {
        ObjRef(object)
    }

    /// Stable identity of the underlying object
    #[inline]
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const u8 as usize
    }

    /// True if both handles refer to the same object
    #[inline]
    pub fn ptr_eq(&self, other: &ObjRef) -> bool {
        self.identity() == other.identity()
    }

    /// Runtime type name of the object
    pub fn type_name(&self) -> &str {
        self.0.type_name()
    }

    /// Downcast to a concrete object type
    pub fn downcast_ref<T: ForeignObject>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    /// Number of strong handles currently alive
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Create a non-owning handle
    pub fn downgrade(&self) -> WeakObjRef {
        WeakObjRef(Arc::downgrade(&self.0))
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} object at {:#x}>", self.type_name(), self.identity())
    }
}

/// Non-owning handle to a dynamic-runtime object
#[derive(Clone)]
pub struct WeakObjRef(Weak<dyn ForeignObject>);

impl WeakObjRef {
    /// Recover a strong handle if the object is still alive
    pub fn upgrade(&self) -> Option<ObjRef> {
        self.0.upgrade().map(ObjRef)
    }

    /// True if the object is still alive
    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    /// Identity of the referenced object (stable even after death)
    pub fn identity(&self) -> usize {
        self.0.as_ptr() as *const u8 as usize
    }
}

impl fmt::Debug for WeakObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<weakref at {:#x}; {}>",
            self.identity(),
            if self.is_alive() { "alive" } else { "dead" }
        )
    }
}

/// A value of the dynamic runtime
#[derive(Clone, Default)]
pub enum Value {
    /// The runtime's null value
    #[default]
    None,
    /// Boolean
    Bool(bool),
    /// Arbitrary-width integer (clamped to i64)
    Int(i64),
    /// Float
    Float(f64),
    /// Immutable string
    Str(Arc<str>),
    /// Reference to a heap object
    Object(ObjRef),
}

impl Value {
    /// Create a string value
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    /// True if this is the null value
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Get as bool if this is a bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as integer if this is an int
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as float if this is a float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as string slice if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Get the object handle if this is an object
    pub fn as_object(&self) -> Option<&ObjRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Runtime type name of the value
    pub fn type_name(&self) -> &str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Object(o) => o.type_name(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Object(o) => write!(f, "{:?}", o),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<ObjRef> for Value {
    fn from(o: ObjRef) -> Self {
        Value::Object(o)
    }
}

// ============================================================================
// Native side
// ============================================================================

/// Unique identifier for a native object
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Allocate a new unique object ID
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A value as it travels through native dispatch.
///
/// Dispatch argument arrays follow the native convention: slot 0 receives
/// the return value, slots 1.. hold the arguments.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum NativeValue {
    /// No value (void return slot, unset property)
    #[default]
    Invalid,
    /// Boolean
    Bool(bool),
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    LongLong(i64),
    /// Double precision float
    Double(f64),
    /// UTF-8 string
    String(String),
    /// Pointer to a native object
    Object(ObjectId),
    /// Opaque wrapper around a dynamic-runtime value
    Foreign(Value),
}

impl NativeValue {
    /// Create a 32-bit integer value
    pub fn i32(i: i32) -> Self {
        NativeValue::Int(i)
    }

    /// Create a 64-bit integer value
    pub fn i64(i: i64) -> Self {
        NativeValue::LongLong(i)
    }

    /// Create a 64-bit float value
    pub fn f64(f: f64) -> Self {
        NativeValue::Double(f)
    }

    /// Create a string value
    pub fn string(s: &str) -> Self {
        NativeValue::String(s.to_string())
    }

    /// True if this slot holds no value
    pub fn is_invalid(&self) -> bool {
        matches!(self, NativeValue::Invalid)
    }

    /// Get as i32 if this is an i32
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            NativeValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as i64 if this is an i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            NativeValue::LongLong(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64 if this is a double
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            NativeValue::Double(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as bool if this is a bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            NativeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as string slice if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            NativeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the object ID if this is an object pointer
    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            NativeValue::Object(id) => Some(*id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    impl ForeignObject for Dummy {
        fn type_name(&self) -> &str {
            "Dummy"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_objref_identity() {
        let a = ObjRef::new(Dummy);
        let b = a.clone();
        let c = ObjRef::new(Dummy);

        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(a.identity(), b.identity());
        assert!(a.downcast_ref::<Dummy>().is_some());
    }

    #[test]
    fn test_weak_objref_dies_with_last_strong() {
        let a = ObjRef::new(Dummy);
        let weak = a.downgrade();
        let identity = a.identity();

        assert!(weak.is_alive());
        drop(a);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
        assert_eq!(weak.identity(), identity);
    }

    #[test]
    fn test_value_equality_uses_identity() {
        let a = ObjRef::new(Dummy);
        let b = ObjRef::new(Dummy);

        assert_eq!(Value::Object(a.clone()), Value::Object(a));
        assert_ne!(Value::Object(b), Value::None);
        assert_eq!(Value::from(3), Value::Int(3));
        assert_eq!(Value::from("x").as_str(), Some("x"));
    }

    #[test]
    fn test_object_ids_are_unique() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_native_value_accessors() {
        assert_eq!(NativeValue::i32(7).as_i32(), Some(7));
        assert_eq!(NativeValue::f64(1.5).as_f64(), Some(1.5));
        assert_eq!(NativeValue::string("s").as_str(), Some("s"));
        assert!(NativeValue::default().is_invalid());
        assert_eq!(NativeValue::Bool(true).as_i32(), None);
    }
}
