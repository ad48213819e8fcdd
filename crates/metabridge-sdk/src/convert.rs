//! Type converters between native and dynamic-runtime values
//!
//! The bridge never interprets native type names itself. It asks the
//! [`ConverterRegistry`] for a [`Converter`] by name; a missing converter is
//! what makes a property type "unknown" or a slot parameter unconvertible.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::{RuntimeError, RuntimeResult};
use crate::value::{NativeValue, Value};

/// Converts values of one native type to and from dynamic-runtime values
pub trait Converter: Send + Sync {
    /// Canonical native type name
    fn type_name(&self) -> &str;

    /// Convert a native value into a dynamic-runtime value
    fn to_foreign(&self, value: &NativeValue) -> Value;

    /// Convert a dynamic-runtime value into a native value
    fn to_native(&self, value: &Value) -> RuntimeResult<NativeValue>;
}

/// Registry of converters, keyed by normalized type name
pub struct ConverterRegistry {
    converters: RwLock<FxHashMap<String, Arc<dyn Converter>>>,
}

impl ConverterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            converters: RwLock::new(FxHashMap::default()),
        }
    }

    /// Create a registry pre-populated with the primitive converters
    pub fn with_primitives() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(IntConverter));
        registry.register(Arc::new(LongLongConverter));
        registry.register_alias("qint64", "qlonglong");
        registry.register(Arc::new(DoubleConverter));
        registry.register(Arc::new(BoolConverter));
        registry.register(Arc::new(StringConverter));
        registry.register(Arc::new(ObjectConverter));
        registry.register_alias("object", "PyObject");
        registry.register_alias("PyObjectWrapper", "PyObject");
        registry
    }

    /// Register a converter under its own type name
    pub fn register(&self, converter: Arc<dyn Converter>) {
        let name = normalize_type_name(converter.type_name());
        self.converters.write().insert(name, converter);
    }

    /// Make `alias` resolve to the converter registered for `target`.
    ///
    /// Returns false if `target` has no converter.
    pub fn register_alias(&self, alias: &str, target: &str) -> bool {
        let mut converters = self.converters.write();
        let Some(conv) = converters.get(&normalize_type_name(target)).cloned() else {
            return false;
        };
        converters.insert(normalize_type_name(alias), conv);
        true
    }

    /// Find a converter for a native type name
    pub fn find_converter(&self, type_name: &str) -> Option<Arc<dyn Converter>> {
        self.converters
            .read()
            .get(&normalize_type_name(type_name))
            .cloned()
    }

    /// True if a converter exists for the type name
    pub fn contains(&self, type_name: &str) -> bool {
        self.converters
            .read()
            .contains_key(&normalize_type_name(type_name))
    }

    /// Number of registered names (aliases included)
    pub fn len(&self) -> usize {
        self.converters.read().len()
    }

    /// True if no converters are registered
    pub fn is_empty(&self) -> bool {
        self.converters.read().is_empty()
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::with_primitives()
    }
}

/// Strip `const ` qualifiers and reference markers from a type name.
///
/// `const QString &` and `QString` name the same converter.
pub fn normalize_type_name(type_name: &str) -> String {
    let trimmed = type_name.trim();
    let trimmed = trimmed.strip_prefix("const ").unwrap_or(trimmed);
    trimmed.trim_end_matches('&').trim().to_string()
}

// ============================================================================
// Primitive converters
// ============================================================================

fn conversion_error(expected: &str, value: &Value) -> RuntimeError {
    RuntimeError::Type(format!(
        "'{}' object cannot be interpreted as {}",
        value.type_name(),
        expected
    ))
}

struct IntConverter;

impl Converter for IntConverter {
    fn type_name(&self) -> &str {
        "int"
    }

    fn to_foreign(&self, value: &NativeValue) -> Value {
        match value {
            NativeValue::Int(i) => Value::Int(*i as i64),
            NativeValue::LongLong(i) => Value::Int(*i),
            _ => Value::None,
        }
    }

    fn to_native(&self, value: &Value) -> RuntimeResult<NativeValue> {
        match value {
            Value::Int(i) => i32::try_from(*i)
                .map(NativeValue::Int)
                .map_err(|_| RuntimeError::Type(format!("{} does not fit in int", i))),
            Value::Bool(b) => Ok(NativeValue::Int(*b as i32)),
            other => Err(conversion_error("int", other)),
        }
    }
}

struct LongLongConverter;

impl Converter for LongLongConverter {
    fn type_name(&self) -> &str {
        "qlonglong"
    }

    fn to_foreign(&self, value: &NativeValue) -> Value {
        match value {
            NativeValue::Int(i) => Value::Int(*i as i64),
            NativeValue::LongLong(i) => Value::Int(*i),
            _ => Value::None,
        }
    }

    fn to_native(&self, value: &Value) -> RuntimeResult<NativeValue> {
        match value {
            Value::Int(i) => Ok(NativeValue::LongLong(*i)),
            Value::Bool(b) => Ok(NativeValue::LongLong(*b as i64)),
            other => Err(conversion_error("qlonglong", other)),
        }
    }
}

struct DoubleConverter;

impl Converter for DoubleConverter {
    fn type_name(&self) -> &str {
        "double"
    }

    fn to_foreign(&self, value: &NativeValue) -> Value {
        match value {
            NativeValue::Double(f) => Value::Float(*f),
            NativeValue::Int(i) => Value::Float(*i as f64),
            _ => Value::None,
        }
    }

    fn to_native(&self, value: &Value) -> RuntimeResult<NativeValue> {
        match value {
            Value::Float(f) => Ok(NativeValue::Double(*f)),
            Value::Int(i) => Ok(NativeValue::Double(*i as f64)),
            other => Err(conversion_error("double", other)),
        }
    }
}

struct BoolConverter;

impl Converter for BoolConverter {
    fn type_name(&self) -> &str {
        "bool"
    }

    fn to_foreign(&self, value: &NativeValue) -> Value {
        match value {
            NativeValue::Bool(b) => Value::Bool(*b),
            _ => Value::None,
        }
    }

    fn to_native(&self, value: &Value) -> RuntimeResult<NativeValue> {
        match value {
            Value::Bool(b) => Ok(NativeValue::Bool(*b)),
            other => Err(conversion_error("bool", other)),
        }
    }
}

struct StringConverter;

impl Converter for StringConverter {
    fn type_name(&self) -> &str {
        "QString"
    }

    fn to_foreign(&self, value: &NativeValue) -> Value {
        match value {
            NativeValue::String(s) => Value::str(s),
            _ => Value::None,
        }
    }

    fn to_native(&self, value: &Value) -> RuntimeResult<NativeValue> {
        match value {
            Value::Str(s) => Ok(NativeValue::String(s.to_string())),
            other => Err(conversion_error("str", other)),
        }
    }
}

/// Passes any dynamic value through as an opaque wrapper
struct ObjectConverter;

impl Converter for ObjectConverter {
    fn type_name(&self) -> &str {
        "PyObject"
    }

    fn to_foreign(&self, value: &NativeValue) -> Value {
        match value {
            NativeValue::Foreign(v) => v.clone(),
            _ => Value::None,
        }
    }

    fn to_native(&self, value: &Value) -> RuntimeResult<NativeValue> {
        Ok(NativeValue::Foreign(value.clone()))
    }
}
