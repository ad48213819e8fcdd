//! Declaration objects
//!
//! Dynamic-runtime classes declare their signals, properties, slots and
//! enumerators by storing these objects in their namespace. Class scanning
//! recognizes them by downcasting; property dispatch uses [`PropertyDecl`]
//! to reach the accessor functions.

use std::any::Any;

use metabridge_sdk::{
    ConverterRegistry, DynamicRuntime, ForeignObject, NativeValue, ObjRef, RuntimeError, Value,
};

use crate::native::MetaCall;
use crate::reflect::table::PropertyFlags;

// ============================================================================
// Signals
// ============================================================================

/// A signal declared in a class namespace
#[derive(Debug, Clone, Default)]
pub struct SignalDecl {
    /// Explicit signal name; the attribute name is used when absent
    pub name: Option<String>,
    /// One parameter list per overload, e.g. `"int"` or `"int,QString"`
    pub signatures: Vec<String>,
    /// Parameter names shared by the overloads
    pub arguments: Vec<String>,
}

impl SignalDecl {
    /// Declare a signal with one overload
    pub fn new(parameters: &str) -> Self {
        Self {
            name: None,
            signatures: vec![parameters.to_string()],
            arguments: Vec::new(),
        }
    }

    /// Add another overload
    pub fn with_overload(mut self, parameters: &str) -> Self {
        self.signatures.push(parameters.to_string());
        self
    }

    /// Set an explicit name
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Set the parameter names
    pub fn with_arguments(mut self, arguments: &[&str]) -> Self {
        self.arguments = arguments.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Full signatures of all overloads, using `attribute` as fallback name
    pub fn full_signatures(&self, attribute: &str) -> Vec<String> {
        let name = self.name.as_deref().unwrap_or(attribute);
        self.signatures
            .iter()
            .map(|s| format!("{}({})", name, s))
            .collect()
    }
}

impl ForeignObject for SignalDecl {
    fn type_name(&self) -> &str {
        "Signal"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Slots
// ============================================================================

/// One slot signature attached to a callable by the slot decorator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDecl {
    /// Full slot signature
    pub signature: String,
    /// Result type name (empty or `void` for none)
    pub result_type: String,
    /// Free-form tag
    pub tag: String,
}

impl SlotDecl {
    /// Declare a void slot
    pub fn new(signature: &str) -> Self {
        Self {
            signature: signature.to_string(),
            result_type: String::new(),
            tag: String::new(),
        }
    }

    /// Set the result type
    pub fn with_result(mut self, result_type: &str) -> Self {
        self.result_type = result_type.to_string();
        self
    }

    /// Set the tag
    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = tag.to_string();
        self
    }
}

/// The slot list stored under the slot attribute of a decorated callable
#[derive(Debug, Clone, Default)]
pub struct SlotList(pub Vec<SlotDecl>);

impl ForeignObject for SlotList {
    fn type_name(&self) -> &str {
        "SlotList"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Enumerators
// ============================================================================

/// An enumeration registered for reflection on its enclosing class
#[derive(Debug, Clone)]
pub struct EnumDecl {
    /// Enumeration name
    pub name: String,
    /// Values combine as flags
    pub is_flag: bool,
    /// Ordered (key, value) pairs
    pub entries: Vec<(String, i32)>,
}

impl EnumDecl {
    /// Declare an enumeration
    pub fn new(name: &str, is_flag: bool, entries: &[(&str, i32)]) -> Self {
        Self {
            name: name.to_string(),
            is_flag,
            entries: entries.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }
}

impl ForeignObject for EnumDecl {
    fn type_name(&self) -> &str {
        "Enum"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Properties
// ============================================================================

/// A property declared in a class namespace
#[derive(Debug, Clone)]
pub struct PropertyDecl {
    /// Declared native type name
    pub type_name: String,
    /// Getter, called with the instance
    pub getter: Option<ObjRef>,
    /// Setter, called with the instance and the new value
    pub setter: Option<ObjRef>,
    /// Reset function, called with the instance
    pub reset: Option<ObjRef>,
    /// Signature of the notify signal
    pub notify: Option<String>,
    /// Designable, scriptable, stored, user, constant and final attributes
    pub attributes: PropertyFlags,
}

/// Why a property accessor call did not complete
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyCallError {
    /// No converter exists for the property's declared type
    UnknownType,
    /// The accessor is missing or raised
    Raised(RuntimeError),
}

impl PropertyDecl {
    /// Declare a property of the given type
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            getter: None,
            setter: None,
            reset: None,
            notify: None,
            attributes: PropertyFlags::DESIGNABLE
                | PropertyFlags::SCRIPTABLE
                | PropertyFlags::STORED,
        }
    }

    /// Set the getter
    pub fn with_getter(mut self, getter: ObjRef) -> Self {
        self.getter = Some(getter);
        self
    }

    /// Set the setter
    pub fn with_setter(mut self, setter: ObjRef) -> Self {
        self.setter = Some(setter);
        self
    }

    /// Set the reset function
    pub fn with_reset(mut self, reset: ObjRef) -> Self {
        self.reset = Some(reset);
        self
    }

    /// Set the notify signal signature
    pub fn with_notify(mut self, signature: &str) -> Self {
        self.notify = Some(signature.to_string());
        self
    }

    /// Replace the non-accessor attributes
    pub fn with_attributes(mut self, attributes: PropertyFlags) -> Self {
        self.attributes = attributes;
        self
    }

    /// Reflection flags: accessor presence plus declared attributes
    pub fn flags(&self) -> PropertyFlags {
        let mut flags = self.attributes
            & !(PropertyFlags::READABLE | PropertyFlags::WRITABLE | PropertyFlags::RESETTABLE);
        flags.set(PropertyFlags::READABLE, self.getter.is_some());
        flags.set(PropertyFlags::WRITABLE, self.setter.is_some());
        flags.set(PropertyFlags::RESETTABLE, self.reset.is_some());
        flags
    }

    /// Perform a read, write or reset on `instance`.
    ///
    /// Reads store the converted value in `args[0]`; writes take the new
    /// value from `args[0]`. Must be called with the interpreter token held.
    pub fn meta_call(
        &self,
        runtime: &dyn DynamicRuntime,
        converters: &ConverterRegistry,
        instance: &ObjRef,
        call: MetaCall,
        args: &mut [NativeValue],
    ) -> Result<(), PropertyCallError> {
        match call {
            MetaCall::ReadProperty => {
                let getter = self.accessor(&self.getter, "unreadable")?;
                let converter = converters
                    .find_converter(&self.type_name)
                    .ok_or(PropertyCallError::UnknownType)?;
                let value = runtime
                    .call(getter, vec![Value::Object(instance.clone())])
                    .map_err(PropertyCallError::Raised)?;
                let native = converter.to_native(&value).map_err(PropertyCallError::Raised)?;
                if let Some(slot) = args.first_mut() {
                    *slot = native;
                }
                Ok(())
            }
            MetaCall::WriteProperty => {
                let setter = self.accessor(&self.setter, "read-only")?;
                let converter = converters
                    .find_converter(&self.type_name)
                    .ok_or(PropertyCallError::UnknownType)?;
                let value = args
                    .first()
                    .map(|v| converter.to_foreign(v))
                    .unwrap_or_default();
                runtime
                    .call(setter, vec![Value::Object(instance.clone()), value])
                    .map(|_| ())
                    .map_err(PropertyCallError::Raised)
            }
            MetaCall::ResetProperty => {
                let reset = self.accessor(&self.reset, "not resettable")?;
                runtime
                    .call(reset, vec![Value::Object(instance.clone())])
                    .map(|_| ())
                    .map_err(PropertyCallError::Raised)
            }
            _ => Ok(()),
        }
    }

    fn accessor<'a>(
        &self,
        accessor: &'a Option<ObjRef>,
        what: &str,
    ) -> Result<&'a ObjRef, PropertyCallError> {
        accessor.as_ref().ok_or_else(|| {
            PropertyCallError::Raised(RuntimeError::Attribute(format!("property is {}", what)))
        })
    }
}

impl ForeignObject for PropertyDecl {
    fn type_name(&self) -> &str {
        "Property"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Find the property declaration named `name` on an instance's class
/// hierarchy, most derived first
pub fn find_property(runtime: &dyn DynamicRuntime, instance: &ObjRef, name: &str) -> Option<ObjRef> {
    let ty = runtime.type_of(instance);
    runtime.type_mro(&ty).iter().find_map(|t| {
        runtime
            .type_members(t)
            .into_iter()
            .find_map(|(key, value)| match value {
                Value::Object(obj) if key == name && obj.downcast_ref::<PropertyDecl>().is_some() => {
                    Some(obj)
                }
                _ => None,
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_full_signatures() {
        let decl = SignalDecl::new("int").with_overload("QString");
        assert_eq!(
            decl.full_signatures("changed"),
            vec!["changed(int)", "changed(QString)"]
        );
        let named = SignalDecl::new("").with_name("ready");
        assert_eq!(named.full_signatures("attr"), vec!["ready()"]);
    }

    #[test]
    fn test_property_flags_follow_accessors() {
        let decl = PropertyDecl::new("int");
        let flags = decl.flags();
        assert!(!flags.contains(PropertyFlags::READABLE));
        assert!(!flags.contains(PropertyFlags::WRITABLE));
        assert!(flags.contains(PropertyFlags::DESIGNABLE));

        let constant = PropertyDecl::new("int")
            .with_attributes(PropertyFlags::CONSTANT | PropertyFlags::WRITABLE);
        assert!(constant.flags().contains(PropertyFlags::CONSTANT));
        assert!(!constant.flags().contains(PropertyFlags::WRITABLE));
    }
}
