//! Concrete reflection tables
//!
//! A [`MetaTable`] is the immutable description of one class: its own
//! methods, properties, enumerators and class info, chained to an optional
//! superclass table. Offsets and counts are cumulative over the chain so an
//! absolute index means the same entry at every level, which is the contract
//! the native framework's activation and property machinery relies on.
//!
//! Tables materialized from a [`ReflectionDelta`](super::ReflectionDelta) may
//! contain removed entries; their indices resolve to `None` until the delta
//! is compacted and rebuilt.

use std::sync::Arc;

use bitflags::bitflags;
use once_cell::sync::Lazy;

use crate::defaults::{ROOT_CLASS_NAME, VOID_TYPE};
use crate::reflect::signature;

// ============================================================================
// Methods
// ============================================================================

/// Kind of a reflected method
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// Invokable plain method
    Method,
    /// Signal
    Signal,
    /// Slot
    Slot,
    /// Constructor
    Constructor,
}

impl MethodKind {
    /// Name used in formatted tables
    pub fn name(&self) -> &'static str {
        match self {
            MethodKind::Method => "Method",
            MethodKind::Signal => "Signal",
            MethodKind::Slot => "Slot",
            MethodKind::Constructor => "Constructor",
        }
    }

    /// True if a lookup for `self` accepts a method of kind `other`.
    ///
    /// `Method` lookups accept every non-constructor kind.
    pub fn accepts(&self, other: MethodKind) -> bool {
        match self {
            MethodKind::Method => other != MethodKind::Constructor,
            kind => *kind == other,
        }
    }
}

/// A reflected method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Method kind
    pub kind: MethodKind,
    /// Normalized signature, e.g. `valueChanged(int)`
    pub signature: String,
    /// Return type; `None` means void
    pub return_type: Option<String>,
    /// Parameter names (may be empty)
    pub parameter_names: Vec<String>,
    /// Free-form tag
    pub tag: Option<String>,
}

impl MethodDescriptor {
    /// Create a method descriptor with no return type
    pub fn new(kind: MethodKind, signature: impl Into<String>) -> Self {
        Self {
            kind,
            signature: signature.into(),
            return_type: None,
            parameter_names: Vec::new(),
            tag: None,
        }
    }

    /// Create a signal descriptor
    pub fn signal(signature: impl Into<String>) -> Self {
        Self::new(MethodKind::Signal, signature)
    }

    /// Create a slot descriptor
    pub fn slot(signature: impl Into<String>) -> Self {
        Self::new(MethodKind::Slot, signature)
    }

    /// Set the return type. Empty and `void` leave the method void.
    pub fn with_return_type(mut self, return_type: &str) -> Self {
        if !return_type.is_empty() && return_type != VOID_TYPE {
            self.return_type = Some(return_type.to_string());
        }
        self
    }

    /// Set the parameter names
    pub fn with_parameter_names(mut self, names: Vec<String>) -> Self {
        self.parameter_names = names;
        self
    }

    /// Set the tag. An empty tag is ignored.
    pub fn with_tag(mut self, tag: &str) -> Self {
        if !tag.is_empty() {
            self.tag = Some(tag.to_string());
        }
        self
    }

    /// Method name (the signature up to the parameter list)
    pub fn name(&self) -> &str {
        signature::method_name(&self.signature)
    }

    /// Parameter type names
    pub fn parameter_types(&self) -> Vec<String> {
        signature::parameter_types(&self.signature)
    }

    /// Return type name, `void` if none
    pub fn type_name(&self) -> &str {
        self.return_type.as_deref().unwrap_or(VOID_TYPE)
    }
}

// ============================================================================
// Properties
// ============================================================================

bitflags! {
    /// Boolean attributes of a reflected property
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct PropertyFlags: u32 {
        /// Has a getter
        const READABLE = 0x0001;
        /// Has a setter
        const WRITABLE = 0x0002;
        /// Has a reset function
        const RESETTABLE = 0x0004;
        /// Shown by designers
        const DESIGNABLE = 0x0008;
        /// Accessible from scripts
        const SCRIPTABLE = 0x0010;
        /// Saved with the object state
        const STORED = 0x0020;
        /// The user-facing property of the class
        const USER = 0x0040;
        /// Never changes after construction
        const CONSTANT = 0x0080;
        /// Cannot be overridden
        const FINAL = 0x0100;
    }
}

impl Default for PropertyFlags {
    fn default() -> Self {
        PropertyFlags::READABLE
            | PropertyFlags::WRITABLE
            | PropertyFlags::DESIGNABLE
            | PropertyFlags::SCRIPTABLE
            | PropertyFlags::STORED
    }
}

/// Whether a property's declared type resolved to a registered converter
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PropertyType {
    /// A converter is registered for the type name
    Known,
    /// No converter is registered; reads and writes cannot marshal
    Unknown,
}

/// A reflected property
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    /// Property name
    pub name: String,
    /// Declared type name
    pub type_name: String,
    /// Type resolution state
    pub property_type: PropertyType,
    /// Attribute flags
    pub flags: PropertyFlags,
    /// Absolute method index of the notify signal
    pub notify_signal: Option<usize>,
}

impl PropertyDescriptor {
    /// Create a property with a known type and default flags
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            property_type: PropertyType::Known,
            flags: PropertyFlags::default(),
            notify_signal: None,
        }
    }

    /// Replace the attribute flags
    pub fn with_flags(mut self, flags: PropertyFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the notify signal index
    pub fn with_notify(mut self, index: usize) -> Self {
        self.notify_signal = Some(index);
        self
    }

    /// True if the property's type resolved
    pub fn is_valid(&self) -> bool {
        self.property_type == PropertyType::Known
    }

    /// True if the property has a setter
    pub fn is_writable(&self) -> bool {
        self.flags.contains(PropertyFlags::WRITABLE)
    }

    /// True if the property has a reset function
    pub fn is_resettable(&self) -> bool {
        self.flags.contains(PropertyFlags::RESETTABLE)
    }
}

// ============================================================================
// Enumerators
// ============================================================================

/// A reflected enumerator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDescriptor {
    /// Enumerator name
    pub name: String,
    /// Values combine as flags
    pub is_flag: bool,
    /// Keys are scoped by the enumerator name
    pub is_scoped: bool,
    /// Ordered (key, value) pairs
    pub entries: Vec<(String, i32)>,
}

impl EnumDescriptor {
    /// Create an enumerator
    pub fn new(name: impl Into<String>, is_flag: bool, is_scoped: bool) -> Self {
        Self {
            name: name.into(),
            is_flag,
            is_scoped,
            entries: Vec::new(),
        }
    }

    /// Append a key
    pub fn with_key(mut self, key: impl Into<String>, value: i32) -> Self {
        self.entries.push((key.into(), value));
        self
    }

    /// Value of a key
    pub fn value_of(&self, key: &str) -> Option<i32> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| *v)
    }
}

// ============================================================================
// Table
// ============================================================================

/// Immutable reflection table of one class
#[derive(Debug)]
pub struct MetaTable {
    class_name: String,
    superclass: Option<Arc<MetaTable>>,
    methods: Vec<Option<MethodDescriptor>>,
    properties: Vec<Option<PropertyDescriptor>>,
    enumerators: Vec<EnumDescriptor>,
    class_info: Vec<(String, String)>,
    method_offset: usize,
    property_offset: usize,
    enumerator_offset: usize,
    class_info_offset: usize,
}

static ROOT_TABLE: Lazy<Arc<MetaTable>> = Lazy::new(|| {
    Arc::new(
        MetaTable::new(ROOT_CLASS_NAME, None)
            .with_method(
                MethodDescriptor::signal("destroyed(QObject*)")
                    .with_parameter_names(vec!["object".to_string()]),
            )
            .with_method(MethodDescriptor::signal("destroyed()"))
            .with_method(
                MethodDescriptor::signal("objectNameChanged(QString)")
                    .with_parameter_names(vec!["objectName".to_string()]),
            )
            .with_method(MethodDescriptor::slot("deleteLater()"))
            .with_property(PropertyDescriptor::new("objectName", "QString").with_notify(2)),
    )
});

impl MetaTable {
    /// Create an empty table for a class
    pub fn new(class_name: impl Into<String>, superclass: Option<Arc<MetaTable>>) -> Self {
        Self::from_parts(
            class_name.into(),
            superclass,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
    }

    pub(crate) fn from_parts(
        class_name: String,
        superclass: Option<Arc<MetaTable>>,
        methods: Vec<Option<MethodDescriptor>>,
        properties: Vec<Option<PropertyDescriptor>>,
        enumerators: Vec<EnumDescriptor>,
        class_info: Vec<(String, String)>,
    ) -> Self {
        let (method_offset, property_offset, enumerator_offset, class_info_offset) =
            match &superclass {
                Some(s) => (
                    s.method_count(),
                    s.property_count(),
                    s.enumerator_count(),
                    s.class_info_count(),
                ),
                None => (0, 0, 0, 0),
            };
        Self {
            class_name,
            superclass,
            methods,
            properties,
            enumerators,
            class_info,
            method_offset,
            property_offset,
            enumerator_offset,
            class_info_offset,
        }
    }

    /// The minimal native root table every object derives from
    pub fn root() -> Arc<MetaTable> {
        ROOT_TABLE.clone()
    }

    /// Append a method
    pub fn with_method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(Some(method));
        self
    }

    /// Append a signal by signature
    pub fn with_signal(self, signature: &str) -> Self {
        self.with_method(MethodDescriptor::signal(signature))
    }

    /// Append a slot by signature
    pub fn with_slot(self, signature: &str) -> Self {
        self.with_method(MethodDescriptor::slot(signature))
    }

    /// Append a property
    pub fn with_property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(Some(property));
        self
    }

    /// Append an enumerator
    pub fn with_enumerator(mut self, enumerator: EnumDescriptor) -> Self {
        self.enumerators.push(enumerator);
        self
    }

    /// Append class-level metadata
    pub fn with_class_info(mut self, key: &str, value: &str) -> Self {
        self.class_info.push((key.to_string(), value.to_string()));
        self
    }

    /// Class name
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Superclass table
    pub fn superclass(&self) -> Option<&Arc<MetaTable>> {
        self.superclass.as_ref()
    }

    /// True if `other` is this table or one of its superclasses
    pub fn inherits(&self, other: &MetaTable) -> bool {
        let mut current = Some(self);
        while let Some(table) = current {
            if std::ptr::eq(table, other) {
                return true;
            }
            current = table.superclass.as_deref();
        }
        false
    }

    // ------------------------------------------------------------------------
    // Methods
    // ------------------------------------------------------------------------

    /// Index of this class's first own method
    pub fn method_offset(&self) -> usize {
        self.method_offset
    }

    /// Number of methods including superclasses
    pub fn method_count(&self) -> usize {
        self.method_offset + self.methods.len()
    }

    /// Method at an absolute index; `None` if out of range or removed
    pub fn method(&self, index: usize) -> Option<&MethodDescriptor> {
        if index < self.method_offset {
            return self.superclass.as_ref()?.method(index);
        }
        self.methods.get(index - self.method_offset)?.as_ref()
    }

    /// Absolute index of a method of the given kind
    pub fn index_of_method(&self, kind: MethodKind, signature: &str) -> Option<usize> {
        let own = self.methods.iter().rposition(|m| {
            m.as_ref()
                .map_or(false, |m| kind.accepts(m.kind) && m.signature == signature)
        });
        match own {
            Some(i) => Some(self.method_offset + i),
            None => self.superclass.as_ref()?.index_of_method(kind, signature),
        }
    }

    /// Absolute index of a signal
    pub fn index_of_signal(&self, signature: &str) -> Option<usize> {
        self.index_of_method(MethodKind::Signal, signature)
    }

    /// Absolute index of a slot
    pub fn index_of_slot(&self, signature: &str) -> Option<usize> {
        self.index_of_method(MethodKind::Slot, signature)
    }

    // ------------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------------

    /// Index of this class's first own property
    pub fn property_offset(&self) -> usize {
        self.property_offset
    }

    /// Number of properties including superclasses
    pub fn property_count(&self) -> usize {
        self.property_offset + self.properties.len()
    }

    /// Property at an absolute index
    pub fn property(&self, index: usize) -> Option<&PropertyDescriptor> {
        if index < self.property_offset {
            return self.superclass.as_ref()?.property(index);
        }
        self.properties.get(index - self.property_offset)?.as_ref()
    }

    /// Absolute index of a property by name
    pub fn index_of_property(&self, name: &str) -> Option<usize> {
        let own = self
            .properties
            .iter()
            .position(|p| p.as_ref().map_or(false, |p| p.name == name));
        match own {
            Some(i) => Some(self.property_offset + i),
            None => self.superclass.as_ref()?.index_of_property(name),
        }
    }

    // ------------------------------------------------------------------------
    // Enumerators and class info
    // ------------------------------------------------------------------------

    /// Index of this class's first own enumerator
    pub fn enumerator_offset(&self) -> usize {
        self.enumerator_offset
    }

    /// Number of enumerators including superclasses
    pub fn enumerator_count(&self) -> usize {
        self.enumerator_offset + self.enumerators.len()
    }

    /// Enumerator at an absolute index
    pub fn enumerator(&self, index: usize) -> Option<&EnumDescriptor> {
        if index < self.enumerator_offset {
            return self.superclass.as_ref()?.enumerator(index);
        }
        self.enumerators.get(index - self.enumerator_offset)
    }

    /// Absolute index of an enumerator by name
    pub fn index_of_enumerator(&self, name: &str) -> Option<usize> {
        match self.enumerators.iter().position(|e| e.name == name) {
            Some(i) => Some(self.enumerator_offset + i),
            None => self.superclass.as_ref()?.index_of_enumerator(name),
        }
    }

    /// Index of this class's first own class-info entry
    pub fn class_info_offset(&self) -> usize {
        self.class_info_offset
    }

    /// Number of class-info entries including superclasses
    pub fn class_info_count(&self) -> usize {
        self.class_info_offset + self.class_info.len()
    }

    /// Class-info entry at an absolute index
    pub fn class_info(&self, index: usize) -> Option<(&str, &str)> {
        if index < self.class_info_offset {
            return self.superclass.as_ref()?.class_info(index);
        }
        self.class_info
            .get(index - self.class_info_offset)
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Value of a class-info key, most derived first
    pub fn class_info_value(&self, key: &str) -> Option<&str> {
        match self.class_info.iter().rev().find(|(k, _)| k == key) {
            Some((_, v)) => Some(v),
            None => self.superclass.as_ref()?.class_info_value(key),
        }
    }
}
