//! Incremental reflection patches
//!
//! A [`ReflectionDelta`] records what a derived class adds on top of its base
//! table. Method and property positions are stable: removal leaves a
//! tombstone so later indices do not shift. [`ReflectionDelta::compacted`]
//! drops the tombstones for a full rebuild.

use std::sync::Arc;

use crate::reflect::table::{
    EnumDescriptor, MetaTable, MethodDescriptor, MethodKind, PropertyDescriptor,
};

/// A slot in a delta that may have been removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaEntry<T> {
    /// Present entry
    Live(T),
    /// Removed entry; keeps its position
    Removed,
}

impl<T> DeltaEntry<T> {
    /// The entry if still present
    pub fn live(&self) -> Option<&T> {
        match self {
            DeltaEntry::Live(t) => Some(t),
            DeltaEntry::Removed => None,
        }
    }

    fn into_live(self) -> Option<T> {
        match self {
            DeltaEntry::Live(t) => Some(t),
            DeltaEntry::Removed => None,
        }
    }
}

/// Methods, properties, class info and enumerators added to a base table.
///
/// Method and property indices here are relative to the delta; absolute
/// indices add the base table's counts.
#[derive(Debug, Clone, Default)]
pub struct ReflectionDelta {
    methods: Vec<DeltaEntry<MethodDescriptor>>,
    properties: Vec<DeltaEntry<PropertyDescriptor>>,
    class_info: Vec<(String, String)>,
    enumerators: Vec<EnumDescriptor>,
}

impl ReflectionDelta {
    /// Create an empty delta
    pub fn new() -> Self {
        Self::default()
    }

    /// True if nothing was ever added
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
            && self.properties.is_empty()
            && self.class_info.is_empty()
            && self.enumerators.is_empty()
    }

    // ------------------------------------------------------------------------
    // Methods
    // ------------------------------------------------------------------------

    /// Append a method, returning its relative index
    pub fn push_method(&mut self, method: MethodDescriptor) -> usize {
        self.methods.push(DeltaEntry::Live(method));
        self.methods.len() - 1
    }

    /// Mark a method removed. Returns false if out of range or already removed.
    pub fn remove_method(&mut self, index: usize) -> bool {
        match self.methods.get_mut(index) {
            Some(entry) if matches!(entry, DeltaEntry::Live(_)) => {
                *entry = DeltaEntry::Removed;
                true
            }
            _ => false,
        }
    }

    /// Method at a relative index
    pub fn method(&self, index: usize) -> Option<&MethodDescriptor> {
        self.methods.get(index)?.live()
    }

    /// Number of method positions, removed ones included
    pub fn method_len(&self) -> usize {
        self.methods.len()
    }

    /// Relative index of a live method
    pub fn index_of_method(&self, kind: MethodKind, signature: &str) -> Option<usize> {
        self.methods.iter().position(|m| {
            m.live()
                .map_or(false, |m| kind.accepts(m.kind) && m.signature == signature)
        })
    }

    /// Live methods with their relative indices
    pub fn methods(&self) -> impl Iterator<Item = (usize, &MethodDescriptor)> {
        self.methods
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.live().map(|m| (i, m)))
    }

    // ------------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------------

    /// Append a property, returning its relative index
    pub fn push_property(&mut self, property: PropertyDescriptor) -> usize {
        self.properties.push(DeltaEntry::Live(property));
        self.properties.len() - 1
    }

    /// Mark a property removed
    pub fn remove_property(&mut self, index: usize) -> bool {
        match self.properties.get_mut(index) {
            Some(entry) if matches!(entry, DeltaEntry::Live(_)) => {
                *entry = DeltaEntry::Removed;
                true
            }
            _ => false,
        }
    }

    /// Property at a relative index
    pub fn property(&self, index: usize) -> Option<&PropertyDescriptor> {
        self.properties.get(index)?.live()
    }

    /// Number of property positions, removed ones included
    pub fn property_len(&self) -> usize {
        self.properties.len()
    }

    /// Relative index of a live property
    pub fn index_of_property(&self, name: &str) -> Option<usize> {
        self.properties
            .iter()
            .position(|p| p.live().map_or(false, |p| p.name == name))
    }

    // ------------------------------------------------------------------------
    // Class info and enumerators
    // ------------------------------------------------------------------------

    /// Append class-level metadata
    pub fn push_class_info(&mut self, key: &str, value: &str) {
        self.class_info.push((key.to_string(), value.to_string()));
    }

    /// Class-level metadata in insertion order
    pub fn class_info(&self) -> &[(String, String)] {
        &self.class_info
    }

    /// Add an enumerator, replacing any existing one of the same name
    pub fn set_enumerator(&mut self, enumerator: EnumDescriptor) {
        self.enumerators.retain(|e| e.name != enumerator.name);
        self.enumerators.push(enumerator);
    }

    /// Enumerators in insertion order
    pub fn enumerators(&self) -> &[EnumDescriptor] {
        &self.enumerators
    }

    // ------------------------------------------------------------------------
    // Rebuild
    // ------------------------------------------------------------------------

    /// Drop tombstones, renumbering the entries behind them.
    ///
    /// Notify-signal references into the delta are remapped; references to
    /// removed signals are cleared. `base_method_count` is the base table's
    /// method count the absolute notify indices are relative to.
    pub fn compacted(&self, base_method_count: usize) -> ReflectionDelta {
        let mut remap = Vec::with_capacity(self.methods.len());
        let mut next = 0usize;
        for entry in &self.methods {
            match entry {
                DeltaEntry::Live(_) => {
                    remap.push(Some(next));
                    next += 1;
                }
                DeltaEntry::Removed => remap.push(None),
            }
        }

        let methods = self
            .methods
            .iter()
            .filter(|m| matches!(m, DeltaEntry::Live(_)))
            .cloned()
            .collect();

        let properties = self
            .properties
            .iter()
            .filter_map(|p| p.live().cloned())
            .map(|mut p| {
                if let Some(notify) = p.notify_signal {
                    if notify >= base_method_count {
                        p.notify_signal = remap
                            .get(notify - base_method_count)
                            .copied()
                            .flatten()
                            .map(|i| i + base_method_count);
                    }
                }
                DeltaEntry::Live(p)
            })
            .collect();

        ReflectionDelta {
            methods,
            properties,
            class_info: self.class_info.clone(),
            enumerators: self.enumerators.clone(),
        }
    }

    /// Combine with a base table into a new concrete table
    pub fn materialize(&self, class_name: &str, base: &Arc<MetaTable>) -> MetaTable {
        MetaTable::from_parts(
            class_name.to_string(),
            Some(base.clone()),
            self.methods.iter().cloned().map(DeltaEntry::into_live).collect(),
            self.properties
                .iter()
                .cloned()
                .map(DeltaEntry::into_live)
                .collect(),
            self.enumerators.clone(),
            self.class_info.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_keeps_positions() {
        let mut delta = ReflectionDelta::new();
        let a = delta.push_method(MethodDescriptor::signal("a()"));
        let b = delta.push_method(MethodDescriptor::slot("b()"));

        assert!(delta.remove_method(a));
        assert!(!delta.remove_method(a));
        assert_eq!(delta.method_len(), 2);
        assert!(delta.method(a).is_none());
        assert_eq!(delta.index_of_method(MethodKind::Slot, "b()"), Some(b));
    }

    #[test]
    fn test_compacted_remaps_notify() {
        let mut delta = ReflectionDelta::new();
        let removed = delta.push_method(MethodDescriptor::signal("gone()"));
        let kept = delta.push_method(MethodDescriptor::signal("changed(int)"));
        delta.push_property(PropertyDescriptor::new("value", "int").with_notify(4 + kept));
        delta.push_property(PropertyDescriptor::new("old", "int").with_notify(4 + removed));
        delta.remove_method(removed);

        let compact = delta.compacted(4);
        assert_eq!(compact.method_len(), 1);
        assert_eq!(compact.index_of_method(MethodKind::Signal, "changed(int)"), Some(0));
        assert_eq!(compact.property(0).and_then(|p| p.notify_signal), Some(4));
        assert_eq!(compact.property(1).and_then(|p| p.notify_signal), None);
    }

    #[test]
    fn test_set_enumerator_replaces() {
        let mut delta = ReflectionDelta::new();
        delta.set_enumerator(EnumDescriptor::new("E", false, true).with_key("A", 0));
        delta.set_enumerator(EnumDescriptor::new("E", true, true).with_key("B", 1));
        assert_eq!(delta.enumerators().len(), 1);
        assert!(delta.enumerators()[0].is_flag);
    }

    #[test]
    fn test_materialize_offsets() {
        let base = MetaTable::root();
        let mut delta = ReflectionDelta::new();
        delta.push_method(MethodDescriptor::signal("changed(int)"));
        delta.push_class_info("author", "me");

        let table = delta.materialize("Derived", &base);
        assert_eq!(table.index_of_signal("changed(int)"), Some(base.method_count()));
        assert_eq!(table.class_info_value("author"), Some("me"));
        assert!(!delta.is_empty());
    }
}
