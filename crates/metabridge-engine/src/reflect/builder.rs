//! Derived reflection tables
//!
//! [`MetaObjectBuilder`] owns the [`ReflectionDelta`] of one derived class or
//! instance and materializes concrete tables from it on demand.
//!
//! ## Index stability
//!
//! Every index handed out is `base count + delta position`. Positions are
//! only ever appended; removal leaves a tombstone. All materialized tables are
//! retained for the builder's lifetime because native code may keep using a
//! table it was handed earlier.
//!
//! ## Sentinels
//!
//! Malformed signatures are reported as a runtime warning and yield `None`
//! (the native "-1" index).

use std::fmt;
use std::sync::Arc;

use metabridge_sdk::ObjRef;

use crate::context::BridgeContext;
use crate::reflect::decl::PropertyDecl;
use crate::reflect::delta::ReflectionDelta;
use crate::reflect::format::check_method_order;
use crate::reflect::scan::scan_type;
use crate::reflect::signature::check_method_signature;
use crate::reflect::table::{
    EnumDescriptor, MetaTable, MethodDescriptor, MethodKind, PropertyDescriptor, PropertyType,
};

/// Builds and caches the reflection table of a derived class
pub struct MetaObjectBuilder {
    ctx: Arc<BridgeContext>,
    class_name: String,
    base: Arc<MetaTable>,
    delta: Option<ReflectionDelta>,
    cache: Vec<Arc<MetaTable>>,
    dirty: bool,
}

impl MetaObjectBuilder {
    /// Create a builder for a named class extending `base`
    pub fn new(ctx: Arc<BridgeContext>, class_name: &str, base: Arc<MetaTable>) -> Self {
        Self {
            ctx,
            class_name: class_name.to_string(),
            base,
            delta: Some(ReflectionDelta::new()),
            cache: Vec::new(),
            dirty: true,
        }
    }

    /// Create a builder that returns `base` unchanged until something is
    /// added
    pub fn for_base(ctx: Arc<BridgeContext>, base: Arc<MetaTable>) -> Self {
        Self {
            ctx,
            class_name: base.class_name().to_string(),
            base,
            delta: None,
            cache: Vec::new(),
            dirty: true,
        }
    }

    /// Create a builder for a dynamic-runtime class.
    ///
    /// A class whose name differs from the base table's is a user subclass:
    /// its declared members are scanned into the delta immediately.
    pub fn for_type(ctx: Arc<BridgeContext>, ty: &ObjRef, base: Arc<MetaTable>) -> Self {
        let qualified = {
            let runtime = ctx.runtime();
            let _gil = runtime.interpreter_lock().acquire();
            runtime.type_name(ty)
        };
        let class_name = qualified.rsplit('.').next().unwrap_or(&qualified).to_string();
        if class_name == base.class_name() {
            return Self::for_base(ctx, base);
        }
        let mut builder = Self::new(ctx, &class_name, base);
        scan_type(&mut builder, ty);
        builder
    }

    fn ensure_delta(&mut self) -> &mut ReflectionDelta {
        self.delta.get_or_insert_with(ReflectionDelta::new)
    }

    /// Shared collaborators
    pub fn context(&self) -> &Arc<BridgeContext> {
        &self.ctx
    }

    /// Class name of the materialized tables
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// The base table
    pub fn base(&self) -> &Arc<MetaTable> {
        &self.base
    }

    /// The delta, if anything was ever added
    pub fn delta(&self) -> Option<&ReflectionDelta> {
        self.delta.as_ref()
    }

    /// True if the next `update` will materialize a new table
    pub fn is_dirty(&self) -> bool {
        self.delta.is_some() && (self.dirty || self.cache.is_empty())
    }

    /// Number of tables materialized so far
    pub fn cached_tables(&self) -> usize {
        self.cache.len()
    }

    /// Method count of the next materialized table
    pub fn method_count(&self) -> usize {
        self.base.method_count() + self.delta.as_ref().map_or(0, |d| d.method_len())
    }

    /// Property count of the next materialized table
    pub fn property_count(&self) -> usize {
        self.base.property_count() + self.delta.as_ref().map_or(0, |d| d.property_len())
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Absolute index of a method; the delta is searched before the base
    pub fn index_of_method(&self, kind: MethodKind, signature: &str) -> Option<usize> {
        if let Some(i) = self
            .delta
            .as_ref()
            .and_then(|d| d.index_of_method(kind, signature))
        {
            return Some(self.base.method_count() + i);
        }
        self.base.index_of_method(kind, signature)
    }

    /// Absolute index of a property; the delta is searched before the base
    pub fn index_of_property(&self, name: &str) -> Option<usize> {
        if let Some(i) = self.delta.as_ref().and_then(|d| d.index_of_property(name)) {
            return Some(self.base.property_count() + i);
        }
        self.base.index_of_property(name)
    }

    // ========================================================================
    // Methods
    // ========================================================================

    fn validate_signature(&self, signature: &str) -> bool {
        if check_method_signature(signature) {
            return true;
        }
        self.ctx.warn(&format!(
            "MetaObjectBuilder::addMethod: Invalid method signature provided for \"{}\"",
            signature
        ));
        false
    }

    fn push_method(&mut self, method: MethodDescriptor) -> usize {
        let base = self.base.method_count();
        self.dirty = true;
        base + self.ensure_delta().push_method(method)
    }

    /// Append a signal
    pub fn add_signal(&mut self, signature: &str) -> Option<usize> {
        self.add_signal_with_names(signature, Vec::new())
    }

    /// Append a signal carrying parameter names
    pub fn add_signal_with_names(
        &mut self,
        signature: &str,
        parameter_names: Vec<String>,
    ) -> Option<usize> {
        if !self.validate_signature(signature) {
            return None;
        }
        Some(self.push_method(
            MethodDescriptor::signal(signature).with_parameter_names(parameter_names),
        ))
    }

    /// Append a void slot
    pub fn add_slot(&mut self, signature: &str) -> Option<usize> {
        if !self.validate_signature(signature) {
            return None;
        }
        Some(self.push_method(MethodDescriptor::slot(signature)))
    }

    /// Append a slot with a return type and tag.
    ///
    /// An empty or `void` return type and an empty tag are ignored.
    pub fn add_slot_with(&mut self, signature: &str, return_type: &str, tag: &str) -> Option<usize> {
        if !self.validate_signature(signature) {
            return None;
        }
        Some(self.push_method(
            MethodDescriptor::slot(signature)
                .with_return_type(return_type)
                .with_tag(tag),
        ))
    }

    /// Remove a method this builder added.
    ///
    /// Base-table indices cannot be removed.
    pub fn remove_method(&mut self, index: usize) {
        let base = self.base.method_count();
        let in_range = index >= base && index - base < self.delta.as_ref().map_or(0, |d| d.method_len());
        debug_assert!(in_range, "remove_method: index {} is not a dynamic method", index);
        if !in_range {
            log::error!("remove_method: index {} is not a dynamic method of {}", index, self.class_name);
            return;
        }
        if self.ensure_delta().remove_method(index - base) {
            self.dirty = true;
        }
    }

    // ========================================================================
    // Properties
    // ========================================================================

    /// Append a property, or return the index of an existing one with the
    /// same name.
    ///
    /// An unregistered type name is reported and recorded as
    /// [`PropertyType::Unknown`]; the property is still added.
    pub fn add_property(&mut self, name: &str, decl: &PropertyDecl) -> usize {
        if let Some(index) = self.index_of_property(name) {
            return index;
        }

        let notify_signal = decl
            .notify
            .as_deref()
            .and_then(|signal| self.index_of_method(MethodKind::Signal, signal));

        let property_type = if self.ctx.converters().contains(&decl.type_name) {
            PropertyType::Known
        } else {
            self.ctx.warn(&format!(
                "MetaObjectBuilder: Failed to add property \"{}\" to \"{}\": Invalid property type \"{}\".",
                name, self.class_name, decl.type_name
            ));
            PropertyType::Unknown
        };

        let property = PropertyDescriptor {
            name: name.to_string(),
            type_name: decl.type_name.clone(),
            property_type,
            flags: decl.flags(),
            notify_signal,
        };
        let base = self.base.property_count();
        self.dirty = true;
        base + self.ensure_delta().push_property(property)
    }

    /// Remove a property this builder added
    pub fn remove_property(&mut self, index: usize) {
        let base = self.base.property_count();
        let in_range =
            index >= base && index - base < self.delta.as_ref().map_or(0, |d| d.property_len());
        debug_assert!(in_range, "remove_property: index {} is not a dynamic property", index);
        if !in_range {
            log::error!("remove_property: index {} is not a dynamic property of {}", index, self.class_name);
            return;
        }
        if self.ensure_delta().remove_property(index - base) {
            self.dirty = true;
        }
    }

    // ========================================================================
    // Class info and enumerators
    // ========================================================================

    /// Append a class-info entry
    pub fn add_info(&mut self, key: &str, value: &str) {
        self.ensure_delta().push_class_info(key, value);
        self.dirty = true;
    }

    /// Append several class-info entries
    pub fn add_info_map<'a, I>(&mut self, info: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let delta = self.ensure_delta();
        for (key, value) in info {
            delta.push_class_info(key, value);
        }
        self.dirty = true;
    }

    /// Add an enumerator, replacing one of the same name
    pub fn add_enumerator(&mut self, name: &str, is_flag: bool, is_scoped: bool, entries: &[(String, i32)]) {
        let mut enumerator = EnumDescriptor::new(name, is_flag, is_scoped);
        enumerator.entries = entries.to_vec();
        self.ensure_delta().set_enumerator(enumerator);
        self.dirty = true;
    }

    // ========================================================================
    // Materialization
    // ========================================================================

    /// Drop removed entries so the next table is densely numbered.
    ///
    /// Indices handed out before compaction are invalidated.
    pub fn compact(&mut self) {
        let base = self.base.method_count();
        if let Some(delta) = self.delta.as_mut() {
            *delta = delta.compacted(base);
            self.dirty = true;
        }
    }

    /// The current concrete table.
    ///
    /// Returns the base table if nothing was ever added. Otherwise a new
    /// table is materialized under the interpreter token when the delta
    /// changed since the last call, and checked for signal/slot order.
    pub fn update(&mut self) -> Arc<MetaTable> {
        let Some(delta) = &self.delta else {
            return self.base.clone();
        };
        if let (false, Some(table)) = (self.dirty, self.cache.last()) {
            return table.clone();
        }

        let runtime = self.ctx.runtime().clone();
        let _gil = runtime.interpreter_lock().acquire();
        let table = Arc::new(delta.materialize(&self.class_name, &self.base));
        log::trace!(
            "materialized {} ({} methods, {} properties)",
            self.class_name,
            table.method_count(),
            table.property_count()
        );
        check_method_order(&self.ctx, &table);
        self.cache.push(table.clone());
        self.dirty = false;
        table
    }
}

impl fmt::Debug for MetaObjectBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaObjectBuilder")
            .field("class_name", &self.class_name)
            .field("base", &self.base.class_name())
            .field("methods", &self.method_count())
            .field("properties", &self.property_count())
            .field("cached", &self.cache.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostFramework, MemoryRuntime};
    use crate::reflect::table::PropertyType;
    use metabridge_sdk::ConverterRegistry;

    fn context() -> (Arc<MemoryRuntime>, Arc<BridgeContext>) {
        let runtime = MemoryRuntime::new();
        let ctx = Arc::new(BridgeContext::new(
            runtime.clone(),
            HostFramework::new(),
            Arc::new(ConverterRegistry::with_primitives()),
        ));
        (runtime, ctx)
    }

    fn base() -> Arc<MetaTable> {
        Arc::new(MetaTable::new("Base", None).with_slot("a()").with_slot("b()"))
    }

    #[test]
    fn test_update_without_delta_returns_base() {
        let (_, ctx) = context();
        let base = base();
        let mut builder = MetaObjectBuilder::for_base(ctx, base.clone());
        assert!(!builder.is_dirty());
        assert!(Arc::ptr_eq(&builder.update(), &base));
        assert_eq!(builder.cached_tables(), 0);
    }

    #[test]
    fn test_indices_follow_base_count() {
        let (_, ctx) = context();
        let mut builder = MetaObjectBuilder::new(ctx, "C", base());
        assert_eq!(builder.add_signal("changed(int)"), Some(2));
        assert_eq!(builder.add_slot("onChanged(int)"), Some(3));

        let table = builder.update();
        assert_eq!(table.index_of_signal("changed(int)"), Some(2));
        assert_eq!(table.index_of_slot("onChanged(int)"), Some(3));
        assert_eq!(builder.index_of_method(MethodKind::Slot, "a()"), Some(0));
    }

    #[test]
    fn test_update_is_cached_until_dirty() {
        let (_, ctx) = context();
        let mut builder = MetaObjectBuilder::new(ctx, "C", base());
        builder.add_signal("s()");
        let first = builder.update();
        assert!(Arc::ptr_eq(&first, &builder.update()));
        assert_eq!(builder.cached_tables(), 1);

        builder.add_slot("t()");
        let second = builder.update();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(builder.cached_tables(), 2);
        assert_eq!(first.method_count(), 3);
    }

    #[test]
    fn test_malformed_signature_is_rejected_with_warning() {
        let (runtime, ctx) = context();
        let mut builder = MetaObjectBuilder::new(ctx, "C", base());
        assert_eq!(builder.add_slot("noParens"), None);
        assert_eq!(builder.method_count(), 2);
        assert!(runtime.warnings()[0].contains("Invalid method signature provided for \"noParens\""));
    }

    #[test]
    fn test_property_unknown_type_still_added() {
        let (runtime, ctx) = context();
        let mut builder = MetaObjectBuilder::new(ctx, "C", base());
        let index = builder.add_property("value", &PropertyDecl::new("FooBar"));
        assert_eq!(builder.add_property("value", &PropertyDecl::new("int")), index);

        let table = builder.update();
        assert_eq!(table.property_count(), 1);
        assert_eq!(table.property(index).unwrap().property_type, PropertyType::Unknown);
        assert_eq!(runtime.warnings().len(), 1);
    }

    #[test]
    fn test_property_notify_resolves_signal() {
        let (_, ctx) = context();
        let mut builder = MetaObjectBuilder::new(ctx, "C", base());
        builder.add_signal("valueChanged(int)");
        let index = builder.add_property("value", &PropertyDecl::new("int").with_notify("valueChanged(int)"));
        let table = builder.update();
        assert_eq!(table.property(index).unwrap().notify_signal, Some(2));
    }

    #[test]
    fn test_removal_keeps_later_indices() {
        let (_, ctx) = context();
        let mut builder = MetaObjectBuilder::new(ctx, "C", base());
        let s1 = builder.add_signal("s1()").unwrap();
        let s2 = builder.add_signal("s2()").unwrap();
        builder.remove_method(s1);

        let table = builder.update();
        assert!(table.method(s1).is_none());
        assert_eq!(table.index_of_signal("s2()"), Some(s2));

        builder.compact();
        let table = builder.update();
        assert_eq!(table.index_of_signal("s2()"), Some(2));
    }

    #[test]
    fn test_enumerator_replaced_by_name() {
        let (_, ctx) = context();
        let mut builder = MetaObjectBuilder::new(ctx, "C", base());
        builder.add_enumerator("Color", false, true, &[("Red".to_string(), 0)]);
        builder.add_enumerator("Color", false, true, &[("Blue".to_string(), 4)]);
        builder.add_info("author", "metabridge");

        let table = builder.update();
        assert_eq!(table.enumerator_count(), 1);
        let color = table.enumerator(0).unwrap();
        assert_eq!(color.value_of("Blue"), Some(4));
        assert_eq!(color.value_of("Red"), None);
        assert_eq!(table.class_info(0), Some(("author", "metabridge")));
    }

    #[test]
    fn test_order_violation_warns_but_publishes() {
        let (runtime, ctx) = context();
        let mut builder = MetaObjectBuilder::new(ctx, "C", base());
        builder.add_slot("late()");
        builder.add_signal("early()");
        let table = builder.update();
        assert_eq!(table.method_count(), 4);
        assert!(runtime.warnings().iter().any(|w| w.contains("*** Sort Warning ***")));
    }
}
