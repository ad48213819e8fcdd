//! Dynamic reflection
//!
//! This module synthesizes reflection tables for dynamic-runtime classes
//! that extend native classes.
//!
//! ## Layers
//!
//! - [`MetaTable`]: an immutable, materialized table chained to its superclass
//! - [`ReflectionDelta`]: the entries a derived class appends to its base
//! - [`MetaObjectBuilder`]: owns a delta, materializes and caches tables
//! - [`scan_type`]: turns a class's declaration objects into delta entries
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut builder = MetaObjectBuilder::new(ctx, "Counter", MetaTable::root());
//! let changed = builder.add_signal("changed(int)");
//! let table = builder.update();
//! assert_eq!(table.index_of_signal("changed(int)"), changed);
//! ```

mod builder;
mod decl;
mod delta;
mod format;
mod scan;
pub mod signature;
mod table;

pub use builder::MetaObjectBuilder;
pub use decl::{
    find_property, EnumDecl, PropertyCallError, PropertyDecl, SignalDecl, SlotDecl, SlotList,
};
pub use delta::{DeltaEntry, ReflectionDelta};
pub use format::{check_method_order, find_method_order_violation, format_meta_table, method_sort_warning};
pub use scan::scan_type;
pub use table::{
    EnumDescriptor, MetaTable, MethodDescriptor, MethodKind, PropertyDescriptor, PropertyFlags,
    PropertyType,
};
