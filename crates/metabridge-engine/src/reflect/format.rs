//! Reflection table formatting and the method order check

use std::fmt::Write;

use crate::context::BridgeContext;
use crate::reflect::table::{EnumDescriptor, MetaTable, MethodDescriptor, MethodKind, PropertyDescriptor, PropertyFlags};

fn format_enum(out: &mut String, e: &EnumDescriptor) {
    let _ = write!(out, "\"{}\" {{", e.name);
    for (k, (key, _)) in e.entries.iter().enumerate() {
        if k > 0 {
            out.push_str(", ");
        }
        out.push_str(key);
    }
    out.push('}');
}

fn format_property(out: &mut String, table: &MetaTable, p: &PropertyDescriptor) {
    let _ = write!(out, "\"{}\", {}", p.name, p.type_name);
    if p.flags.contains(PropertyFlags::WRITABLE) {
        out.push_str(" [writeable]");
    }
    if p.flags.contains(PropertyFlags::RESETTABLE) {
        out.push_str(" [resettable]");
    }
    if p.flags.contains(PropertyFlags::CONSTANT) {
        out.push_str(" [constant]");
    }
    if p.flags.contains(PropertyFlags::FINAL) {
        out.push_str(" [final]");
    }
    if p.flags.contains(PropertyFlags::DESIGNABLE) {
        out.push_str(" [designable]");
    }
    if let Some(signal) = p.notify_signal.and_then(|i| table.method(i)) {
        let _ = write!(out, ", notify={}", signal.name());
    }
}

fn format_method(out: &mut String, m: &MethodDescriptor) {
    let _ = write!(out, "type={}, signature={}", m.kind.name(), m.signature);
    let parameters = m.parameter_types();
    if !parameters.is_empty() {
        let _ = write!(out, ", parameters={}", parameters.join(", "));
    }
}

/// Render the entries a table adds over its superclass
pub fn format_meta_table(table: &MetaTable) -> String {
    let mut out = String::new();
    let _ = write!(out, "MetaTable(\"{}\"", table.class_name());
    if let Some(superclass) = table.superclass() {
        let _ = write!(out, " inherits \"{}\"", superclass.class_name());
    }
    out.push_str(":\n");

    if table.enumerator_offset() < table.enumerator_count() {
        out.push_str("Enumerators:\n");
        for e in table.enumerator_offset()..table.enumerator_count() {
            if let Some(enumerator) = table.enumerator(e) {
                let _ = write!(out, "  #{} ", e);
                format_enum(&mut out, enumerator);
                out.push('\n');
            }
        }
    }

    if table.property_offset() < table.property_count() {
        out.push_str("Properties:\n");
        for p in table.property_offset()..table.property_count() {
            if let Some(property) = table.property(p) {
                let _ = write!(out, "  #{} ", p);
                format_property(&mut out, table, property);
                out.push('\n');
            }
        }
    }

    if table.method_offset() < table.method_count() {
        out.push_str("Methods:\n");
        for m in table.method_offset()..table.method_count() {
            if let Some(method) = table.method(m) {
                let _ = write!(out, "  #{} ", m);
                format_method(&mut out, method);
                out.push('\n');
            }
        }
    }

    out.push(')');
    out
}

/// Absolute index of the first own slot that is directly followed by a
/// signal, if any
pub fn find_method_order_violation(table: &MetaTable) -> Option<usize> {
    let count = table.method_count();
    (table.method_offset()..count.saturating_sub(1)).find(|&m| {
        let kind = |i| table.method(i).map(|d: &MethodDescriptor| d.kind);
        kind(m) == Some(MethodKind::Slot) && kind(m + 1) == Some(MethodKind::Signal)
    })
}

/// The message listing a table's own methods, marking those after the
/// offending index with `!`
pub fn method_sort_warning(table: &MetaTable, offending: usize) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "\n\n*** Sort Warning ***\nSignals and slots in MetaTable '{}' are not ordered correctly, this may lead to issues.\n",
        table.class_name()
    );
    let offset = table.method_offset();
    for m in offset..table.method_count() {
        let Some(method) = table.method(m) else {
            continue;
        };
        let _ = writeln!(
            out,
            "{}{}{}{}",
            m - offset + 1,
            if m > offending { '!' } else { ' ' },
            if method.kind == MethodKind::Signal {
                " Signal "
            } else {
                " Slot   "
            },
            method.signature
        );
    }
    out
}

/// Check that the table's own signals precede its slots, warning once if not.
///
/// Returns true if the order is valid. A violating table stays in use.
pub fn check_method_order(ctx: &BridgeContext, table: &MetaTable) -> bool {
    match find_method_order_violation(table) {
        Some(offending) => {
            ctx.warn(&method_sort_warning(table, offending));
            false
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample() -> MetaTable {
        let base = Arc::new(MetaTable::new("Base", None).with_slot("a()").with_slot("b()"));
        MetaTable::new("Derived", Some(base))
            .with_signal("changed(int)")
            .with_slot("onChanged(int,QString)")
            .with_property(
                PropertyDescriptor::new("value", "int")
                    .with_flags(PropertyFlags::READABLE | PropertyFlags::WRITABLE)
                    .with_notify(2),
            )
            .with_enumerator(
                EnumDescriptor::new("Color", false, true)
                    .with_key("Red", 0)
                    .with_key("Green", 1),
            )
    }

    #[test]
    fn test_format_meta_table() {
        let text = format_meta_table(&sample());
        assert_eq!(
            text,
            "MetaTable(\"Derived\" inherits \"Base\":\n\
             Enumerators:\n  #0 \"Color\" {Red, Green}\n\
             Properties:\n  #0 \"value\", int [writeable], notify=changed\n\
             Methods:\n  #2 type=Signal, signature=changed(int), parameters=int\n  \
             #3 type=Slot, signature=onChanged(int,QString), parameters=int, QString\n)"
        );
    }

    #[test]
    fn test_order_violation_detected() {
        assert_eq!(find_method_order_violation(&sample()), None);

        let base = Arc::new(MetaTable::new("Base", None).with_slot("a()"));
        let bad = MetaTable::new("Bad", Some(base))
            .with_signal("s1()")
            .with_slot("late()")
            .with_signal("s2()");
        assert_eq!(find_method_order_violation(&bad), Some(2));

        let warning = method_sort_warning(&bad, 2);
        assert!(warning.contains("*** Sort Warning ***"));
        assert!(warning.contains("1  Signal s1()\n"));
        assert!(warning.contains("2  Slot   late()\n"));
        assert!(warning.contains("3! Signal s2()\n"));
    }
}
