//! Method signature helpers
//!
//! Signatures are kept as normalized strings (`name(Type1,Type2)`); these
//! helpers split them, validate them and derive the signatures the bridge
//! generates for callables.

use crate::defaults::{SIGNAL_CODE, SLOT_CODE};

/// True if the signature has a parenthesized argument list.
///
/// Requires an opening parenthesis before the last closing one.
pub fn check_method_signature(signature: &str) -> bool {
    match (signature.find('('), signature.rfind(')')) {
        (Some(open), Some(close)) => open < close,
        _ => false,
    }
}

/// The method name part of a signature
pub fn method_name(signature: &str) -> &str {
    match signature.find('(') {
        Some(pos) => &signature[..pos],
        None => signature,
    }
}

/// Parameter type names of a signature.
///
/// Commas nested inside template brackets do not split parameters.
pub fn parameter_types(signature: &str) -> Vec<String> {
    let (Some(open), Some(close)) = (signature.find('('), signature.rfind(')')) else {
        return Vec::new();
    };
    if open >= close {
        return Vec::new();
    }
    split_parameters(&signature[open + 1..close])
}

fn split_parameters(list: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in list.char_indices() {
        match c {
            '<' | '(' | '[' => depth += 1,
            '>' | ')' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                result.push(list[start..i].trim().to_string());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = list[start..].trim();
    if !last.is_empty() || !result.is_empty() {
        result.push(last.to_string());
    }
    result
}

/// True if the string carries the signal code prefix
pub fn is_signal_code(signature: &str) -> bool {
    signature.starts_with(SIGNAL_CODE)
}

/// True if the string carries the slot code prefix
pub fn is_slot_code(signature: &str) -> bool {
    signature.starts_with(SLOT_CODE)
}

/// Strip the signal code prefix, if present
pub fn strip_signal_code(signature: &str) -> Option<&str> {
    signature.strip_prefix(SIGNAL_CODE)
}

/// Render the slot decorator a user could add to declare `signature`
/// statically, e.g. `foo(QString,double)` becomes `@Slot(str,float)`.
///
/// A signature without a parameter list renders as `@Slot()`.
pub fn slot_decorator_hint(signature: &str) -> String {
    let list = match (signature.find('('), signature.rfind(')')) {
        (Some(open), Some(close)) if open < close => &signature[open + 1..close],
        _ => "",
    };
    let parameters: Vec<String> = if list.is_empty() {
        Vec::new()
    } else {
        list.split(',')
            .map(|parameter| match parameter {
                "QString" => "str".to_string(),
                "double" => "float".to_string(),
                _ if parameter.contains("::") => format!("\"{}\"", parameter),
                _ => parameter.strip_suffix('*').unwrap_or(parameter).to_string(),
            })
            .collect()
    };
    format!("@Slot({})", parameters.join(","))
}

/// Build the slot signature a callable is connected under.
///
/// The signal's parameters are truncated to the callable's arity; `None`
/// arity (variadic) keeps all of them. A signal given without a parameter
/// list yields the bare name.
pub fn callback_signature(function_name: &str, signal: &str, arity: Option<usize>) -> String {
    if !check_method_signature(signal) {
        return function_name.to_string();
    }
    let mut args = parameter_types(signal);
    if let Some(arity) = arity {
        args.truncate(arity);
    }
    format!("{}({})", function_name, args.join(","))
}

/// Make a callback name unique to one callable identity by appending the
/// hexadecimal identities of its receiver and function.
pub fn encode_callback_name(function_name: &str, bound_self: Option<usize>, function: usize) -> String {
    match bound_self {
        Some(receiver) => format!("{}{:x}{:x}", function_name, receiver, function),
        None => format!("{}{:x}", function_name, function),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_method_signature() {
        assert!(check_method_signature("foo()"));
        assert!(check_method_signature("foo(int,QString)"));
        assert!(!check_method_signature("foo"));
        assert!(!check_method_signature("foo)("));
        assert!(!check_method_signature("foo(int"));
    }

    #[test]
    fn test_parameter_types() {
        assert!(parameter_types("foo()").is_empty());
        assert_eq!(parameter_types("foo(int)"), vec!["int"]);
        assert_eq!(
            parameter_types("foo(QMap<int,QString>,double)"),
            vec!["QMap<int,QString>", "double"]
        );
        assert_eq!(method_name("foo(int)"), "foo");
        assert_eq!(method_name("bare"), "bare");
    }

    #[test]
    fn test_signal_code() {
        assert!(is_signal_code("2clicked()"));
        assert!(is_slot_code("1onClicked()"));
        assert_eq!(strip_signal_code("2clicked()"), Some("clicked()"));
        assert_eq!(strip_signal_code("clicked()"), None);
    }

    #[test]
    fn test_slot_decorator_hint() {
        assert_eq!(slot_decorator_hint("foo(QString,double)"), "@Slot(str,float)");
        assert_eq!(slot_decorator_hint("foo(QObject*)"), "@Slot(QObject)");
        assert_eq!(
            slot_decorator_hint("foo(Qt::Alignment)"),
            "@Slot(\"Qt::Alignment\")"
        );
        assert_eq!(slot_decorator_hint("foo()"), "@Slot()");
    }

    #[test]
    fn test_slot_decorator_hint_of_malformed_signature() {
        assert_eq!(slot_decorator_hint("(é"), "@Slot()");
        assert_eq!(slot_decorator_hint("é)("), "@Slot()");
        assert_eq!(slot_decorator_hint("bare"), "@Slot()");
        assert_eq!(slot_decorator_hint("f(ä,ö)"), "@Slot(ä,ö)");
    }

    #[test]
    fn test_callback_signature_truncates_to_arity() {
        assert_eq!(callback_signature("onValue", "valueChanged(int,QString)", Some(1)), "onValue(int)");
        assert_eq!(callback_signature("onValue", "valueChanged(int,QString)", None), "onValue(int,QString)");
        assert_eq!(callback_signature("onValue", "valueChanged(int)", Some(0)), "onValue()");
        assert_eq!(callback_signature("onValue", "valueChanged", Some(1)), "onValue");
    }

    #[test]
    fn test_encode_callback_name() {
        assert_eq!(encode_callback_name("f", Some(0x10), 0x20), "f1020");
        assert_eq!(encode_callback_name("f", None, 0xff), "fff");
    }
}
