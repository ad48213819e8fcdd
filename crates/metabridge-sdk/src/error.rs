//! Error types raised by the dynamic runtime

/// Result type for operations that cross into the dynamic runtime
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// An exception raised inside the dynamic runtime.
///
/// The bridge never unwinds these past a native dispatch boundary; they are
/// either returned to a Rust caller or printed through
/// [`DynamicRuntime::print_error`](crate::DynamicRuntime::print_error).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// Attribute lookup failed
    #[error("AttributeError: {0}")]
    Attribute(String),

    /// Wrong argument or value type
    #[error("TypeError: {0}")]
    Type(String),

    /// Generic runtime failure
    #[error("RuntimeError: {0}")]
    Runtime(String),

    /// A weak reference was requested for, or resolved to, a dead object
    #[error("ReferenceError: {0}")]
    Reference(String),

    /// A warning that the runtime escalated into an error
    #[error("RuntimeWarning: {0}")]
    Warning(String),

    /// Any other exception type raised by user code
    #[error("{type_name}: {message}")]
    Raised {
        /// Exception type name
        type_name: String,
        /// Exception message
        message: String,
    },
}

impl RuntimeError {
    /// Raise an exception of an arbitrary type
    pub fn raised(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        RuntimeError::Raised {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// Exception type name as the runtime would print it
    pub fn type_name(&self) -> &str {
        match self {
            RuntimeError::Attribute(_) => "AttributeError",
            RuntimeError::Type(_) => "TypeError",
            RuntimeError::Runtime(_) => "RuntimeError",
            RuntimeError::Reference(_) => "ReferenceError",
            RuntimeError::Warning(_) => "RuntimeWarning",
            RuntimeError::Raised { type_name, .. } => type_name,
        }
    }

    /// Exception message without the type prefix
    pub fn message(&self) -> &str {
        match self {
            RuntimeError::Attribute(m)
            | RuntimeError::Type(m)
            | RuntimeError::Runtime(m)
            | RuntimeError::Reference(m)
            | RuntimeError::Warning(m) => m,
            RuntimeError::Raised { message, .. } => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_type_name() {
        let err = RuntimeError::Attribute("Slot 'C::f()' not found.".to_string());
        assert_eq!(err.to_string(), "AttributeError: Slot 'C::f()' not found.");
        assert_eq!(err.type_name(), "AttributeError");
    }

    #[test]
    fn test_raised_custom_type() {
        let err = RuntimeError::raised("ValueError", "bad value");
        assert_eq!(err.type_name(), "ValueError");
        assert_eq!(err.message(), "bad value");
        assert_eq!(err.to_string(), "ValueError: bad value");
    }
}
