//! Bridge error types

use metabridge_sdk::RuntimeError;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors surfaced by the bridge's public operations.
///
/// Malformed declarations, stale-target dispatch and ordering violations are
/// reported as warnings and never appear here; these are the failures a
/// caller can act on.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A signal argument did not carry the signal code prefix
    #[error("Use the function SIGNAL on signals: \"{0}\"")]
    MalformedSignal(String),

    /// The source object has no signal with the given signature
    #[error("Signal \"{signature}\" not found on {class_name}")]
    UnknownSignal {
        /// Class the signal was looked up on
        class_name: String,
        /// Signature without code prefix
        signature: String,
    },

    /// The native object has no dynamic-runtime companion
    #[error("Cannot add dynamic method \"{signature}\" to {object}: No Wrapper found.")]
    NoWrapper {
        /// Method signature that was being registered
        signature: String,
        /// Native object identity
        object: String,
    },

    /// A method signature lacks a parenthesized parameter list
    #[error("Invalid method signature \"{0}\"")]
    InvalidSignature(String),

    /// A slot could not be registered on the receiver
    #[error("Failed to register slot \"{0}\"")]
    SlotRegistration(String),

    /// The callable has no usable receiver or proxy
    #[error("Invalid callable for signal \"{0}\"")]
    InvalidCallable(String),

    /// The native framework refused the connection
    #[error("Failed to connect \"{signal}\" to \"{slot}\"")]
    ConnectFailed {
        /// Signal signature
        signal: String,
        /// Slot signature
        slot: String,
    },

    /// The process-wide router was installed twice
    #[error("The process-wide dispatch router is already installed")]
    AlreadyInstalled,

    /// A raised dynamic-runtime exception
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_wrapper_message() {
        let err = BridgeError::NoWrapper {
            signature: "foo(int)".to_string(),
            object: "#3".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot add dynamic method \"foo(int)\" to #3: No Wrapper found."
        );
    }

    #[test]
    fn test_runtime_error_is_transparent() {
        let err: BridgeError = RuntimeError::Type("bad".to_string()).into();
        assert_eq!(err.to_string(), "TypeError: bad");
    }
}
