//! Shared collaborators
//!
//! Every component of the bridge reaches the dynamic runtime, the native
//! framework and the converter table through one [`BridgeContext`].

use std::sync::Arc;

use metabridge_sdk::{ConverterRegistry, DynamicRuntime, WarningCategory};

use crate::native::NativeFramework;

/// The dynamic runtime, native framework and converter table in use
pub struct BridgeContext {
    runtime: Arc<dyn DynamicRuntime>,
    framework: Arc<dyn NativeFramework>,
    converters: Arc<ConverterRegistry>,
}

impl BridgeContext {
    /// Create a new context
    pub fn new(
        runtime: Arc<dyn DynamicRuntime>,
        framework: Arc<dyn NativeFramework>,
        converters: Arc<ConverterRegistry>,
    ) -> Self {
        Self {
            runtime,
            framework,
            converters,
        }
    }

    /// The dynamic runtime
    pub fn runtime(&self) -> &Arc<dyn DynamicRuntime> {
        &self.runtime
    }

    /// The native framework
    pub fn framework(&self) -> &Arc<dyn NativeFramework> {
        &self.framework
    }

    /// The converter table
    pub fn converters(&self) -> &Arc<ConverterRegistry> {
        &self.converters
    }

    /// Emit a runtime warning through the log and the runtime's warning
    /// channel.
    ///
    /// Acquires the interpreter token. A warning the runtime escalates to an
    /// error is cleared, since none of the callers can unwind.
    pub fn warn(&self, message: &str) {
        log::warn!("{}", message);
        let _gil = self.runtime.interpreter_lock().acquire();
        if let Err(err) = self.runtime.warn(WarningCategory::Runtime, message) {
            log::debug!("cleared escalated warning: {}", err);
        }
    }
}
