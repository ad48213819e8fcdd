//! Death notification for dynamic-runtime objects
//!
//! A [`WeakNotifier`] observes one dynamic-runtime object without keeping it
//! alive and runs a callback exactly once when the object dies. Dropping the
//! notifier before that unregisters the callback.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use metabridge_sdk::{DynamicRuntime, ObjRef, RuntimeResult, WeakSlot};

/// A weak reference whose referent's death runs a callback
pub struct WeakNotifier {
    slot: Box<dyn WeakSlot>,
    fired: Arc<AtomicBool>,
    identity: usize,
}

impl WeakNotifier {
    /// Watch `target`, running `on_death` once when it dies.
    ///
    /// Must be called with the interpreter token held. Fails if the runtime
    /// cannot create weak references to the object.
    pub fn watch<F>(runtime: &dyn DynamicRuntime, target: &ObjRef, on_death: F) -> RuntimeResult<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let slot = runtime.watch(
            target,
            Box::new(move || {
                flag.store(true, Ordering::SeqCst);
                on_death();
            }),
        )?;
        Ok(Self {
            slot,
            fired,
            identity: target.identity(),
        })
    }

    /// Watch `target` without a callback
    pub fn silent(runtime: &dyn DynamicRuntime, target: &ObjRef) -> RuntimeResult<Self> {
        Self::watch(runtime, target, || {})
    }

    /// Identity of the watched object, valid even after it died
    pub fn identity(&self) -> usize {
        self.identity
    }

    /// True once the death callback ran
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// True while the watched object is alive
    pub fn is_alive(&self) -> bool {
        self.upgrade().is_some()
    }

    /// Recover the watched object.
    ///
    /// Never returns the object once the death callback started.
    pub fn upgrade(&self) -> Option<ObjRef> {
        if self.has_fired() {
            return None;
        }
        self.slot.upgrade()
    }
}

impl Drop for WeakNotifier {
    fn drop(&mut self) {
        if !self.has_fired() {
            self.slot.cancel();
        }
    }
}

impl fmt::Debug for WeakNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakNotifier")
            .field("identity", &format_args!("{:#x}", self.identity))
            .field("fired", &self.has_fired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryRuntime;
    use metabridge_sdk::TypeRole;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_callback_runs_once_on_death() {
        let runtime = MemoryRuntime::new();
        let class = runtime.class("Handler", &[], TypeRole::Plain);
        let target = runtime.instance(&class);
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let notifier = WeakNotifier::watch(runtime.as_ref(), &target, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(notifier.is_alive());

        drop(target);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(notifier.has_fired());
        assert!(notifier.upgrade().is_none());
    }

    #[test]
    fn test_drop_cancels_callback() {
        let runtime = MemoryRuntime::new();
        let class = runtime.class("Handler", &[], TypeRole::Plain);
        let target = runtime.instance(&class);
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let notifier = WeakNotifier::watch(runtime.as_ref(), &target, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        drop(notifier);
        drop(target);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unwatchable_object() {
        let runtime = MemoryRuntime::new();
        let function = runtime.function("f", 0, |_| Ok(metabridge_sdk::Value::None));
        assert!(WeakNotifier::silent(runtime.as_ref(), &function).is_err());
    }
}
