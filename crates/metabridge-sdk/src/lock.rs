//! The dynamic runtime's global execution token
//!
//! Every path that touches dynamic-runtime objects or shared reflection
//! caches runs under this token. It is reentrant: a slot invoked from a
//! dispatch may emit a signal that dispatches again on the same thread.

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

/// Reentrant global interpreter token
pub struct InterpreterLock {
    inner: ReentrantMutex<()>,
}

/// Proof that the current thread holds the interpreter token
pub struct InterpreterGuard<'a> {
    _guard: ReentrantMutexGuard<'a, ()>,
}

impl InterpreterLock {
    /// Create a new, unheld token
    pub fn new() -> Self {
        Self {
            inner: ReentrantMutex::new(()),
        }
    }

    /// Block until the token is held by the current thread
    pub fn acquire(&self) -> InterpreterGuard<'_> {
        InterpreterGuard {
            _guard: self.inner.lock(),
        }
    }

    /// Acquire the token without blocking
    pub fn try_acquire(&self) -> Option<InterpreterGuard<'_>> {
        self.inner
            .try_lock()
            .map(|guard| InterpreterGuard { _guard: guard })
    }
}

impl Default for InterpreterLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_reentrant_acquire() {
        let lock = InterpreterLock::new();
        let _outer = lock.acquire();
        let _inner = lock.acquire();
        assert!(lock.try_acquire().is_some());
    }

    #[test]
    fn test_excludes_other_threads() {
        let lock = Arc::new(InterpreterLock::new());
        let guard = lock.acquire();

        let other = lock.clone();
        let held_elsewhere = std::thread::spawn(move || other.try_acquire().is_none())
            .join()
            .unwrap();
        assert!(held_elsewhere);
        drop(guard);
    }
}
