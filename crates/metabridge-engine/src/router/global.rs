//! The process-wide router
//!
//! Embedders install one router for the whole process. Its cleanup runs at
//! process exit on unix; tests construct isolated routers instead.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult};
use crate::router::{DispatchRouter, RouterOptions};

static GLOBAL_ROUTER: OnceCell<DispatchRouter> = OnceCell::new();

#[cfg(unix)]
extern "C" fn cleanup_at_exit() {
    if let Some(router) = GLOBAL_ROUTER.get() {
        router.shutdown();
    }
}

#[cfg(unix)]
fn register_at_exit() {
    // SAFETY: `cleanup_at_exit` is a plain `extern "C"` function without
    // arguments that does not unwind.
    let rc = unsafe { libc::atexit(cleanup_at_exit) };
    if rc != 0 {
        log::warn!("failed to register the router cleanup with atexit ({})", rc);
    }
}

#[cfg(not(unix))]
fn register_at_exit() {
    log::debug!("router cleanup at exit is not supported on this platform");
}

impl DispatchRouter {
    /// Install the process-wide router.
    ///
    /// Fails with [`BridgeError::AlreadyInstalled`] on every call after the
    /// first.
    pub fn install(ctx: Arc<BridgeContext>, options: RouterOptions) -> BridgeResult<DispatchRouter> {
        let at_exit = options.register_at_exit;
        let mut created = None;
        GLOBAL_ROUTER.get_or_init(|| {
            let router = DispatchRouter::new(ctx, options);
            created = Some(router.clone());
            router
        });
        let router = created.ok_or(BridgeError::AlreadyInstalled)?;
        if at_exit {
            register_at_exit();
        }
        log::debug!("process-wide router installed");
        Ok(router)
    }

    /// The process-wide router, if installed
    pub fn global() -> Option<&'static DispatchRouter> {
        GLOBAL_ROUTER.get()
    }
}
