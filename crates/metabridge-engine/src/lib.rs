//! Metabridge Engine
//!
//! This crate lets a native object system with static reflection tables be
//! extended and driven at run time by objects living in a dynamic runtime:
//! - **Reflect**: derived reflection tables built from class declarations (`reflect` module)
//! - **Callable**: adapters invoking dynamic-runtime callables from native dispatch (`callable` module)
//! - **Proxy**: native stand-ins for callables the native side cannot address (`proxy` module)
//! - **Router**: proxy registry, built-in dispatch and the connection table (`router` module)
//! - **Host**: in-memory runtime and framework implementations (`host` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use metabridge_engine::host::{HostFramework, MemoryRuntime};
//! use metabridge_engine::{BridgeContext, DispatchRouter, RouterOptions};
//!
//! let runtime = MemoryRuntime::new();
//! let framework = HostFramework::new();
//! let ctx = Arc::new(BridgeContext::new(runtime, framework, converters));
//! let router = DispatchRouter::new(ctx, RouterOptions::default());
//!
//! let handle = router.connect_callback(&button, "2clicked()", &callback)?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::type_complexity)]

// ============================================================================
// Core Modules
// ============================================================================

/// Reflection tables, deltas and the class scanner
pub mod reflect;

/// Weak references with death callbacks
pub mod weak;

/// Callable classification, identity and adapters
pub mod callable;

/// Proxy dispatch targets
pub mod proxy;

/// Dispatch router: proxies, built-in dispatch and connections
pub mod router;

/// In-memory collaborator implementations
pub mod host;

// ============================================================================
// Support Modules
// ============================================================================

pub mod context;
pub mod defaults;
pub mod error;
pub mod native;

// ============================================================================
// Re-exports
// ============================================================================

pub use callable::{CallableAdapter, CallableIdentity, CallableKind, InvokeOutcome};
pub use context::BridgeContext;
pub use error::{BridgeError, BridgeResult};
pub use native::{
    ConnectionHandle, DestroyedListener, MetaCall, NativeFramework, NativeObject, SlotFunctor,
};
pub use proxy::ProxyDispatchTarget;
pub use reflect::{MetaObjectBuilder, MetaTable, MethodDescriptor, MethodKind};
pub use router::{ConnectionKey, DispatchRouter, MetaCallErrorHandler, RouterOptions};
pub use weak::WeakNotifier;
