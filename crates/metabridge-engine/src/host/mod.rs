//! In-memory collaborators
//!
//! [`MemoryRuntime`] implements the dynamic runtime and [`HostFramework`]
//! the native framework, entirely in memory. Embedders use them to drive
//! the bridge without a real interpreter; the test suite and benches run
//! against them.
//!
//! ## Lifetimes
//!
//! Runtime instances die when their last [`ObjRef`](metabridge_sdk::ObjRef)
//! is dropped and run their death callbacks synchronously. Native objects
//! die when [`HostFramework::destroy`] is called.

mod framework;
mod runtime;

pub use framework::{BridgedObject, HostFramework, HostObject};
pub use runtime::{HostFn, MemoryRuntime};
