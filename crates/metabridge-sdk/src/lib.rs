//! Metabridge SDK - Collaborator interfaces for the reflection bridge
//!
//! This crate holds the types both sides of the bridge agree on without
//! depending on the engine: values, the dynamic runtime interface, the
//! interpreter token and the type converter table.
//!
//! # Example
//!
//! ```ignore
//! use metabridge_sdk::{ConverterRegistry, NativeValue, Value};
//!
//! let converters = ConverterRegistry::with_primitives();
//! let int = converters.find_converter("int").unwrap();
//! assert_eq!(int.to_foreign(&NativeValue::i32(3)), Value::Int(3));
//! ```

#![warn(missing_docs)]

pub mod convert;
pub mod error;
pub mod lock;
pub mod runtime;
pub mod value;

pub use convert::{normalize_type_name, Converter, ConverterRegistry};
pub use error::{RuntimeError, RuntimeResult};
pub use lock::{InterpreterGuard, InterpreterLock};
pub use runtime::{DeathCallback, DynamicRuntime, TypeRole, WarningCategory, WeakSlot};
pub use value::{ForeignObject, NativeValue, ObjRef, ObjectId, Value, WeakObjRef};
