//! Lumen managed/native interop bridge
//!
//! This crate is the managed side of the boundary between a native engine
//! and managed code units:
//! - Class registration from unit-exported type descriptors
//! - Object-lifetime cache with pinned and transient entries
//! - Method dispatch by opaque identifier
//! - 32-byte tagged value containers for boundary-crossing values
//! - Unit load/unload lifecycle with cascading cache removal
//!
//! The engine side is abstracted behind [`EngineHooks`]; how units are
//! produced is abstracted behind [`UnitLoader`]. The C ABI lives in the
//! companion `lumen-bridge-ffi` crate.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bridge;
pub mod class;
pub mod defs;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod guid;
pub mod loader;
pub mod method_cache;
pub mod object_cache;
pub mod unit;
pub mod value;

pub use bridge::Bridge;
pub use class::{ClassDescriptor, ClassHandle, ClassRegistry};
pub use defs::{ClassBinding, Constructor, MethodBody, MethodDef, TypeDef};
pub use engine::{
    pack_version, unpack_version, EngineHooks, NativeAddress, NativeClassHandle, TypeId, TypeTable,
};
pub use error::{BridgeError, BridgeResult, ValueError};
pub use guid::BridgeGuid;
pub use loader::{DynamicLoader, LoadError, MANIFEST_SYMBOL};
pub use method_cache::{MethodCache, MethodEntry};
pub use object_cache::{Lifetime, ManagedObject, NativeBinding, ObjectCache, ObjectEntry};
pub use unit::{AssemblyUnit, LoadReport, StaticLoader, UnitLoader, UnitManifest};
pub use value::{OwnedTagged, TaggedValue, Value, ValueKind};
