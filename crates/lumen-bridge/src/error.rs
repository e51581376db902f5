//! Error types for the bridge
//!
//! Every failure surfaces as a structured kind + message to the native
//! caller. Registration failures are scoped to a single class or unit,
//! dispatch failures to a single call; none of them corrupt cache state.

use crate::guid::BridgeGuid;
use crate::value::ValueKind;

/// Errors raised by the tagged value container.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    /// The runtime type of the stored value has no boundary mapping
    #[error("Unsupported value type: {0}")]
    UnsupportedType(String),

    /// No variant is active (or the buffer state is unrecognized)
    #[error("Container holds no representable value")]
    Unrepresentable,

    /// The container was used before being constructed
    #[error("Container not constructed")]
    NotConstructed,

    /// The container was already destructed
    #[error("Container already released")]
    AlreadyReleased,
}

/// Errors raised by bridge operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    /// A declared native class binding has no matching native class
    #[error("No native class found for binding \"{binding}\" on class {class}")]
    BindingNotFound {
        /// Managed class being registered
        class: String,
        /// Declared binding name
        binding: String,
    },

    /// Native code asked to construct a class without a zero-argument constructor
    #[error("Class {class} has no default constructor")]
    ConstructionUnsupported {
        /// Managed class name
        class: String,
    },

    /// A unit's declared core dependency does not match the engine version
    #[error("Unit version {0:#x} does not match engine version")]
    VersionMismatch(u32),

    /// A non-core unit was loaded twice from the same path
    #[error("Unit already loaded: {0}")]
    AlreadyLoaded(String),

    /// Method identifier did not resolve
    #[error("Unknown method: {0}")]
    UnknownMethod(BridgeGuid),

    /// Object identifier did not resolve
    #[error("Unknown object: {0}")]
    UnknownObject(BridgeGuid),

    /// Unit identifier did not resolve
    #[error("Unknown unit: {0}")]
    UnknownUnit(BridgeGuid),

    /// Type name did not resolve within a unit
    #[error("Unknown class \"{name}\" in unit {unit}")]
    UnknownClass {
        /// Owning unit
        unit: BridgeGuid,
        /// Type name
        name: String,
    },

    /// Tagged value container failure during marshaling
    #[error("Marshal error: {0}")]
    Marshal(#[from] ValueError),

    /// Supplied parameter count does not match the method's declaration
    #[error("Parameter count mismatch: expected {expected}, got {got}")]
    ParamCount {
        /// Declared parameter count
        expected: usize,
        /// Supplied parameter count
        got: usize,
    },

    /// A parameter slot holds a different variant than declared
    #[error("Parameter {index} type mismatch: expected {expected:?}, got {got}")]
    ParamType {
        /// Zero-based parameter position
        index: usize,
        /// Declared kind
        expected: ValueKind,
        /// Description of what the slot actually held
        got: String,
    },

    /// The invoked method itself failed
    #[error("Invocation failed: {0}")]
    Invocation(String),

    /// An object or container was released twice
    #[error("Already released: {0}")]
    AlreadyReleased(BridgeGuid),

    /// Unit loading failed (I/O, symbol resolution, manifest)
    #[error("Unit load failed: {0}")]
    Load(String),
}

/// Result alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
