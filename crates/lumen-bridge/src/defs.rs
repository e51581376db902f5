//! Unit export descriptors
//!
//! A loaded unit describes its classes to the bridge through these
//! descriptors: type name, parent, optional native class binding, a
//! zero-argument constructor, and the method set. The bridge walks them once
//! at registration time and builds flattened class descriptors: an explicit
//! descriptor-builder rather than a reflective framework.

use std::any::Any;
use std::sync::Arc;

use crate::object_cache::ManagedObject;
use crate::value::{Value, ValueKind};

/// Callable body of an exported method.
///
/// Receives the resolved target (`None` for static methods) and the
/// marshaled arguments; an `Err` propagates to the native caller as an
/// invocation failure carrying the description.
pub type MethodBody =
    Arc<dyn Fn(Option<Arc<ManagedObject>>, &[Value]) -> Result<Option<Value>, String> + Send + Sync>;

/// Zero-argument constructor producing a fresh managed instance.
pub type Constructor = Arc<dyn Fn() -> Arc<dyn Any + Send + Sync> + Send + Sync>;

/// Declared association between a managed class and the engine class it
/// mirrors. A binding with no name defaults to the type's own name.
#[derive(Debug, Clone, Default)]
pub struct ClassBinding {
    /// Engine class name; `None` means "same as the managed type".
    pub name: Option<String>,
}

impl ClassBinding {
    /// Binding that mirrors the engine class of the same name.
    pub fn same_name() -> Self {
        ClassBinding { name: None }
    }

    /// Binding to an explicitly named engine class.
    pub fn named(name: impl Into<String>) -> Self {
        ClassBinding {
            name: Some(name.into()),
        }
    }
}

/// One exported method.
#[derive(Clone)]
pub struct MethodDef {
    /// Method name, unique within the flattened class method table
    pub name: String,
    /// Static methods dispatch without a target object
    pub is_static: bool,
    /// Fully-qualified annotation names; payload interpretation is the
    /// caller's responsibility
    pub attributes: Vec<String>,
    /// Declared parameter kinds, in order
    pub params: Vec<ValueKind>,
    /// Declared return kind, if the method produces a value
    pub returns: Option<ValueKind>,
    /// The callable body
    pub body: MethodBody,
}

impl MethodDef {
    /// An instance method with the given signature and body.
    pub fn instance(
        name: impl Into<String>,
        params: Vec<ValueKind>,
        returns: Option<ValueKind>,
        body: MethodBody,
    ) -> Self {
        MethodDef {
            name: name.into(),
            is_static: false,
            attributes: Vec::new(),
            params,
            returns,
            body,
        }
    }

    /// A static method with the given signature and body.
    pub fn staticm(
        name: impl Into<String>,
        params: Vec<ValueKind>,
        returns: Option<ValueKind>,
        body: MethodBody,
    ) -> Self {
        MethodDef {
            name: name.into(),
            is_static: true,
            attributes: Vec::new(),
            params,
            returns,
            body,
        }
    }

    /// Attach fully-qualified annotation names.
    pub fn with_attributes(mut self, attributes: Vec<String>) -> Self {
        self.attributes = attributes;
        self
    }
}

impl std::fmt::Debug for MethodDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDef")
            .field("name", &self.name)
            .field("is_static", &self.is_static)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

/// One exported class.
#[derive(Clone, Default)]
pub struct TypeDef {
    /// Managed type name, unique within the unit
    pub name: String,
    /// Parent type name; `None` for root types
    pub parent: Option<String>,
    /// Optional native class binding annotation
    pub binding: Option<ClassBinding>,
    /// Zero-argument constructor; absent means native code cannot construct
    /// instances of this class
    pub constructor: Option<Constructor>,
    /// Methods declared directly on this type (ancestors contribute theirs
    /// through the parent chain)
    pub methods: Vec<MethodDef>,
}

impl TypeDef {
    /// A root type with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        TypeDef {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the parent type name.
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Declare a native class binding.
    pub fn with_binding(mut self, binding: ClassBinding) -> Self {
        self.binding = Some(binding);
        self
    }

    /// Install the zero-argument constructor.
    pub fn with_constructor(mut self, constructor: Constructor) -> Self {
        self.constructor = Some(constructor);
        self
    }

    /// Add a method declaration.
    pub fn with_method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }
}

impl std::fmt::Debug for TypeDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDef")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("methods", &self.methods.len())
            .finish_non_exhaustive()
    }
}
