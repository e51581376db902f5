//! Class/type registry
//!
//! Builds a class descriptor from a unit's exported type descriptors: parent
//! chain first, then the native binding, then a single flattened method table
//! with most-derived override precedence. Registration is idempotent by
//! type-identity hash, so re-registering the same type returns the existing
//! descriptor untouched.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{info, warn};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHasher};

use crate::defs::{Constructor, MethodDef, TypeDef};
use crate::engine::{EngineHooks, NativeAddress, NativeClassHandle};
use crate::error::{BridgeError, BridgeResult};
use crate::guid::BridgeGuid;
use crate::method_cache::MethodCache;
use crate::object_cache::{ManagedObject, NativeBinding, ObjectCache, ObjectEntry};

/// Opaque handle the native side stores for a registered class object.
/// Stable for the process lifetime; identical across idempotent
/// re-registrations of the same type.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassHandle(pub u64);

/// Type-identity hash of a managed type name.
pub fn type_hash(name: &str) -> u64 {
    let mut hasher = FxHasher::default();
    name.hash(&mut hasher);
    hasher.finish()
}

/// One managed class bound to the bridge.
pub struct ClassDescriptor {
    /// Type-identity hash
    pub type_hash: u64,
    /// Managed type name
    pub name: String,
    /// Opaque handle handed to the native side
    pub handle: ClassHandle,
    /// Engine class this type mirrors, when a binding was declared
    pub native_class: Option<NativeClassHandle>,
    /// Parent descriptor; referential: the parent was registered first and
    /// is never removed independently of the unit
    pub parent: Option<Arc<ClassDescriptor>>,
    /// Flattened method table: name → method identifier
    pub methods: FxHashMap<String, BridgeGuid>,
    /// Owning unit
    pub unit: BridgeGuid,

    // Flattened declarations, most-derived override first. Children extend
    // this without re-walking ancestor type descriptors.
    flat_defs: Vec<MethodDef>,
    constructor: Constructor,
}

impl ClassDescriptor {
    /// Resolve a method identifier by name through the flattened table.
    pub fn method(&self, name: &str) -> Option<BridgeGuid> {
        self.methods.get(name).copied()
    }

    /// Walk the inheritance chain, most-derived first.
    pub fn ancestry(&self) -> impl Iterator<Item = &ClassDescriptor> {
        std::iter::successors(Some(self), |class| class.parent.as_deref())
    }

    /// Construct callback: create a new instance of this managed type on
    /// behalf of native code. For native-bound classes the instance records
    /// the engine class and address, and the engine is notified. The result
    /// is registered in the object cache under the given pin mode.
    pub fn construct(
        &self,
        pin: bool,
        native_address: NativeAddress,
        hooks: &dyn EngineHooks,
        objects: &ObjectCache,
    ) -> BridgeResult<(ObjectEntry, Arc<ManagedObject>)> {
        let instance = (self.constructor)();

        let object = match self.native_class {
            Some(class) => {
                let binding = NativeBinding {
                    class,
                    address: native_address,
                };
                let object = Arc::new(ManagedObject::with_binding(instance, binding));
                hooks.notify_constructed(class, native_address);
                object
            }
            None => Arc::new(ManagedObject::new(instance)),
        };

        let entry = objects.add_object(self.unit, &object, pin);

        Ok((entry, object))
    }

    /// Destruct callback: release a previously registered instance.
    /// Failing to find the identifier is reported, not fatal.
    pub fn destruct(&self, guid: BridgeGuid, hooks: &dyn EngineHooks, objects: &ObjectCache) -> bool {
        match objects.remove_object(guid) {
            Some(removed) => {
                if let Some(binding) = removed.object.as_ref().and_then(|o| o.native_binding()) {
                    hooks.notify_destructed(binding.class, binding.address);
                }
                true
            }
            None => {
                warn!("Failed to release object {}: not found in cache", guid);
                false
            }
        }
    }
}

impl std::fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .field("unit", &self.unit)
            .field("methods", &self.methods.len())
            .finish_non_exhaustive()
    }
}

/// Registry of class descriptors, keyed by (unit, type-identity hash).
pub struct ClassRegistry {
    classes: RwLock<FxHashMap<(BridgeGuid, u64), Arc<ClassDescriptor>>>,
    next_handle: AtomicU64,
}

impl ClassRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        ClassRegistry {
            classes: RwLock::new(FxHashMap::default()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Find a registered class by name within a unit.
    pub fn find_class(&self, unit: BridgeGuid, name: &str) -> Option<Arc<ClassDescriptor>> {
        self.classes.read().get(&(unit, type_hash(name))).cloned()
    }

    /// Register a class from its type descriptor, registering ancestors
    /// first. Idempotent: a type already registered in this unit returns its
    /// existing descriptor with no duplicate method-table construction.
    ///
    /// `unit_types` holds the unit's full export set so parent names can be
    /// resolved recursively.
    pub fn register_class(
        &self,
        unit: BridgeGuid,
        def: &TypeDef,
        unit_types: &FxHashMap<String, TypeDef>,
        hooks: &dyn EngineHooks,
        methods: &MethodCache,
    ) -> BridgeResult<Arc<ClassDescriptor>> {
        let hash = type_hash(&def.name);
        if let Some(existing) = self.classes.read().get(&(unit, hash)) {
            return Ok(existing.clone());
        }

        // Parent chain first, so the child can link to a complete descriptor.
        let parent = match &def.parent {
            Some(parent_name) => {
                if let Some(existing) = self.find_class(unit, parent_name) {
                    Some(existing)
                } else if let Some(parent_def) = unit_types.get(parent_name) {
                    Some(self.register_class(unit, parent_def, unit_types, hooks, methods)?)
                } else {
                    return Err(BridgeError::UnknownClass {
                        unit,
                        name: parent_name.clone(),
                    });
                }
            }
            None => None,
        };

        // A declared binding must resolve; a missing engine class is a
        // configuration error for this type, not retried.
        let native_class = match &def.binding {
            Some(binding) => {
                let binding_name = binding.name.as_deref().unwrap_or(&def.name);
                match hooks.lookup_class_by_name(binding_name) {
                    Some(handle) => Some(handle),
                    None => {
                        return Err(BridgeError::BindingNotFound {
                            class: def.name.clone(),
                            binding: binding_name.to_string(),
                        })
                    }
                }
            }
            None => None,
        };

        // The construct callback needs the zero-argument constructor; a type
        // without one cannot be bound.
        let constructor = def
            .constructor
            .clone()
            .ok_or_else(|| BridgeError::ConstructionUnsupported {
                class: def.name.clone(),
            })?;

        // Flatten the method set once: methods declared here shadow
        // same-named ancestor methods.
        let mut flat_defs: Vec<MethodDef> = Vec::new();
        for method in &def.methods {
            if flat_defs.iter().any(|m| m.name == method.name) {
                continue;
            }
            flat_defs.push(method.clone());
        }
        if let Some(parent) = &parent {
            for method in &parent.flat_defs {
                if flat_defs.iter().any(|m| m.name == method.name) {
                    continue;
                }
                flat_defs.push(method.clone());
            }
        }

        let mut method_table = FxHashMap::default();
        for method in &flat_defs {
            let guid = methods.add_method(unit, &def.name, method.clone());
            method_table.insert(method.name.clone(), guid);
        }

        let descriptor = Arc::new(ClassDescriptor {
            type_hash: hash,
            name: def.name.clone(),
            handle: ClassHandle(self.next_handle.fetch_add(1, Ordering::Relaxed)),
            native_class,
            parent,
            methods: method_table,
            unit,
            flat_defs,
            constructor,
        });

        info!(
            "Registered managed class {} ({} methods) in unit {}",
            descriptor.name,
            descriptor.methods.len(),
            unit
        );

        self.classes.write().insert((unit, hash), descriptor.clone());

        Ok(descriptor)
    }

    /// Remove every descriptor owned by a unit; returns how many were removed.
    pub fn remove_unit(&self, unit: BridgeGuid) -> usize {
        let mut classes = self.classes.write();
        let before = classes.len();
        classes.retain(|(owner, _), _| *owner != unit);
        before - classes.len()
    }

    /// Number of registered classes.
    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.classes.read().is_empty()
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}
