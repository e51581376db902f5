//! Bridge facade
//!
//! Owns the three caches and the unit table, wires them to the engine hooks
//! and the unit loader, and exposes the inbound surface the native engine
//! calls: load/unload units, register/release objects, construct instances,
//! invoke methods.
//!
//! Thread model: any operation may be called from whichever native thread
//! the engine is on. Each cache has its own coarse lock for atomic sweeps,
//! and a bridge-level lifecycle lock serializes unit load/unload (write
//! side) against dispatch and object registration (read side). An unload
//! therefore cannot release a unit's library while one of its method bodies
//! is still executing, and a load observes either no unit at a path or a
//! fully committed one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::class::{ClassDescriptor, ClassRegistry};
use crate::defs::TypeDef;
use crate::dispatch;
use crate::engine::{EngineHooks, NativeAddress, TypeTable};
use crate::error::{BridgeError, BridgeResult};
use crate::guid::BridgeGuid;
use crate::method_cache::MethodCache;
use crate::object_cache::{ManagedObject, ObjectCache, ObjectEntry};
use crate::unit::{AssemblyUnit, LoadReport, UnitLoader};
use crate::value::TaggedValue;

/// The interop bridge: the one object the native engine holds.
pub struct Bridge {
    hooks: Arc<dyn EngineHooks>,
    loader: Arc<dyn UnitLoader>,
    table: TypeTable,
    classes: ClassRegistry,
    methods: MethodCache,
    objects: ObjectCache,
    units: RwLock<FxHashMap<BridgeGuid, AssemblyUnit>>,
    // Unit load/unload take the write side; dispatch and object registration
    // take the read side. Keeps check-then-insert sequences atomic and keeps
    // a unit's library mapped while any of its method bodies is in flight.
    lifecycle: RwLock<()>,
}

impl Bridge {
    /// Attach to an engine. Resolves the tagged-value type table through the
    /// hooks once, up front.
    pub fn new(hooks: Arc<dyn EngineHooks>, loader: Arc<dyn UnitLoader>) -> Self {
        let table = TypeTable::from_hooks(hooks.as_ref());
        Bridge {
            hooks,
            loader,
            table,
            classes: ClassRegistry::new(),
            methods: MethodCache::new(),
            objects: ObjectCache::new(),
            units: RwLock::new(FxHashMap::default()),
            lifecycle: RwLock::new(()),
        }
    }

    /// The resolved tagged-value type table.
    pub fn type_table(&self) -> &TypeTable {
        &self.table
    }

    /// Load a unit and register every type it exports.
    ///
    /// Re-requesting the core unit from a path that is already loaded is a
    /// silent no-op returning the existing identifier; a duplicate non-core
    /// load is a configuration error. A core-contract version mismatch
    /// (major or minor; patch is lenient) fails the whole load before any
    /// class registers. Per-type configuration failures are collected into
    /// the report's warning list without aborting the rest.
    pub fn load_unit(&self, path: impl AsRef<Path>, is_core: bool) -> BridgeResult<LoadReport> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let _lifecycle = self.lifecycle.write();

        if let Some(existing) = self.find_unit_by_path(&path) {
            if is_core {
                info!("Unit already loaded: {}", path.display());
                return Ok(LoadReport {
                    unit: existing,
                    registered: 0,
                    warnings: Vec::new(),
                    already_loaded: true,
                });
            }
            return Err(BridgeError::AlreadyLoaded(path.display().to_string()));
        }

        info!("Loading unit: {}...", path.display());
        let manifest = self.loader.load(&path)?;

        if let Some(packed) = manifest.core_dependency {
            if !self.hooks.verify_engine_version(packed, true, true, false) {
                // The unit will never reach the unit table, so unload can
                // never close its library; close it here.
                self.loader.release(&path);
                return Err(BridgeError::VersionMismatch(packed));
            }
        }

        let unit = BridgeGuid::new();
        let unit_types: FxHashMap<String, TypeDef> = manifest
            .types
            .iter()
            .map(|def| (def.name.clone(), def.clone()))
            .collect();

        let mut registered = 0;
        let mut warnings = Vec::new();
        for def in &manifest.types {
            match self
                .classes
                .register_class(unit, def, &unit_types, self.hooks.as_ref(), &self.methods)
            {
                Ok(_) => registered += 1,
                Err(err) => {
                    warn!("Failed to register class {}: {}", def.name, err);
                    warnings.push(err);
                }
            }
        }

        self.units.write().insert(
            unit,
            AssemblyUnit {
                guid: unit,
                path,
                is_core,
            },
        );

        Ok(LoadReport {
            unit,
            registered,
            warnings,
            already_loaded: false,
        })
    }

    /// Unload a unit, cascading removal through every cache it owns.
    /// Returns `false` for an unknown identifier; reported, not fatal.
    /// Once this returns, no identifier owned by the unit resolves. Blocks
    /// until in-flight dispatch against the unit has completed, so the
    /// unit's library is never closed under an executing method body.
    pub fn unload_unit(&self, unit: BridgeGuid) -> bool {
        let _lifecycle = self.lifecycle.write();
        let record = match self.units.write().remove(&unit) {
            Some(record) => record,
            None => {
                warn!("Failed to unload unit {}: not found", unit);
                return false;
            }
        };

        info!("Unloading unit: {} ({})", unit, record.path.display());

        for removed in self.objects.remove_unit(unit) {
            if let Some(binding) = removed.object.as_ref().and_then(|o| o.native_binding()) {
                self.hooks.notify_destructed(binding.class, binding.address);
            }
        }
        let methods = self.methods.remove_unit(unit);
        let classes = self.classes.remove_unit(unit);
        self.loader.release(&record.path);

        info!(
            "Unloaded unit {}: {} classes, {} methods purged",
            unit, classes, methods
        );

        true
    }

    /// Whether a unit identifier is currently loaded.
    pub fn is_unit_loaded(&self, unit: BridgeGuid) -> bool {
        self.units.read().contains_key(&unit)
    }

    fn find_unit_by_path(&self, path: &Path) -> Option<BridgeGuid> {
        self.units
            .read()
            .values()
            .find(|unit| unit.path == path)
            .map(|unit| unit.guid)
    }

    /// Find a registered class by name within a unit.
    pub fn find_class(&self, unit: BridgeGuid, name: &str) -> Option<Arc<ClassDescriptor>> {
        self.classes.find_class(unit, name)
    }

    /// Construct a new instance of a registered class on behalf of native
    /// code, registering it in the object cache under the given pin mode.
    pub fn construct_object(
        &self,
        unit: BridgeGuid,
        class_name: &str,
        pin: bool,
        native_address: NativeAddress,
    ) -> BridgeResult<(ObjectEntry, Arc<ManagedObject>)> {
        let _lifecycle = self.lifecycle.read();
        let class = self
            .find_class(unit, class_name)
            .ok_or_else(|| BridgeError::UnknownClass {
                unit,
                name: class_name.to_string(),
            })?;
        class.construct(pin, native_address, self.hooks.as_ref(), &self.objects)
    }

    /// Expose an existing managed object across the boundary.
    pub fn register_object(
        &self,
        unit: BridgeGuid,
        object: &Arc<ManagedObject>,
        pin: bool,
    ) -> BridgeResult<ObjectEntry> {
        // Held across the check and the insert so a concurrent unload cannot
        // sweep the unit in between, which would leave an orphaned entry.
        let _lifecycle = self.lifecycle.read();
        if !self.is_unit_loaded(unit) {
            return Err(BridgeError::UnknownUnit(unit));
        }
        Ok(self.objects.add_object(unit, object, pin))
    }

    /// Resolve an object identifier.
    pub fn get_object(&self, guid: BridgeGuid) -> BridgeResult<Arc<ManagedObject>> {
        self.objects
            .get_object(guid)
            .ok_or(BridgeError::UnknownObject(guid))
    }

    /// Release a previously registered object: unpin (if pinned) and drop
    /// the entry. Returns `false` for an unknown identifier, which covers
    /// double-release; reported, never a native crash.
    pub fn release_object(&self, guid: BridgeGuid) -> bool {
        match self.objects.remove_object(guid) {
            Some(removed) => {
                if let Some(binding) = removed.object.as_ref().and_then(|o| o.native_binding()) {
                    self.hooks.notify_destructed(binding.class, binding.address);
                }
                true
            }
            None => {
                warn!("Failed to release object {}: not found in cache", guid);
                false
            }
        }
    }

    /// Invoke a method by identifier. See [`crate::dispatch::invoke`].
    ///
    /// Holds the lifecycle lock for the duration of the call, so an unload
    /// of the owning unit waits for the body to return. Method bodies may
    /// dispatch further calls, but must not load or unload units.
    pub fn invoke(
        &self,
        method: BridgeGuid,
        target: Option<BridgeGuid>,
        params: &[TaggedValue],
        out: &mut TaggedValue,
    ) -> BridgeResult<()> {
        // read_recursive: nested dispatch from a method body must not
        // deadlock against a queued unload.
        let _lifecycle = self.lifecycle.read_recursive();
        dispatch::invoke(
            &self.methods,
            &self.objects,
            &self.table,
            method,
            target,
            params,
            out,
        )
    }

    /// Number of loaded units.
    pub fn unit_count(&self) -> usize {
        self.units.read().len()
    }

    /// Number of registered classes across all units.
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Number of cached methods across all units.
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Number of cached objects across all units.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("units", &self.unit_count())
            .field("classes", &self.class_count())
            .field("methods", &self.method_count())
            .field("objects", &self.object_count())
            .finish()
    }
}
