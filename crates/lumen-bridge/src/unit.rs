//! Assembly/unit lifecycle types
//!
//! A unit is one loaded collection of managed types. Loading walks the
//! unit's exported type descriptors through the class registry; unloading
//! cascades removal through every cache. How a unit's manifest is produced
//! is behind [`UnitLoader`], so the bridge itself never touches the
//! filesystem.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rustc_hash::FxHashMap;

use crate::defs::TypeDef;
use crate::error::{BridgeError, BridgeResult};
use crate::guid::BridgeGuid;

/// Everything a loaded unit exports to the bridge.
#[derive(Debug, Default)]
pub struct UnitManifest {
    /// Exported class descriptors
    pub types: Vec<TypeDef>,
    /// Packed version of the bridge core contract this unit was built
    /// against, when it declares the dependency
    pub core_dependency: Option<u32>,
}

impl UnitManifest {
    /// An empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an exported type.
    pub fn with_type(mut self, def: TypeDef) -> Self {
        self.types.push(def);
        self
    }

    /// Declare the core contract version this unit was built against.
    pub fn with_core_dependency(mut self, packed: u32) -> Self {
        self.core_dependency = Some(packed);
        self
    }
}

/// Produces a unit's manifest from its path.
pub trait UnitLoader: Send + Sync {
    /// Load the unit at `path` and return its manifest.
    fn load(&self, path: &Path) -> BridgeResult<UnitManifest>;

    /// Release loader-held resources for an unloaded unit (for example a
    /// shared-library handle). Called after the unit's caches are purged.
    fn release(&self, _path: &Path) {}
}

/// One loaded boundary unit.
#[derive(Debug, Clone)]
pub struct AssemblyUnit {
    /// Unique identifier
    pub guid: BridgeGuid,
    /// Source path the unit was loaded from
    pub path: PathBuf,
    /// Exactly one core unit may be loaded; re-requesting it is a no-op
    pub is_core: bool,
}

/// Outcome of a unit load. Per-type configuration failures do not abort the
/// load; they are collected here for the caller.
#[derive(Debug)]
pub struct LoadReport {
    /// Identifier of the (possibly pre-existing) unit
    pub unit: BridgeGuid,
    /// How many classes registered successfully
    pub registered: usize,
    /// Types that failed registration, with their configuration errors
    pub warnings: Vec<BridgeError>,
    /// The core unit was already loaded; nothing was registered
    pub already_loaded: bool,
}

type ManifestFactory = Box<dyn Fn() -> UnitManifest + Send + Sync>;

/// In-process unit loader: manifests registered directly against paths.
///
/// Used by embedders that link their units statically, and by tests.
#[derive(Default)]
pub struct StaticLoader {
    manifests: Mutex<FxHashMap<PathBuf, ManifestFactory>>,
}

impl StaticLoader {
    /// Create an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manifest factory for a path.
    pub fn register<F>(&self, path: impl Into<PathBuf>, factory: F)
    where
        F: Fn() -> UnitManifest + Send + Sync + 'static,
    {
        if let Ok(mut manifests) = self.manifests.lock() {
            manifests.insert(path.into(), Box::new(factory));
        }
    }
}

impl UnitLoader for StaticLoader {
    fn load(&self, path: &Path) -> BridgeResult<UnitManifest> {
        let manifests = self
            .manifests
            .lock()
            .map_err(|_| BridgeError::Load("unit table poisoned".to_string()))?;
        let factory = manifests
            .get(path)
            .ok_or_else(|| BridgeError::Load(format!("no unit registered at {}", path.display())))?;
        Ok(factory())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_loader_unknown_path() {
        let loader = StaticLoader::new();
        let err = loader.load(Path::new("/missing.unit")).unwrap_err();
        assert!(matches!(err, BridgeError::Load(_)));
    }

    #[test]
    fn test_static_loader_roundtrip() {
        let loader = StaticLoader::new();
        loader.register("/game.unit", || {
            UnitManifest::new().with_type(TypeDef::new("Foo"))
        });

        let manifest = loader.load(Path::new("/game.unit")).unwrap();
        assert_eq!(manifest.types.len(), 1);
        assert_eq!(manifest.types[0].name, "Foo");
    }
}
