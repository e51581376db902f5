//! Managed method cache
//!
//! Dispatch resolves methods by opaque identifier only, so every resolvable
//! method gets one entry here when its class registers. Entries are owned by
//! the unit that registered them and are swept on unit unload.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::defs::MethodDef;
use crate::guid::BridgeGuid;

/// A managed method reachable from native code.
pub struct MethodEntry {
    /// Process-unique identifier handed to the native side
    pub guid: BridgeGuid,
    /// Owning unit
    pub unit: BridgeGuid,
    /// Name of the class whose method table references this entry
    pub class_name: String,
    /// The method declaration and body
    pub def: MethodDef,
}

impl std::fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodEntry")
            .field("guid", &self.guid)
            .field("class", &self.class_name)
            .field("method", &self.def.name)
            .finish()
    }
}

/// GUID-keyed registry of method entries.
pub struct MethodCache {
    entries: RwLock<FxHashMap<BridgeGuid, Arc<MethodEntry>>>,
}

impl MethodCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        MethodCache {
            entries: RwLock::new(FxHashMap::default()),
        }
    }

    /// Mint an entry for a method under a fresh identifier.
    pub fn add_method(&self, unit: BridgeGuid, class_name: &str, def: MethodDef) -> BridgeGuid {
        let guid = BridgeGuid::new();
        let entry = Arc::new(MethodEntry {
            guid,
            unit,
            class_name: class_name.to_string(),
            def,
        });
        self.entries.write().insert(guid, entry);
        guid
    }

    /// Resolve an identifier.
    pub fn get_method(&self, guid: BridgeGuid) -> Option<Arc<MethodEntry>> {
        self.entries.read().get(&guid).cloned()
    }

    /// Remove every entry owned by a unit; returns how many were removed.
    pub fn remove_unit(&self, unit: BridgeGuid) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.unit != unit);
        before - entries.len()
    }

    /// Number of cached methods.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for MethodCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::MethodDef;
    use std::sync::Arc as StdArc;

    fn noop_method(name: &str) -> MethodDef {
        MethodDef::instance(name, vec![], None, StdArc::new(|_, _| Ok(None)))
    }

    #[test]
    fn test_add_and_get() {
        let cache = MethodCache::new();
        let unit = BridgeGuid::new();
        let guid = cache.add_method(unit, "Player", noop_method("Update"));

        let entry = cache.get_method(guid).unwrap();
        assert_eq!(entry.class_name, "Player");
        assert_eq!(entry.def.name, "Update");
        assert_eq!(entry.unit, unit);
    }

    #[test]
    fn test_unknown_method() {
        let cache = MethodCache::new();
        assert!(cache.get_method(BridgeGuid::new()).is_none());
    }

    #[test]
    fn test_remove_unit() {
        let cache = MethodCache::new();
        let unit_a = BridgeGuid::new();
        let unit_b = BridgeGuid::new();

        let a = cache.add_method(unit_a, "A", noop_method("M1"));
        cache.add_method(unit_a, "A", noop_method("M2"));
        let b = cache.add_method(unit_b, "B", noop_method("M3"));

        assert_eq!(cache.remove_unit(unit_a), 2);
        assert!(cache.get_method(a).is_none());
        assert!(cache.get_method(b).is_some());
        assert_eq!(cache.len(), 1);
    }
}
