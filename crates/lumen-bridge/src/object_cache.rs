//! Object lifetime cache
//!
//! Native code never holds a raw address of a managed object; the collector
//! may move or reclaim it. Instead it holds a random 128-bit identifier into
//! this cache. Pinning an entry makes the cache itself a root: the cache
//! keeps a strong reference so the object cannot be reclaimed until the
//! entry is explicitly removed. Transient entries hold only a weak
//! reference; once the last strong reference elsewhere drops, lookups report
//! the object as gone rather than resurrecting freed memory.

use std::any::Any;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::engine::{NativeAddress, NativeClassHandle};
use crate::guid::BridgeGuid;

/// Association between a managed instance and the engine class it mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeBinding {
    /// Engine class object
    pub class: NativeClassHandle,
    /// Engine-side instance address
    pub address: NativeAddress,
}

/// A managed-side object instance as seen by the bridge.
pub struct ManagedObject {
    instance: Arc<dyn Any + Send + Sync>,
    native: Option<NativeBinding>,
}

impl ManagedObject {
    /// Wrap a managed instance with no engine counterpart.
    pub fn new(instance: Arc<dyn Any + Send + Sync>) -> Self {
        ManagedObject {
            instance,
            native: None,
        }
    }

    /// Wrap a managed instance bound to an engine class and address.
    pub fn with_binding(instance: Arc<dyn Any + Send + Sync>, binding: NativeBinding) -> Self {
        ManagedObject {
            instance,
            native: Some(binding),
        }
    }

    /// The underlying instance.
    pub fn instance(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.instance
    }

    /// Typed view of the instance, if `T` matches.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.instance.downcast_ref::<T>()
    }

    /// The engine binding, when this object mirrors a native class.
    pub fn native_binding(&self) -> Option<NativeBinding> {
        self.native
    }
}

impl std::fmt::Debug for ManagedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedObject")
            .field("native", &self.native)
            .finish_non_exhaustive()
    }
}

/// Ownership mode of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// The cache holds a root; the object survives until the entry is removed.
    Pinned,
    /// The cache holds a weak reference; retrievability after the last strong
    /// reference drops is not guaranteed.
    Transient,
}

/// What the native side stores for a registered object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Process-unique identifier
    pub guid: BridgeGuid,
    /// Owning unit
    pub unit: BridgeGuid,
    /// Ownership mode
    pub lifetime: Lifetime,
}

enum Slot {
    Pinned(Arc<ManagedObject>),
    Transient(Weak<ManagedObject>),
}

impl Slot {
    fn lifetime(&self) -> Lifetime {
        match self {
            Slot::Pinned(_) => Lifetime::Pinned,
            Slot::Transient(_) => Lifetime::Transient,
        }
    }

    fn upgrade(&self) -> Option<Arc<ManagedObject>> {
        match self {
            Slot::Pinned(object) => Some(object.clone()),
            Slot::Transient(weak) => weak.upgrade(),
        }
    }
}

struct CacheRecord {
    unit: BridgeGuid,
    slot: Slot,
}

/// An entry removed from the cache, carried back so the caller can fire
/// engine notifications for objects that were still alive.
pub struct RemovedObject {
    /// The entry the native side held
    pub entry: ObjectEntry,
    /// The object, when it was still reachable at removal time
    pub object: Option<Arc<ManagedObject>>,
}

/// GUID-keyed registry of managed objects reachable from native code.
pub struct ObjectCache {
    records: RwLock<FxHashMap<BridgeGuid, CacheRecord>>,
}

impl ObjectCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        ObjectCache {
            records: RwLock::new(FxHashMap::default()),
        }
    }

    /// Register an object under a fresh identifier. With `pin` the cache
    /// holds a root; otherwise only a weak reference.
    pub fn add_object(
        &self,
        unit: BridgeGuid,
        object: &Arc<ManagedObject>,
        pin: bool,
    ) -> ObjectEntry {
        let guid = BridgeGuid::new();
        let slot = if pin {
            Slot::Pinned(object.clone())
        } else {
            Slot::Transient(Arc::downgrade(object))
        };
        let entry = ObjectEntry {
            guid,
            unit,
            lifetime: slot.lifetime(),
        };

        self.records
            .write()
            .insert(guid, CacheRecord { unit, slot });

        entry
    }

    /// Resolve an identifier to the live object. `None` covers both unknown
    /// identifiers and transient objects that have been reclaimed.
    pub fn get_object(&self, guid: BridgeGuid) -> Option<Arc<ManagedObject>> {
        self.records.read().get(&guid).and_then(|r| r.slot.upgrade())
    }

    /// The entry metadata for an identifier, without touching the object.
    pub fn get_entry(&self, guid: BridgeGuid) -> Option<ObjectEntry> {
        self.records.read().get(&guid).map(|r| ObjectEntry {
            guid,
            unit: r.unit,
            lifetime: r.slot.lifetime(),
        })
    }

    /// Unpin (if pinned) and remove an entry. `None` when the identifier is
    /// unknown; reportable, not fatal.
    pub fn remove_object(&self, guid: BridgeGuid) -> Option<RemovedObject> {
        let record = self.records.write().remove(&guid)?;
        Some(RemovedObject {
            entry: ObjectEntry {
                guid,
                unit: record.unit,
                lifetime: record.slot.lifetime(),
            },
            object: record.slot.upgrade(),
        })
    }

    /// Remove every entry owned by a unit. Used during unit unload; entries
    /// are swept under a single write lock so in-flight lookups observe
    /// either the full entry or nothing.
    pub fn remove_unit(&self, unit: BridgeGuid) -> Vec<RemovedObject> {
        let mut records = self.records.write();
        let guids: Vec<BridgeGuid> = records
            .iter()
            .filter(|(_, r)| r.unit == unit)
            .map(|(guid, _)| *guid)
            .collect();

        guids
            .into_iter()
            .filter_map(|guid| {
                records.remove(&guid).map(|record| RemovedObject {
                    entry: ObjectEntry {
                        guid,
                        unit: record.unit,
                        lifetime: record.slot.lifetime(),
                    },
                    object: record.slot.upgrade(),
                })
            })
            .collect()
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for ObjectCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_object(value: i32) -> Arc<ManagedObject> {
        Arc::new(ManagedObject::new(Arc::new(value)))
    }

    #[test]
    fn test_add_and_get() {
        let cache = ObjectCache::new();
        let unit = BridgeGuid::new();
        let object = make_object(7);

        let entry = cache.add_object(unit, &object, true);
        assert_eq!(entry.unit, unit);
        assert_eq!(entry.lifetime, Lifetime::Pinned);

        let resolved = cache.get_object(entry.guid).unwrap();
        assert_eq!(resolved.downcast_ref::<i32>(), Some(&7));
    }

    #[test]
    fn test_pinned_survives_collection() {
        let cache = ObjectCache::new();
        let unit = BridgeGuid::new();
        let entry = {
            let object = make_object(1);
            cache.add_object(unit, &object, true)
            // caller's strong reference dropped here
        };

        assert!(cache.get_object(entry.guid).is_some());
        assert!(cache.remove_object(entry.guid).is_some());
        assert!(cache.get_object(entry.guid).is_none());
    }

    #[test]
    fn test_transient_may_be_collected() {
        let cache = ObjectCache::new();
        let unit = BridgeGuid::new();
        let entry = {
            let object = make_object(2);
            cache.add_object(unit, &object, false)
        };

        // Retrievability is not guaranteed once the last strong reference is
        // gone; removal must still succeed without crashing.
        assert!(cache.get_object(entry.guid).is_none());
        let removed = cache.remove_object(entry.guid).unwrap();
        assert!(removed.object.is_none());
    }

    #[test]
    fn test_transient_alive_while_referenced() {
        let cache = ObjectCache::new();
        let unit = BridgeGuid::new();
        let object = make_object(3);
        let entry = cache.add_object(unit, &object, false);

        assert!(cache.get_object(entry.guid).is_some());
    }

    #[test]
    fn test_remove_unknown_is_reported() {
        let cache = ObjectCache::new();
        assert!(cache.remove_object(BridgeGuid::new()).is_none());
    }

    #[test]
    fn test_double_remove() {
        let cache = ObjectCache::new();
        let unit = BridgeGuid::new();
        let object = make_object(4);
        let entry = cache.add_object(unit, &object, true);

        assert!(cache.remove_object(entry.guid).is_some());
        assert!(cache.remove_object(entry.guid).is_none());
    }

    #[test]
    fn test_remove_unit_sweeps_only_that_unit() {
        let cache = ObjectCache::new();
        let unit_a = BridgeGuid::new();
        let unit_b = BridgeGuid::new();
        let a1 = make_object(1);
        let a2 = make_object(2);
        let b1 = make_object(3);

        cache.add_object(unit_a, &a1, true);
        cache.add_object(unit_a, &a2, false);
        let kept = cache.add_object(unit_b, &b1, true);

        let removed = cache.remove_unit(unit_a);
        assert_eq!(removed.len(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get_object(kept.guid).is_some());
    }

    #[test]
    fn test_native_binding_carried() {
        let cache = ObjectCache::new();
        let unit = BridgeGuid::new();
        let binding = NativeBinding {
            class: NativeClassHandle(0x10),
            address: NativeAddress(0x20),
        };
        let object = Arc::new(ManagedObject::with_binding(Arc::new(0u8), binding));
        let entry = cache.add_object(unit, &object, true);

        let resolved = cache.get_object(entry.guid).unwrap();
        assert_eq!(resolved.native_binding(), Some(binding));
    }
}
