//! Native engine contract
//!
//! The bridge calls into the engine through [`EngineHooks`], one
//! implementation per engine type-system binding. Everything the engine hands
//! back is an opaque handle; the bridge never dereferences native memory.

use crate::value::ValueKind;

/// Native-side stable type identifier, opaque to the managed side.
///
/// Zero means "unregistered/invalid"; all other values are stable for the
/// process lifetime.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TypeId(pub u32);

impl TypeId {
    /// The unregistered/invalid identifier.
    pub const INVALID: TypeId = TypeId(0);

    /// Whether this identifier refers to a registered native type.
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

/// Opaque handle to a native engine class object.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeClassHandle(pub usize);

/// Opaque address of a native-side object instance.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeAddress(pub usize);

impl NativeAddress {
    /// Null native address.
    pub const NULL: NativeAddress = NativeAddress(0);
}

/// Outbound contract: everything the bridge needs from the native engine.
///
/// Implementations must be callable from whichever thread the engine is
/// currently executing on.
pub trait EngineHooks: Send + Sync {
    /// Look up the native type identifier for a type name.
    /// Returns [`TypeId::INVALID`] when the name is not registered.
    fn resolve_type_id(&self, type_name: &str) -> TypeId;

    /// Look up a native class object by name, for classes that mirror an
    /// engine class.
    fn lookup_class_by_name(&self, name: &str) -> Option<NativeClassHandle>;

    /// Check a unit's declared core dependency version against the running
    /// engine. Each flag selects whether that component must match.
    fn verify_engine_version(&self, packed: u32, major: bool, minor: bool, patch: bool) -> bool;

    /// A managed instance of a native-bound class was constructed.
    fn notify_constructed(&self, class: NativeClassHandle, address: NativeAddress);

    /// A managed instance of a native-bound class was released.
    fn notify_destructed(&self, class: NativeClassHandle, address: NativeAddress);
}

/// Pack a semantic version into the wire format: `(major << 16) | (minor << 8) | patch`.
pub const fn pack_version(major: u8, minor: u8, patch: u8) -> u32 {
    ((major as u32) << 16) | ((minor as u32) << 8) | (patch as u32)
}

/// Split a packed version into (major, minor, patch).
pub const fn unpack_version(packed: u32) -> (u8, u8, u8) {
    (
        ((packed >> 16) & 0xff) as u8,
        ((packed >> 8) & 0xff) as u8,
        (packed & 0xff) as u8,
    )
}

/// Mapping from tagged-value kind to the engine's [`TypeId`] for it.
///
/// Built once when the bridge attaches to the engine, by resolving each
/// kind's canonical type name. Kinds the engine does not register map to
/// [`TypeId::INVALID`].
#[derive(Debug, Clone)]
pub struct TypeTable {
    ids: [TypeId; ValueKind::COUNT],
}

impl TypeTable {
    /// Resolve every supported kind through the engine hooks.
    pub fn from_hooks(hooks: &dyn EngineHooks) -> Self {
        let mut ids = [TypeId::INVALID; ValueKind::COUNT];
        for kind in ValueKind::ALL {
            ids[kind as usize] = hooks.resolve_type_id(kind.type_name());
        }
        TypeTable { ids }
    }

    /// A table with every kind unresolved. Containers filled through it
    /// report [`TypeId::INVALID`]; useful before an engine is attached.
    pub fn empty() -> Self {
        TypeTable {
            ids: [TypeId::INVALID; ValueKind::COUNT],
        }
    }

    /// The native type identifier for a kind.
    pub fn type_id(&self, kind: ValueKind) -> TypeId {
        self.ids[kind as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubHooks;

    impl EngineHooks for StubHooks {
        fn resolve_type_id(&self, type_name: &str) -> TypeId {
            match type_name {
                "int32" => TypeId(3),
                "float64" => TypeId(10),
                _ => TypeId::INVALID,
            }
        }

        fn lookup_class_by_name(&self, _name: &str) -> Option<NativeClassHandle> {
            None
        }

        fn verify_engine_version(
            &self,
            _packed: u32,
            _major: bool,
            _minor: bool,
            _patch: bool,
        ) -> bool {
            true
        }

        fn notify_constructed(&self, _class: NativeClassHandle, _address: NativeAddress) {}

        fn notify_destructed(&self, _class: NativeClassHandle, _address: NativeAddress) {}
    }

    #[test]
    fn test_pack_unpack_version() {
        let packed = pack_version(1, 4, 9);
        assert_eq!(packed, 0x0001_0409);
        assert_eq!(unpack_version(packed), (1, 4, 9));
    }

    #[test]
    fn test_invalid_type_id() {
        assert!(!TypeId::INVALID.is_valid());
        assert!(TypeId(1).is_valid());
    }

    #[test]
    fn test_type_table_from_hooks() {
        let table = TypeTable::from_hooks(&StubHooks);
        assert_eq!(table.type_id(ValueKind::I32), TypeId(3));
        assert_eq!(table.type_id(ValueKind::F64), TypeId(10));
        assert_eq!(table.type_id(ValueKind::Bool), TypeId::INVALID);
    }

    #[test]
    fn test_empty_table() {
        let table = TypeTable::empty();
        assert_eq!(table.type_id(ValueKind::I8), TypeId::INVALID);
    }
}
