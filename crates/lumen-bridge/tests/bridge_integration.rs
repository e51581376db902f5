//! Integration tests for the full bridge lifecycle
//!
//! Exercises the path a real engine takes: attach with hooks, load a unit,
//! register classes, construct instances, dispatch methods through tagged
//! value slots, and unload with cascading cache removal.

use std::any::Any;
use std::sync::{Arc, Mutex};

use lumen_bridge::{
    pack_version, Bridge, BridgeError, ClassBinding, EngineHooks, MethodDef, NativeAddress,
    NativeClassHandle, StaticLoader, TaggedValue, TypeDef, TypeId, UnitManifest, Value, ValueKind,
};

// ============================================================================
// Test Engine
// ============================================================================

/// Engine stand-in that records lifecycle notifications.
#[derive(Default)]
struct TestEngine {
    known_classes: Vec<&'static str>,
    accept_version: bool,
    constructed: Mutex<Vec<(NativeClassHandle, NativeAddress)>>,
    destructed: Mutex<Vec<(NativeClassHandle, NativeAddress)>>,
}

impl TestEngine {
    fn new() -> Self {
        TestEngine {
            accept_version: true,
            ..Default::default()
        }
    }

    fn with_classes(classes: Vec<&'static str>) -> Self {
        TestEngine {
            known_classes: classes,
            ..Self::new()
        }
    }
}

impl EngineHooks for TestEngine {
    fn resolve_type_id(&self, _type_name: &str) -> TypeId {
        TypeId::INVALID
    }

    fn lookup_class_by_name(&self, name: &str) -> Option<NativeClassHandle> {
        self.known_classes
            .iter()
            .position(|known| *known == name)
            .map(|i| NativeClassHandle(i + 1))
    }

    fn verify_engine_version(&self, _packed: u32, _: bool, _: bool, _: bool) -> bool {
        self.accept_version
    }

    fn notify_constructed(&self, class: NativeClassHandle, address: NativeAddress) {
        self.constructed.lock().unwrap().push((class, address));
    }

    fn notify_destructed(&self, class: NativeClassHandle, address: NativeAddress) {
        self.destructed.lock().unwrap().push((class, address));
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn ctor_i32(value: i32) -> lumen_bridge::Constructor {
    Arc::new(move || Arc::new(value) as Arc<dyn Any + Send + Sync>)
}

/// Base with Tick() -> i32 (constant 1); Foo extends Base with
/// Bar(i32) -> i32 returning instance base + argument.
fn game_manifest() -> UnitManifest {
    let base = TypeDef::new("Base")
        .with_constructor(ctor_i32(0))
        .with_method(MethodDef::instance(
            "Tick",
            vec![],
            Some(ValueKind::I32),
            Arc::new(|_, _| Ok(Some(Value::I32(1)))),
        ));

    let foo = TypeDef::new("Foo")
        .with_parent("Base")
        .with_constructor(ctor_i32(20))
        .with_method(MethodDef::instance(
            "Bar",
            vec![ValueKind::I32],
            Some(ValueKind::I32),
            Arc::new(|this, args| {
                let this = this.ok_or("no target")?;
                let base = this.downcast_ref::<i32>().ok_or("wrong instance type")?;
                let Value::I32(add) = args[0] else {
                    return Err("bad argument".to_string());
                };
                Ok(Some(Value::I32(base + add)))
            }),
        ));

    UnitManifest::new().with_type(base).with_type(foo)
}

fn game_bridge(engine: Arc<TestEngine>) -> Bridge {
    let loader = StaticLoader::new();
    loader.register("/game.unit", game_manifest);
    Bridge::new(engine, Arc::new(loader))
}

fn i32_slot(bridge: &Bridge, value: i32) -> TaggedValue {
    let mut slot = TaggedValue::construct();
    slot.set(Value::I32(value), bridge.type_table()).unwrap();
    slot
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_load_construct_invoke_unload() {
    let bridge = game_bridge(Arc::new(TestEngine::new()));

    let report = bridge.load_unit("/game.unit", false).unwrap();
    assert_eq!(report.registered, 2);
    assert!(report.warnings.is_empty());
    let unit = report.unit;

    let foo = bridge.find_class(unit, "Foo").unwrap();
    let bar = foo.method("Bar").unwrap();

    let (entry, _object) = bridge
        .construct_object(unit, "Foo", true, NativeAddress::NULL)
        .unwrap();

    let arg = i32_slot(&bridge, 5);
    let mut out = TaggedValue::construct();
    bridge
        .invoke(bar, Some(entry.guid), &[arg.clone()], &mut out)
        .unwrap();
    assert_eq!(out.get_i32(), Some(25));

    assert!(bridge.unload_unit(unit));

    // Every identifier owned by the unit stops resolving.
    let mut out = TaggedValue::construct();
    let err = bridge
        .invoke(bar, Some(entry.guid), &[arg], &mut out)
        .unwrap_err();
    assert!(matches!(err, BridgeError::UnknownMethod(_)));
    assert!(bridge.find_class(unit, "Foo").is_none());
    assert!(matches!(
        bridge.get_object(entry.guid),
        Err(BridgeError::UnknownObject(_))
    ));

    assert_eq!(bridge.class_count(), 0);
    assert_eq!(bridge.method_count(), 0);
    assert_eq!(bridge.object_count(), 0);
}

#[test]
fn test_inherited_method_dispatches_on_subclass() {
    let bridge = game_bridge(Arc::new(TestEngine::new()));
    let unit = bridge.load_unit("/game.unit", false).unwrap().unit;

    let base = bridge.find_class(unit, "Base").unwrap();
    let foo = bridge.find_class(unit, "Foo").unwrap();

    // The subclass exposes the inherited method under its own identifier.
    let tick = foo.method("Tick").unwrap();
    assert_ne!(Some(tick), base.method("Tick"));

    let (entry, _object) = bridge
        .construct_object(unit, "Foo", true, NativeAddress::NULL)
        .unwrap();

    let mut out = TaggedValue::construct();
    bridge.invoke(tick, Some(entry.guid), &[], &mut out).unwrap();
    assert_eq!(out.get_i32(), Some(1));
}

#[test]
fn test_version_mismatch_rejects_whole_unit() {
    let engine = Arc::new(TestEngine {
        accept_version: false,
        ..TestEngine::new()
    });
    let loader = StaticLoader::new();
    loader.register("/game.unit", || {
        game_manifest().with_core_dependency(pack_version(0, 3, 0))
    });
    let bridge = Bridge::new(engine, Arc::new(loader));

    let err = bridge.load_unit("/game.unit", false).unwrap_err();
    assert!(matches!(err, BridgeError::VersionMismatch(_)));

    // Nothing registered, nothing retained.
    assert_eq!(bridge.unit_count(), 0);
    assert_eq!(bridge.class_count(), 0);
    assert_eq!(bridge.method_count(), 0);
}

#[test]
fn test_partial_registration_reports_warnings() {
    let loader = StaticLoader::new();
    loader.register("/mixed.unit", || {
        UnitManifest::new()
            .with_type(TypeDef::new("Good").with_constructor(ctor_i32(0)))
            .with_type(TypeDef::new("NoCtor"))
    });
    let bridge = Bridge::new(Arc::new(TestEngine::new()), Arc::new(loader));

    let report = bridge.load_unit("/mixed.unit", false).unwrap();
    assert_eq!(report.registered, 1);
    assert_eq!(report.warnings.len(), 1);
    assert!(matches!(
        report.warnings[0],
        BridgeError::ConstructionUnsupported { .. }
    ));

    // The good type is usable despite its sibling's failure.
    assert!(bridge.find_class(report.unit, "Good").is_some());
    assert!(bridge.find_class(report.unit, "NoCtor").is_none());
}

// ============================================================================
// Object Lifetime
// ============================================================================

#[test]
fn test_pinned_object_survives_dropped_references() {
    let bridge = game_bridge(Arc::new(TestEngine::new()));
    let unit = bridge.load_unit("/game.unit", false).unwrap().unit;

    let (entry, object) = bridge
        .construct_object(unit, "Foo", true, NativeAddress::NULL)
        .unwrap();
    drop(object);

    // The cache root keeps a pinned instance alive.
    assert!(bridge.get_object(entry.guid).is_ok());

    assert!(bridge.release_object(entry.guid));
    assert!(bridge.get_object(entry.guid).is_err());
    // Double release is refused, not fatal.
    assert!(!bridge.release_object(entry.guid));
}

#[test]
fn test_transient_object_expires_without_crashing() {
    let bridge = game_bridge(Arc::new(TestEngine::new()));
    let unit = bridge.load_unit("/game.unit", false).unwrap().unit;

    let foo = bridge.find_class(unit, "Foo").unwrap();
    let bar = foo.method("Bar").unwrap();

    let (entry, object) = bridge
        .construct_object(unit, "Foo", false, NativeAddress::NULL)
        .unwrap();
    assert!(bridge.get_object(entry.guid).is_ok());

    drop(object);

    // The entry no longer resolves; dispatch against it fails loudly.
    assert!(bridge.get_object(entry.guid).is_err());
    let arg = i32_slot(&bridge, 5);
    let mut out = TaggedValue::construct();
    let err = bridge
        .invoke(bar, Some(entry.guid), &[arg], &mut out)
        .unwrap_err();
    assert!(matches!(err, BridgeError::UnknownObject(_)));
    assert!(!out.is_valid());
}

// ============================================================================
// Engine Notifications
// ============================================================================

#[test]
fn test_bound_class_fires_lifecycle_notifications() {
    let engine = Arc::new(TestEngine::with_classes(vec!["Actor"]));
    let loader = StaticLoader::new();
    loader.register("/actors.unit", || {
        UnitManifest::new().with_type(
            TypeDef::new("Actor")
                .with_binding(ClassBinding::same_name())
                .with_constructor(ctor_i32(0)),
        )
    });
    let bridge = Bridge::new(engine.clone(), Arc::new(loader));
    let unit = bridge.load_unit("/actors.unit", false).unwrap().unit;

    let address = NativeAddress(0x1000);
    let (entry, _object) = bridge
        .construct_object(unit, "Actor", true, address)
        .unwrap();
    assert_eq!(
        engine.constructed.lock().unwrap().as_slice(),
        &[(NativeClassHandle(1), address)]
    );

    assert!(bridge.release_object(entry.guid));
    assert_eq!(
        engine.destructed.lock().unwrap().as_slice(),
        &[(NativeClassHandle(1), address)]
    );
}

#[test]
fn test_unload_notifies_live_bound_objects() {
    let engine = Arc::new(TestEngine::with_classes(vec!["Actor"]));
    let loader = StaticLoader::new();
    loader.register("/actors.unit", || {
        UnitManifest::new().with_type(
            TypeDef::new("Actor")
                .with_binding(ClassBinding::same_name())
                .with_constructor(ctor_i32(0)),
        )
    });
    let bridge = Bridge::new(engine.clone(), Arc::new(loader));
    let unit = bridge.load_unit("/actors.unit", false).unwrap().unit;

    let pinned = NativeAddress(0x2000);
    bridge
        .construct_object(unit, "Actor", true, pinned)
        .unwrap();

    // A transient instance that already expired is not re-notified.
    let transient = NativeAddress(0x3000);
    let (_entry, object) = bridge
        .construct_object(unit, "Actor", false, transient)
        .unwrap();
    drop(object);

    assert!(bridge.unload_unit(unit));

    let destructed = engine.destructed.lock().unwrap();
    assert_eq!(destructed.as_slice(), &[(NativeClassHandle(1), pinned)]);
}

// ============================================================================
// Registered Objects
// ============================================================================

#[test]
fn test_register_existing_object_and_pass_by_reference() {
    let bridge = game_bridge(Arc::new(TestEngine::new()));
    let unit = bridge.load_unit("/game.unit", false).unwrap().unit;

    let object = Arc::new(lumen_bridge::ManagedObject::new(
        Arc::new(7i32) as Arc<dyn Any + Send + Sync>
    ));
    let entry = bridge.register_object(unit, &object, true).unwrap();

    // An object reference travels through a tagged slot as its identifier.
    let mut slot = TaggedValue::construct();
    slot.set(Value::Object(entry.guid), bridge.type_table())
        .unwrap();
    let guid = slot.get_object().unwrap();
    assert_eq!(guid, entry.guid);

    let resolved = bridge.get_object(guid).unwrap();
    assert_eq!(resolved.downcast_ref::<i32>(), Some(&7));
}

// ============================================================================
// Lifecycle vs. Dispatch Serialization
// ============================================================================

/// Delegating loader that widens the load window, so concurrent loads of the
/// same path actually overlap unless the bridge serializes them.
struct SlowLoader {
    inner: StaticLoader,
}

impl lumen_bridge::UnitLoader for SlowLoader {
    fn load(&self, path: &std::path::Path) -> lumen_bridge::BridgeResult<UnitManifest> {
        std::thread::sleep(std::time::Duration::from_millis(25));
        self.inner.load(path)
    }
}

#[test]
fn test_unload_waits_for_inflight_dispatch() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Barrier;

    let started = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));

    let loader = StaticLoader::new();
    {
        let started = started.clone();
        let release = release.clone();
        loader.register("/stall.unit", move || {
            let started = started.clone();
            let release = release.clone();
            UnitManifest::new().with_type(
                TypeDef::new("Gate")
                    .with_constructor(ctor_i32(0))
                    .with_method(MethodDef::staticm(
                        "Stall",
                        vec![],
                        Some(ValueKind::I32),
                        Arc::new(move |_, _| {
                            started.wait();
                            release.wait();
                            Ok(Some(Value::I32(7)))
                        }),
                    )),
            )
        });
    }

    let bridge = Arc::new(Bridge::new(Arc::new(TestEngine::new()), Arc::new(loader)));
    let unit = bridge.load_unit("/stall.unit", false).unwrap().unit;
    let stall = bridge
        .find_class(unit, "Gate")
        .unwrap()
        .method("Stall")
        .unwrap();

    let invoker = {
        let bridge = bridge.clone();
        std::thread::spawn(move || {
            let mut out = TaggedValue::construct();
            bridge.invoke(stall, None, &[], &mut out)?;
            Ok::<_, BridgeError>(out.get_i32())
        })
    };

    // The body is now in flight, parked before producing its result.
    started.wait();

    let unloaded = Arc::new(AtomicBool::new(false));
    let unloader = {
        let bridge = bridge.clone();
        let unloaded = unloaded.clone();
        std::thread::spawn(move || {
            assert!(bridge.unload_unit(unit));
            unloaded.store(true, Ordering::SeqCst);
        })
    };

    // The unload must block while the body is still executing; otherwise the
    // unit's library would be closed under it.
    std::thread::sleep(std::time::Duration::from_millis(50));
    assert!(!unloaded.load(Ordering::SeqCst));

    release.wait();
    assert_eq!(invoker.join().unwrap().unwrap(), Some(7));
    unloader.join().unwrap();
    assert!(unloaded.load(Ordering::SeqCst));
    assert_eq!(bridge.method_count(), 0);
}

#[test]
fn test_concurrent_duplicate_loads_admit_one() {
    let inner = StaticLoader::new();
    inner.register("/game.unit", game_manifest);
    let bridge = Arc::new(Bridge::new(
        Arc::new(TestEngine::new()),
        Arc::new(SlowLoader { inner }),
    ));

    let threads: Vec<_> = (0..2)
        .map(|_| {
            let bridge = bridge.clone();
            std::thread::spawn(move || bridge.load_unit("/game.unit", false).map(|r| r.unit))
        })
        .collect();

    let results: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
    let loaded = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(BridgeError::AlreadyLoaded(_))))
        .count();

    assert_eq!(loaded, 1);
    assert_eq!(rejected, 1);
    assert_eq!(bridge.unit_count(), 1);
    assert_eq!(bridge.class_count(), 2);
}

#[test]
fn test_identifiers_are_unique_per_construction() {
    let bridge = game_bridge(Arc::new(TestEngine::new()));
    let unit = bridge.load_unit("/game.unit", false).unwrap().unit;

    let (a, _keep_a) = bridge
        .construct_object(unit, "Foo", true, NativeAddress::NULL)
        .unwrap();
    let (b, _keep_b) = bridge
        .construct_object(unit, "Foo", true, NativeAddress::NULL)
        .unwrap();

    assert_ne!(a.guid, b.guid);
    assert!(!a.guid.is_nil());
    assert!(!b.guid.is_nil());
}
