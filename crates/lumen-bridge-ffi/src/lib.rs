//! C FFI bindings for the Lumen interop bridge
//!
//! This module provides the C-compatible API a native engine links against.
//! The API follows these principles:
//! - ABI-stable (uses only C-compatible types)
//! - Thread-safe (a bridge instance can be used from multiple threads)
//! - Error handling via out-parameters
//! - Opaque pointers for the bridge; by-value structs for identifiers and
//!   tagged value slots (both `#[repr(C)]`)
//! - Manual memory management
//!
//! Engine callbacks come in through [`LumenEngineHooks`], a function-pointer
//! table captured at `lumen_bridge_new`. Null entries fall back to inert
//! defaults so a minimal embedder only fills in what it needs.

use std::any::Any;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::sync::Arc;

use lumen_bridge::{
    Bridge, BridgeError, BridgeGuid, DynamicLoader, EngineHooks, ManagedObject, NativeAddress,
    NativeBinding, NativeClassHandle, TaggedValue, TypeId, Value, ValueKind,
};

// ============================================================================
// Opaque Types
// ============================================================================

/// Opaque handle to a bridge instance
#[repr(C)]
pub struct LumenBridge {
    _private: [u8; 0],
}

/// Error information
#[repr(C)]
pub struct LumenError {
    message: *mut c_char,
}

// Internal representation of the bridge (not exposed to C)
struct BridgeHandle {
    bridge: Bridge,
}

// ============================================================================
// Engine Hooks
// ============================================================================

/// Engine callback table, captured by value at `lumen_bridge_new`.
///
/// Every entry may be null; null callbacks behave as "not supported":
/// type ids resolve to invalid, class lookups find nothing, version checks
/// pass, lifecycle notifications are dropped.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct LumenEngineHooks {
    /// Passed back as the first argument of every callback
    pub user_data: *mut c_void,
    /// Resolve an engine type id for a boundary type name; 0 means invalid
    pub resolve_type_id:
        Option<unsafe extern "C" fn(user_data: *mut c_void, type_name: *const c_char) -> u32>,
    /// Find the engine-side class for a managed class name; 0 means none
    pub lookup_class_by_name:
        Option<unsafe extern "C" fn(user_data: *mut c_void, name: *const c_char) -> usize>,
    /// Check a packed `(major << 16) | (minor << 8) | patch` version against
    /// the engine; the flags select which components must match
    pub verify_engine_version: Option<
        unsafe extern "C" fn(
            user_data: *mut c_void,
            packed: u32,
            major: c_int,
            minor: c_int,
            patch: c_int,
        ) -> c_int,
    >,
    /// A managed instance bound to a native object was constructed
    pub notify_constructed:
        Option<unsafe extern "C" fn(user_data: *mut c_void, class: usize, address: usize)>,
    /// A managed instance bound to a native object was released
    pub notify_destructed:
        Option<unsafe extern "C" fn(user_data: *mut c_void, class: usize, address: usize)>,
}

struct CHooks {
    table: LumenEngineHooks,
}

// The embedder promises its callbacks and user_data are callable from any
// thread; the bridge itself serializes nothing on their behalf.
unsafe impl Send for CHooks {}
unsafe impl Sync for CHooks {}

impl EngineHooks for CHooks {
    fn resolve_type_id(&self, type_name: &str) -> TypeId {
        let Some(callback) = self.table.resolve_type_id else {
            return TypeId::INVALID;
        };
        let Ok(c_name) = CString::new(type_name) else {
            return TypeId::INVALID;
        };
        TypeId(unsafe { callback(self.table.user_data, c_name.as_ptr()) })
    }

    fn lookup_class_by_name(&self, name: &str) -> Option<NativeClassHandle> {
        let callback = self.table.lookup_class_by_name?;
        let c_name = CString::new(name).ok()?;
        let raw = unsafe { callback(self.table.user_data, c_name.as_ptr()) };
        if raw == 0 {
            None
        } else {
            Some(NativeClassHandle(raw))
        }
    }

    fn verify_engine_version(&self, packed: u32, major: bool, minor: bool, patch: bool) -> bool {
        let Some(callback) = self.table.verify_engine_version else {
            return true;
        };
        unsafe {
            callback(
                self.table.user_data,
                packed,
                major as c_int,
                minor as c_int,
                patch as c_int,
            ) != 0
        }
    }

    fn notify_constructed(&self, class: NativeClassHandle, address: NativeAddress) {
        if let Some(callback) = self.table.notify_constructed {
            unsafe { callback(self.table.user_data, class.0, address.0) };
        }
    }

    fn notify_destructed(&self, class: NativeClassHandle, address: NativeAddress) {
        if let Some(callback) = self.table.notify_destructed {
            unsafe { callback(self.table.user_data, class.0, address.0) };
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert Rust string to C string (caller must free)
unsafe fn rust_to_c_string(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(c_str) => c_str.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

unsafe fn create_error(message: &str) -> *mut LumenError {
    let message = rust_to_c_string(message);
    Box::into_raw(Box::new(LumenError { message }))
}

/// Set error out-parameter
unsafe fn set_error(error_out: *mut *mut LumenError, message: &str) {
    if !error_out.is_null() {
        *error_out = create_error(message);
    }
}

unsafe fn bridge_ref<'a>(bridge: *mut LumenBridge) -> &'a BridgeHandle {
    &*(bridge as *mut BridgeHandle)
}

// ============================================================================
// Error Functions
// ============================================================================

/// Get the message from an error
///
/// # Returns
/// * Null-terminated message string, owned by the error
/// * NULL if the error pointer is NULL
///
/// # Safety
/// - The returned string is valid until `lumen_error_free()` is called
#[no_mangle]
pub unsafe extern "C" fn lumen_error_message(error: *const LumenError) -> *const c_char {
    if error.is_null() {
        return ptr::null();
    }
    (*error).message
}

/// Free an error and its message
///
/// # Safety
/// - The error must have come from this library and not be freed twice
/// - NULL is accepted and ignored
#[no_mangle]
pub unsafe extern "C" fn lumen_error_free(error: *mut LumenError) {
    if error.is_null() {
        return;
    }
    let error = Box::from_raw(error);
    if !error.message.is_null() {
        drop(CString::from_raw(error.message));
    }
}

// ============================================================================
// Bridge Lifecycle Functions
// ============================================================================

/// Create a bridge attached to an engine
///
/// # Arguments
/// * `hooks` - Engine callback table, copied; may be NULL for an inert engine
/// * `error` - Optional pointer to receive error information
///
/// # Returns
/// * Non-null pointer to LumenBridge on success
/// * NULL on failure (check error parameter)
///
/// # Safety
/// - The callbacks in `hooks` must stay callable, from any thread, for the
///   lifetime of the bridge
/// - The returned bridge must be freed with `lumen_bridge_destroy()`
#[no_mangle]
pub unsafe extern "C" fn lumen_bridge_new(
    hooks: *const LumenEngineHooks,
    _error: *mut *mut LumenError,
) -> *mut LumenBridge {
    let table = if hooks.is_null() {
        LumenEngineHooks {
            user_data: ptr::null_mut(),
            resolve_type_id: None,
            lookup_class_by_name: None,
            verify_engine_version: None,
            notify_constructed: None,
            notify_destructed: None,
        }
    } else {
        *hooks
    };

    let bridge = Bridge::new(Arc::new(CHooks { table }), Arc::new(DynamicLoader::new()));
    log::debug!("Bridge created");
    Box::into_raw(Box::new(BridgeHandle { bridge })) as *mut LumenBridge
}

/// Destroy a bridge and free all resources
///
/// Live objects in the cache are dropped; engine destruct notifications are
/// NOT fired (the engine is assumed to be tearing down too).
///
/// # Safety
/// - The bridge pointer must be valid (created by `lumen_bridge_new()`)
/// - The bridge must not be used after this call
#[no_mangle]
pub unsafe extern "C" fn lumen_bridge_destroy(bridge: *mut LumenBridge) {
    if bridge.is_null() {
        return;
    }
    drop(Box::from_raw(bridge as *mut BridgeHandle));
}

// ============================================================================
// Unit Functions
// ============================================================================

/// Load a code unit from a shared library
///
/// The library must export `lumen_unit_manifest`. Re-loading the core unit
/// from the same path succeeds and returns the existing identifier; a
/// duplicate non-core load fails.
///
/// # Arguments
/// * `bridge` - Pointer to LumenBridge (must not be NULL)
/// * `path` - Null-terminated path to the unit library
/// * `is_core` - Non-zero to load as the core unit
/// * `unit_out` - Receives the unit identifier on success
/// * `error` - Optional pointer to receive error information
///
/// # Returns
/// * 0 on success
/// * -1 on failure (check error parameter)
///
/// # Safety
/// - All non-optional pointers must be valid
/// - `path` must be a valid null-terminated string
#[no_mangle]
pub unsafe extern "C" fn lumen_unit_load(
    bridge: *mut LumenBridge,
    path: *const c_char,
    is_core: c_int,
    unit_out: *mut BridgeGuid,
    error: *mut *mut LumenError,
) -> c_int {
    if bridge.is_null() || path.is_null() || unit_out.is_null() {
        set_error(error, "Invalid arguments (null pointer)");
        return -1;
    }

    let path_str = match CStr::from_ptr(path).to_str() {
        Ok(s) => s,
        Err(_) => {
            set_error(error, "Invalid UTF-8 in path");
            return -1;
        }
    };

    match bridge_ref(bridge).bridge.load_unit(path_str, is_core != 0) {
        Ok(report) => {
            *unit_out = report.unit;
            0
        }
        Err(e) => {
            set_error(error, &e.to_string());
            -1
        }
    }
}

/// Unload a unit, removing its classes, methods, and cached objects
///
/// # Returns
/// * 0 on success
/// * -1 if the identifier is not a loaded unit
///
/// # Safety
/// - The bridge pointer must be valid
#[no_mangle]
pub unsafe extern "C" fn lumen_unit_unload(bridge: *mut LumenBridge, unit: BridgeGuid) -> c_int {
    if bridge.is_null() {
        return -1;
    }
    if bridge_ref(bridge).bridge.unload_unit(unit) {
        0
    } else {
        -1
    }
}

// ============================================================================
// Object Functions
// ============================================================================

/// Construct an instance of a registered class
///
/// # Arguments
/// * `bridge` - Pointer to LumenBridge (must not be NULL)
/// * `unit` - Unit the class was registered under
/// * `class_name` - Null-terminated managed class name
/// * `pin` - Non-zero to pin the instance (cache keeps it alive until
///   released); zero for a transient entry
/// * `native_address` - Address of the paired native object, or 0 if unbound
/// * `object_out` - Receives the object identifier on success
/// * `error` - Optional pointer to receive error information
///
/// # Returns
/// * 0 on success
/// * -1 on failure (check error parameter)
///
/// # Safety
/// - All non-optional pointers must be valid
/// - `class_name` must be a valid null-terminated string
#[no_mangle]
pub unsafe extern "C" fn lumen_object_construct(
    bridge: *mut LumenBridge,
    unit: BridgeGuid,
    class_name: *const c_char,
    pin: c_int,
    native_address: usize,
    object_out: *mut BridgeGuid,
    error: *mut *mut LumenError,
) -> c_int {
    if bridge.is_null() || class_name.is_null() || object_out.is_null() {
        set_error(error, "Invalid arguments (null pointer)");
        return -1;
    }

    let name = match CStr::from_ptr(class_name).to_str() {
        Ok(s) => s,
        Err(_) => {
            set_error(error, "Invalid UTF-8 in class name");
            return -1;
        }
    };

    let result = bridge_ref(bridge).bridge.construct_object(
        unit,
        name,
        pin != 0,
        NativeAddress(native_address),
    );

    match result {
        Ok((entry, _object)) => {
            *object_out = entry.guid;
            0
        }
        Err(e) => {
            set_error(error, &e.to_string());
            -1
        }
    }
}

/// Register an existing native object under a registered class
///
/// Unlike `lumen_object_construct`, no managed instance is built; the cache
/// entry wraps the native address directly. Use this when the engine owns
/// the object and only needs it addressable as a dispatch target.
///
/// # Arguments
/// * `bridge` - Pointer to LumenBridge (must not be NULL)
/// * `unit` - Unit the class was registered under
/// * `class_name` - Null-terminated managed class name
/// * `native_address` - Address of the engine-side object
/// * `pin` - Non-zero to pin the entry; zero for a transient entry
/// * `object_out` - Receives the object identifier on success
/// * `error` - Optional pointer to receive error information
///
/// # Returns
/// * 0 on success
/// * -1 on failure (check error parameter)
///
/// # Safety
/// - All non-optional pointers must be valid
/// - `class_name` must be a valid null-terminated string
#[no_mangle]
pub unsafe extern "C" fn lumen_object_register(
    bridge: *mut LumenBridge,
    unit: BridgeGuid,
    class_name: *const c_char,
    native_address: usize,
    pin: c_int,
    object_out: *mut BridgeGuid,
    error: *mut *mut LumenError,
) -> c_int {
    if bridge.is_null() || class_name.is_null() || object_out.is_null() {
        set_error(error, "Invalid arguments (null pointer)");
        return -1;
    }

    let name = match CStr::from_ptr(class_name).to_str() {
        Ok(s) => s,
        Err(_) => {
            set_error(error, "Invalid UTF-8 in class name");
            return -1;
        }
    };

    let handle = bridge_ref(bridge);
    let Some(class) = handle.bridge.find_class(unit, name) else {
        set_error(
            error,
            &BridgeError::UnknownClass {
                unit,
                name: name.to_string(),
            }
            .to_string(),
        );
        return -1;
    };

    let instance: Arc<dyn Any + Send + Sync> = Arc::new(NativeAddress(native_address));
    let object = Arc::new(match class.native_class {
        Some(native) => ManagedObject::with_binding(
            instance,
            NativeBinding {
                class: native,
                address: NativeAddress(native_address),
            },
        ),
        None => ManagedObject::new(instance),
    });

    match handle.bridge.register_object(unit, &object, pin != 0) {
        Ok(entry) => {
            *object_out = entry.guid;
            0
        }
        Err(e) => {
            set_error(error, &e.to_string());
            -1
        }
    }
}

/// Release a cached object
///
/// Releasing an identifier that is already gone (including a second release
/// of the same object) is reported, not fatal.
///
/// # Returns
/// * 0 on success
/// * -1 if the identifier does not resolve
///
/// # Safety
/// - The bridge pointer must be valid
#[no_mangle]
pub unsafe extern "C" fn lumen_object_release(
    bridge: *mut LumenBridge,
    object: BridgeGuid,
) -> c_int {
    if bridge.is_null() {
        return -1;
    }
    if bridge_ref(bridge).bridge.release_object(object) {
        0
    } else {
        -1
    }
}

// ============================================================================
// Invocation
// ============================================================================

/// Invoke a method by identifier
///
/// # Arguments
/// * `bridge` - Pointer to LumenBridge (must not be NULL)
/// * `method` - Method identifier from class registration
/// * `target` - Target object identifier for instance methods; pass the nil
///   identifier (all zero) for static methods
/// * `params` - Array of constructed tagged value slots, one per declared
///   parameter; may be NULL when `param_count` is 0
/// * `param_count` - Number of entries in `params`
/// * `out` - Constructed slot that receives the return value; untouched on
///   failure and for void methods
/// * `error` - Optional pointer to receive error information
///
/// # Returns
/// * 0 on success
/// * -1 on failure (check error parameter)
///
/// # Safety
/// - All non-optional pointers must be valid
/// - `params` must point to at least `param_count` tagged value slots
#[no_mangle]
pub unsafe extern "C" fn lumen_invoke(
    bridge: *mut LumenBridge,
    method: BridgeGuid,
    target: BridgeGuid,
    params: *const TaggedValue,
    param_count: usize,
    out: *mut TaggedValue,
    error: *mut *mut LumenError,
) -> c_int {
    if bridge.is_null() || out.is_null() || (params.is_null() && param_count != 0) {
        set_error(error, "Invalid arguments (null pointer)");
        return -1;
    }

    let params = if param_count == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(params, param_count)
    };
    let target = if target.is_nil() { None } else { Some(target) };

    match bridge_ref(bridge)
        .bridge
        .invoke(method, target, params, &mut *out)
    {
        Ok(()) => 0,
        Err(e) => {
            set_error(error, &e.to_string());
            -1
        }
    }
}

// ============================================================================
// Tagged Value Functions
// ============================================================================

/// Initialize a tagged value slot in place
///
/// Callers allocate the 32-byte slot (stack or otherwise) and must construct
/// it before any other value call, and destruct it exactly once when done.
///
/// # Safety
/// - `slot` must point to 32 writable, 8-aligned bytes
#[no_mangle]
pub unsafe extern "C" fn lumen_value_construct(slot: *mut TaggedValue) {
    if !slot.is_null() {
        *slot = TaggedValue::construct();
    }
}

/// Destruct a tagged value slot
///
/// # Returns
/// * 0 on success
/// * -1 if the slot was already destructed (double destruct is refused)
///
/// # Safety
/// - `slot` must point to a slot previously passed to
///   `lumen_value_construct()`
#[no_mangle]
pub unsafe extern "C" fn lumen_value_destruct(slot: *mut TaggedValue) -> c_int {
    if slot.is_null() {
        return -1;
    }
    match (*slot).destruct() {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Whether the slot currently holds a value
///
/// # Safety
/// - `slot` must point to a constructed tagged value slot
#[no_mangle]
pub unsafe extern "C" fn lumen_value_is_valid(slot: *const TaggedValue) -> c_int {
    if slot.is_null() {
        return 0;
    }
    (*slot).is_valid() as c_int
}

/// Engine type id of the held value (0 if empty or unresolved)
///
/// # Safety
/// - `slot` must point to a constructed tagged value slot
#[no_mangle]
pub unsafe extern "C" fn lumen_value_type_id(slot: *const TaggedValue) -> u32 {
    if slot.is_null() {
        return TypeId::INVALID.0;
    }
    (*slot).type_id().0
}

unsafe fn value_set(
    bridge: *mut LumenBridge,
    slot: *mut TaggedValue,
    value: Value,
) -> c_int {
    if bridge.is_null() || slot.is_null() {
        return -1;
    }
    match (*slot).set(value, bridge_ref(bridge).bridge.type_table()) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

macro_rules! value_accessors {
    ($($set:ident / $get:ident: $ty:ty => $variant:ident),* $(,)?) => {
        $(
            /// Store a value in a constructed slot, stamping its engine
            /// type id from the bridge's type table
            ///
            /// # Returns
            /// * 0 on success, -1 on a null pointer
            ///
            /// # Safety
            /// - `bridge` must be valid and `slot` constructed
            #[no_mangle]
            pub unsafe extern "C" fn $set(
                bridge: *mut LumenBridge,
                slot: *mut TaggedValue,
                value: $ty,
            ) -> c_int {
                value_set(bridge, slot, Value::$variant(value))
            }

            /// Read the value back if the slot holds this kind
            ///
            /// # Returns
            /// * 0 on success, -1 if empty or holding a different kind
            ///
            /// # Safety
            /// - `slot` must be constructed and `out` writable
            #[no_mangle]
            pub unsafe extern "C" fn $get(
                slot: *const TaggedValue,
                out: *mut $ty,
            ) -> c_int {
                if slot.is_null() || out.is_null() {
                    return -1;
                }
                match (*slot).get() {
                    Ok(Value::$variant(value)) => {
                        *out = value;
                        0
                    }
                    _ => -1,
                }
            }
        )*
    };
}

value_accessors! {
    lumen_value_set_i8 / lumen_value_get_i8: i8 => I8,
    lumen_value_set_i16 / lumen_value_get_i16: i16 => I16,
    lumen_value_set_i32 / lumen_value_get_i32: i32 => I32,
    lumen_value_set_i64 / lumen_value_get_i64: i64 => I64,
    lumen_value_set_u8 / lumen_value_get_u8: u8 => U8,
    lumen_value_set_u16 / lumen_value_get_u16: u16 => U16,
    lumen_value_set_u32 / lumen_value_get_u32: u32 => U32,
    lumen_value_set_u64 / lumen_value_get_u64: u64 => U64,
    lumen_value_set_f32 / lumen_value_get_f32: f32 => F32,
    lumen_value_set_f64 / lumen_value_get_f64: f64 => F64,
}

/// Store a boolean
///
/// # Safety
/// - `bridge` must be valid and `slot` constructed
#[no_mangle]
pub unsafe extern "C" fn lumen_value_set_bool(
    bridge: *mut LumenBridge,
    slot: *mut TaggedValue,
    value: c_int,
) -> c_int {
    value_set(bridge, slot, Value::Bool(value != 0))
}

/// Read a boolean back (1/0 into `out`)
///
/// # Safety
/// - `slot` must be constructed and `out` writable
#[no_mangle]
pub unsafe extern "C" fn lumen_value_get_bool(slot: *const TaggedValue, out: *mut c_int) -> c_int {
    if slot.is_null() || out.is_null() {
        return -1;
    }
    match (*slot).get_bool() {
        Some(value) => {
            *out = value as c_int;
            0
        }
        None => -1,
    }
}

/// Store an engine id value
///
/// # Safety
/// - `bridge` must be valid and `slot` constructed
#[no_mangle]
pub unsafe extern "C" fn lumen_value_set_id(
    bridge: *mut LumenBridge,
    slot: *mut TaggedValue,
    value: u32,
) -> c_int {
    value_set(bridge, slot, Value::Id(value))
}

/// Read an engine id value back
///
/// # Safety
/// - `slot` must be constructed and `out` writable
#[no_mangle]
pub unsafe extern "C" fn lumen_value_get_id(slot: *const TaggedValue, out: *mut u32) -> c_int {
    if slot.is_null() || out.is_null() {
        return -1;
    }
    match (*slot).get_id() {
        Some(value) => {
            *out = value;
            0
        }
        None => -1,
    }
}

/// Store an object reference (a cache identifier)
///
/// # Safety
/// - `bridge` must be valid and `slot` constructed
#[no_mangle]
pub unsafe extern "C" fn lumen_value_set_object(
    bridge: *mut LumenBridge,
    slot: *mut TaggedValue,
    object: BridgeGuid,
) -> c_int {
    value_set(bridge, slot, Value::Object(object))
}

/// Read an object reference back
///
/// # Safety
/// - `slot` must be constructed and `out` writable
#[no_mangle]
pub unsafe extern "C" fn lumen_value_get_object(
    slot: *const TaggedValue,
    out: *mut BridgeGuid,
) -> c_int {
    if slot.is_null() || out.is_null() {
        return -1;
    }
    match (*slot).get_object() {
        Some(guid) => {
            *out = guid;
            0
        }
        None => -1,
    }
}

/// Number of distinct value kinds a slot can hold
#[no_mangle]
pub extern "C" fn lumen_value_kind_count() -> usize {
    ValueKind::COUNT
}
