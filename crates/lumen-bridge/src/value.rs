//! Tagged value container
//!
//! Fixed-layout discriminated union used to move exactly one typed value
//! across the boundary: scalars, a native identifier, or an opaque reference
//! to a managed object. The layout is part of the compile-time contract with
//! the native side (32 bytes, fixed per-field offsets), so any new variant
//! requires a coordinated change on both sides.
//!
//! # Layout
//!
//! ```text
//! offset  0: u32      native TypeId of the active variant (0 = none)
//! offset  4: u8       variant kind (KIND_NONE = 0xff when empty)
//! offset  5: u8       lifecycle state (constructed / released)
//! offset  6: [u8; 2]  padding
//! offset  8: u64      scalar payload (sign-extended ints, float bits, bool, id)
//! offset 16: [u64; 2] managed-object guid (object variant only)
//! ```
//!
//! Construction and destruction are explicit and symmetric: `construct`
//! before first use, `destruct` exactly once before the storage is reused.
//! Use before `construct` and a repeat `destruct` are both reported, never
//! undefined behavior.

use crate::engine::{TypeId, TypeTable};
use crate::error::ValueError;
use crate::guid::BridgeGuid;

/// Variant discriminant for the tagged container. ABI-stable values.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Signed 8-bit integer
    I8 = 0,
    /// Signed 16-bit integer
    I16 = 1,
    /// Signed 32-bit integer
    I32 = 2,
    /// Signed 64-bit integer
    I64 = 3,
    /// Unsigned 8-bit integer
    U8 = 4,
    /// Unsigned 16-bit integer
    U16 = 5,
    /// Unsigned 32-bit integer
    U32 = 6,
    /// Unsigned 64-bit integer
    U64 = 7,
    /// 32-bit floating point
    F32 = 8,
    /// 64-bit floating point
    F64 = 9,
    /// Boolean
    Bool = 10,
    /// Native 32-bit identifier
    Id = 11,
    /// Opaque reference to a managed object (cache guid)
    Object = 12,
}

impl ValueKind {
    /// Number of supported kinds.
    pub const COUNT: usize = 13;

    /// All kinds, in discriminant order.
    pub const ALL: [ValueKind; Self::COUNT] = [
        ValueKind::I8,
        ValueKind::I16,
        ValueKind::I32,
        ValueKind::I64,
        ValueKind::U8,
        ValueKind::U16,
        ValueKind::U32,
        ValueKind::U64,
        ValueKind::F32,
        ValueKind::F64,
        ValueKind::Bool,
        ValueKind::Id,
        ValueKind::Object,
    ];

    /// Canonical engine type name, used to resolve the native [`TypeId`].
    pub const fn type_name(&self) -> &'static str {
        match self {
            ValueKind::I8 => "int8",
            ValueKind::I16 => "int16",
            ValueKind::I32 => "int32",
            ValueKind::I64 => "int64",
            ValueKind::U8 => "uint8",
            ValueKind::U16 => "uint16",
            ValueKind::U32 => "uint32",
            ValueKind::U64 => "uint64",
            ValueKind::F32 => "float32",
            ValueKind::F64 => "float64",
            ValueKind::Bool => "bool",
            ValueKind::Id => "id",
            ValueKind::Object => "object",
        }
    }

    /// Decode a wire discriminant. Unknown values have no mapping.
    pub const fn from_u8(raw: u8) -> Option<ValueKind> {
        if (raw as usize) < Self::COUNT {
            Some(Self::ALL[raw as usize])
        } else {
            None
        }
    }
}

/// A boundary value in its natural Rust representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Signed 8-bit integer
    I8(i8),
    /// Signed 16-bit integer
    I16(i16),
    /// Signed 32-bit integer
    I32(i32),
    /// Signed 64-bit integer
    I64(i64),
    /// Unsigned 8-bit integer
    U8(u8),
    /// Unsigned 16-bit integer
    U16(u16),
    /// Unsigned 32-bit integer
    U32(u32),
    /// Unsigned 64-bit integer
    U64(u64),
    /// 32-bit floating point
    F32(f32),
    /// 64-bit floating point
    F64(f64),
    /// Boolean
    Bool(bool),
    /// Native 32-bit identifier
    Id(u32),
    /// Opaque reference to a managed object
    Object(BridgeGuid),
}

impl Value {
    /// The variant kind of this value.
    pub const fn kind(&self) -> ValueKind {
        match self {
            Value::I8(_) => ValueKind::I8,
            Value::I16(_) => ValueKind::I16,
            Value::I32(_) => ValueKind::I32,
            Value::I64(_) => ValueKind::I64,
            Value::U8(_) => ValueKind::U8,
            Value::U16(_) => ValueKind::U16,
            Value::U32(_) => ValueKind::U32,
            Value::U64(_) => ValueKind::U64,
            Value::F32(_) => ValueKind::F32,
            Value::F64(_) => ValueKind::F64,
            Value::Bool(_) => ValueKind::Bool,
            Value::Id(_) => ValueKind::Id,
            Value::Object(_) => ValueKind::Object,
        }
    }
}

// Lifecycle states
const STATE_EMPTY: u8 = 0;
const STATE_CONSTRUCTED: u8 = 1;
const STATE_RELEASED: u8 = 2;

// Kind byte when no variant is active
const KIND_NONE: u8 = 0xff;

/// Fixed-size tagged value buffer. See the module docs for the layout.
#[repr(C)]
#[derive(Clone)]
pub struct TaggedValue {
    type_id: u32,
    kind: u8,
    state: u8,
    _pad: [u8; 2],
    payload: u64,
    object: [u64; 2],
}

// The 32-byte size and field offsets are the wire contract with the engine.
const _: () = assert!(std::mem::size_of::<TaggedValue>() == 32);
const _: () = assert!(std::mem::align_of::<TaggedValue>() == 8);

impl TaggedValue {
    /// Initialize an empty container. Must be paired with exactly one
    /// [`TaggedValue::destruct`].
    pub const fn construct() -> Self {
        TaggedValue {
            type_id: 0,
            kind: KIND_NONE,
            state: STATE_CONSTRUCTED,
            _pad: [0; 2],
            payload: 0,
            object: [0; 2],
        }
    }

    /// Whether a variant is currently set.
    pub const fn is_valid(&self) -> bool {
        self.state == STATE_CONSTRUCTED && self.kind != KIND_NONE
    }

    /// The native [`TypeId`] of the active variant, or [`TypeId::INVALID`]
    /// when none is set.
    pub const fn type_id(&self) -> TypeId {
        TypeId(self.type_id)
    }

    /// The active variant kind, if any.
    pub const fn kind(&self) -> Option<ValueKind> {
        if self.state != STATE_CONSTRUCTED {
            return None;
        }
        ValueKind::from_u8(self.kind)
    }

    fn check_constructed(&self) -> Result<(), ValueError> {
        match self.state {
            STATE_CONSTRUCTED => Ok(()),
            STATE_RELEASED => Err(ValueError::AlreadyReleased),
            _ => Err(ValueError::NotConstructed),
        }
    }

    /// Store exactly one typed value, overwriting any previous one. The
    /// native [`TypeId`] is taken from the table at store time.
    pub fn set(&mut self, value: Value, table: &TypeTable) -> Result<(), ValueError> {
        self.check_constructed()?;

        let kind = value.kind();
        self.payload = 0;
        self.object = [0; 2];

        match value {
            Value::I8(v) => self.payload = v as i64 as u64,
            Value::I16(v) => self.payload = v as i64 as u64,
            Value::I32(v) => self.payload = v as i64 as u64,
            Value::I64(v) => self.payload = v as u64,
            Value::U8(v) => self.payload = v as u64,
            Value::U16(v) => self.payload = v as u64,
            Value::U32(v) => self.payload = v as u64,
            Value::U64(v) => self.payload = v,
            Value::F32(v) => self.payload = v.to_bits() as u64,
            Value::F64(v) => self.payload = v.to_bits(),
            Value::Bool(v) => self.payload = v as u64,
            Value::Id(v) => self.payload = v as u64,
            Value::Object(guid) => {
                let (lo, hi) = guid.to_parts();
                self.object = [lo, hi];
            }
        }

        self.kind = kind as u8;
        self.type_id = table.type_id(kind).0;
        self.state = STATE_CONSTRUCTED;

        Ok(())
    }

    fn payload_if(&self, kind: ValueKind) -> Option<u64> {
        if self.state == STATE_CONSTRUCTED && self.kind == kind as u8 {
            Some(self.payload)
        } else {
            None
        }
    }

    /// Signed 8-bit value, if that variant is active.
    pub fn get_i8(&self) -> Option<i8> {
        self.payload_if(ValueKind::I8).map(|p| p as i8)
    }

    /// Signed 16-bit value, if that variant is active.
    pub fn get_i16(&self) -> Option<i16> {
        self.payload_if(ValueKind::I16).map(|p| p as i16)
    }

    /// Signed 32-bit value, if that variant is active.
    pub fn get_i32(&self) -> Option<i32> {
        self.payload_if(ValueKind::I32).map(|p| p as i32)
    }

    /// Signed 64-bit value, if that variant is active.
    pub fn get_i64(&self) -> Option<i64> {
        self.payload_if(ValueKind::I64).map(|p| p as i64)
    }

    /// Unsigned 8-bit value, if that variant is active.
    pub fn get_u8(&self) -> Option<u8> {
        self.payload_if(ValueKind::U8).map(|p| p as u8)
    }

    /// Unsigned 16-bit value, if that variant is active.
    pub fn get_u16(&self) -> Option<u16> {
        self.payload_if(ValueKind::U16).map(|p| p as u16)
    }

    /// Unsigned 32-bit value, if that variant is active.
    pub fn get_u32(&self) -> Option<u32> {
        self.payload_if(ValueKind::U32).map(|p| p as u32)
    }

    /// Unsigned 64-bit value, if that variant is active.
    pub fn get_u64(&self) -> Option<u64> {
        self.payload_if(ValueKind::U64)
    }

    /// 32-bit float value, if that variant is active.
    pub fn get_f32(&self) -> Option<f32> {
        self.payload_if(ValueKind::F32)
            .map(|p| f32::from_bits(p as u32))
    }

    /// 64-bit float value, if that variant is active.
    pub fn get_f64(&self) -> Option<f64> {
        self.payload_if(ValueKind::F64).map(f64::from_bits)
    }

    /// Boolean value, if that variant is active.
    pub fn get_bool(&self) -> Option<bool> {
        self.payload_if(ValueKind::Bool).map(|p| p != 0)
    }

    /// Native identifier value, if that variant is active.
    pub fn get_id(&self) -> Option<u32> {
        self.payload_if(ValueKind::Id).map(|p| p as u32)
    }

    /// Managed-object reference, if that variant is active. The container
    /// does not own the referent; ownership lives in the object cache.
    pub fn get_object(&self) -> Option<BridgeGuid> {
        if self.state == STATE_CONSTRUCTED && self.kind == ValueKind::Object as u8 {
            Some(BridgeGuid::from_parts(self.object[0], self.object[1]))
        } else {
            None
        }
    }

    /// The stored value in its natural representation.
    pub fn get(&self) -> Result<Value, ValueError> {
        self.check_constructed()?;
        let kind = self.kind().ok_or(ValueError::Unrepresentable)?;
        let value = match kind {
            ValueKind::I8 => Value::I8(self.payload as i8),
            ValueKind::I16 => Value::I16(self.payload as i16),
            ValueKind::I32 => Value::I32(self.payload as i32),
            ValueKind::I64 => Value::I64(self.payload as i64),
            ValueKind::U8 => Value::U8(self.payload as u8),
            ValueKind::U16 => Value::U16(self.payload as u16),
            ValueKind::U32 => Value::U32(self.payload as u32),
            ValueKind::U64 => Value::U64(self.payload),
            ValueKind::F32 => Value::F32(f32::from_bits(self.payload as u32)),
            ValueKind::F64 => Value::F64(f64::from_bits(self.payload)),
            ValueKind::Bool => Value::Bool(self.payload != 0),
            ValueKind::Id => Value::Id(self.payload as u32),
            ValueKind::Object => {
                Value::Object(BridgeGuid::from_parts(self.object[0], self.object[1]))
            }
        };
        Ok(value)
    }

    /// Release the container. Exactly one release per construct; a release
    /// of a never-constructed or already-released buffer is reported and
    /// leaves it untouched.
    pub fn destruct(&mut self) -> Result<(), ValueError> {
        self.check_constructed()?;
        self.type_id = 0;
        self.kind = KIND_NONE;
        self.payload = 0;
        self.object = [0; 2];
        self.state = STATE_RELEASED;
        Ok(())
    }

    /// Clear the active variant without releasing the container.
    pub fn reset(&mut self) -> Result<(), ValueError> {
        self.check_constructed()?;
        self.type_id = 0;
        self.kind = KIND_NONE;
        self.payload = 0;
        self.object = [0; 2];
        Ok(())
    }
}

impl Default for TaggedValue {
    fn default() -> Self {
        // Default is the pre-construct empty state; callers supplying their
        // own storage must still call construct().
        TaggedValue {
            type_id: 0,
            kind: KIND_NONE,
            state: STATE_EMPTY,
            _pad: [0; 2],
            payload: 0,
            object: [0; 2],
        }
    }
}

impl std::fmt::Debug for TaggedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.get() {
            Ok(value) => write!(f, "TaggedValue({:?}, type_id={})", value, self.type_id),
            Err(ValueError::AlreadyReleased) => write!(f, "TaggedValue(<released>)"),
            Err(_) => write!(f, "TaggedValue(<empty>)"),
        }
    }
}

/// Scoped owner of a [`TaggedValue`]: releases the container on every exit
/// path. Use [`OwnedTagged::into_inner`] when the storage outlives the scope
/// (output parameters supplied by the caller).
pub struct OwnedTagged {
    inner: TaggedValue,
}

impl OwnedTagged {
    /// Construct a fresh, owned container.
    pub fn new() -> Self {
        OwnedTagged {
            inner: TaggedValue::construct(),
        }
    }

    /// Take the container out without releasing it; the caller becomes
    /// responsible for the matching destruct.
    pub fn into_inner(self) -> TaggedValue {
        let inner = self.inner.clone();
        std::mem::forget(self);
        inner
    }
}

impl Default for OwnedTagged {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for OwnedTagged {
    type Target = TaggedValue;

    fn deref(&self) -> &TaggedValue {
        &self.inner
    }
}

impl std::ops::DerefMut for OwnedTagged {
    fn deref_mut(&mut self) -> &mut TaggedValue {
        &mut self.inner
    }
}

impl Drop for OwnedTagged {
    fn drop(&mut self) {
        // Repeat release is already guarded in destruct.
        let _ = self.inner.destruct();
    }
}
