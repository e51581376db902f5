//! Process-unique 128-bit identifiers
//!
//! Methods, objects, and units are addressed across the boundary by opaque
//! 128-bit random identifiers rather than dense indices or raw addresses.
//! Randomness makes reuse astronomically unlikely without a free list, so an
//! identifier handed to native code stays unambiguous for the process
//! lifetime even across unit unloads.

use rand::RngCore;

/// Opaque 128-bit identifier, stored as two `u64` halves so the native side
/// can hold it by value.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BridgeGuid {
    lo: u64,
    hi: u64,
}

impl BridgeGuid {
    /// The all-zero identifier. Never minted by [`BridgeGuid::new`]; used as
    /// the "no target" sentinel at the ABI boundary.
    pub const NIL: BridgeGuid = BridgeGuid { lo: 0, hi: 0 };

    /// Mint a fresh random identifier.
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let guid = BridgeGuid {
                lo: rng.next_u64(),
                hi: rng.next_u64(),
            };
            if guid != Self::NIL {
                return guid;
            }
        }
    }

    /// Reconstruct from raw halves (used at the ABI boundary).
    pub const fn from_parts(lo: u64, hi: u64) -> Self {
        BridgeGuid { lo, hi }
    }

    /// Raw halves, low first.
    pub const fn to_parts(self) -> (u64, u64) {
        (self.lo, self.hi)
    }

    /// Check for the nil sentinel.
    pub const fn is_nil(&self) -> bool {
        self.lo == 0 && self.hi == 0
    }
}

impl Default for BridgeGuid {
    fn default() -> Self {
        Self::NIL
    }
}

impl std::fmt::Display for BridgeGuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}{:016x}", self.hi, self.lo)
    }
}

impl std::fmt::Debug for BridgeGuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BridgeGuid({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_not_nil() {
        for _ in 0..64 {
            assert!(!BridgeGuid::new().is_nil());
        }
    }

    #[test]
    fn test_uniqueness() {
        let a = BridgeGuid::new();
        let b = BridgeGuid::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_parts_roundtrip() {
        let guid = BridgeGuid::new();
        let (lo, hi) = guid.to_parts();
        assert_eq!(BridgeGuid::from_parts(lo, hi), guid);
    }

    #[test]
    fn test_display_is_hex() {
        let guid = BridgeGuid::from_parts(0xdead_beef, 0x1);
        let s = guid.to_string();
        assert_eq!(s.len(), 32);
        assert!(s.ends_with("00000000deadbeef"));
    }
}
