//! Bit-packed authorization tokens
//!
//! Layout of the 64-bit value:
//! - bits 48..=63: realm segment, one bit per live realm claim-variant
//! - bits 0..=47: scope segment, one bit per scope within that realm
//!
//! `0` means "no authorization". A freshly resolved token carries exactly one
//! realm bit; scope bits are only meaningful relative to that realm.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Width of the realm segment
pub const REALM_BITS: u32 = 16;
/// Width of the scope segment
pub const SCOPE_BITS: u32 = 48;

/// Maximum number of live realm claim-variants
pub const MAX_REALMS: usize = REALM_BITS as usize;
/// Maximum number of scopes per realm
pub const MAX_SCOPES: usize = SCOPE_BITS as usize;

pub const REALM_MASK: u64 = 0xFFFF_0000_0000_0000;
pub const SCOPE_MASK: u64 = !REALM_MASK;

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorizationToken(u64);

impl AuthorizationToken {
    pub const NONE: AuthorizationToken = AuthorizationToken(0);

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Token holding only the realm bit at `index` (0-based within the realm segment)
    pub fn realm(index: usize) -> Self {
        assert!(index < MAX_REALMS, "realm index {index} out of range");
        Self(1u64 << (SCOPE_BITS as usize + index))
    }

    /// Token holding only the scope bit at `index`
    pub fn scope(index: usize) -> Self {
        assert!(index < MAX_SCOPES, "scope index {index} out of range");
        Self(1u64 << index)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn realm_bits(self) -> AuthorizationToken {
        Self(self.0 & REALM_MASK)
    }

    pub const fn scope_bits(self) -> AuthorizationToken {
        Self(self.0 & SCOPE_MASK)
    }

    pub const fn realm_count(self) -> u32 {
        (self.0 & REALM_MASK).count_ones()
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Zero, or exactly one realm bit plus any scope bits
    pub const fn is_well_formed(self) -> bool {
        self.0 == 0 || self.realm_count() == 1
    }

    /// Index of the single realm bit, if exactly one is set
    pub fn realm_index(self) -> Option<usize> {
        if self.realm_count() == 1 {
            Some(((self.0 & REALM_MASK).trailing_zeros() - SCOPE_BITS) as usize)
        } else {
            None
        }
    }

    /// True when every bit of `required` is present in `self`
    pub const fn satisfies(self, required: AuthorizationToken) -> bool {
        self.0 & required.0 == required.0
    }
}

impl BitOr for AuthorizationToken {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AuthorizationToken {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for AuthorizationToken {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl From<u64> for AuthorizationToken {
    fn from(bits: u64) -> Self {
        Self(bits)
    }
}

impl From<AuthorizationToken> for u64 {
    fn from(token: AuthorizationToken) -> Self {
        token.0
    }
}

impl fmt::Display for AuthorizationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::Debug for AuthorizationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthorizationToken({})", self)
    }
}
