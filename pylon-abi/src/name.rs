//! Packed port name encoding
//!
//! A port name is the small integer a task uses to refer to one of its
//! capabilities. On the wire it is a single `u32` partitioned into an
//! *index* (high bits, selects a slot) and a *generation* (low 8 bits,
//! distinguishes successive reuses of the same slot).
//!
//! # Reserved Encodings
//!
//! Two raw values never index real storage:
//!
//! - [`RawName::NULL`] (`0`): a name that holds no right
//! - [`RawName::DEAD`] (`u32::MAX`): the dead-name sentinel, an index
//!   with an invalid generation
//!
//! To keep `0` free for NULL, the index is stored off-by-one:
//! `raw = (index + 1) << 8 | generation`. [`MAX_INDEX`] is chosen so
//! that no packed name can collide with [`RawName::DEAD`].
//!
//! Inside the core the two fields are carried separately; packing and
//! unpacking happen only at this boundary.

use core::fmt;

/// Number of generation bits in a packed name.
pub const GEN_BITS: u32 = 8;

/// Mask covering the generation bits.
pub const GEN_MASK: u32 = (1 << GEN_BITS) - 1;

/// Largest index representable in a packed name.
///
/// The index field is 24 bits wide and stored off-by-one; the top value
/// is reserved so that [`RawName::DEAD`] is never a valid packed name.
pub const MAX_INDEX: u32 = (1 << (32 - GEN_BITS)) - 3;

/// A packed port name as seen by callers.
///
/// This is an opaque handle; callers obtain names from the kernel and
/// hand them back unchanged. Forged or stale names are rejected by the
/// generation check inside the core.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct RawName(u32);

impl RawName {
    /// The null name: holds no right.
    pub const NULL: Self = Self(0);

    /// The dead-name sentinel.
    ///
    /// Returned in message bodies in place of a right whose port has
    /// been destroyed. Never matches a live entry.
    pub const DEAD: Self = Self(u32::MAX);

    /// Create a raw name from its wire representation.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the wire representation.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Pack an index and generation into a raw name.
    ///
    /// Returns `None` if `index` exceeds [`MAX_INDEX`].
    #[inline]
    #[must_use]
    pub const fn pack(index: u32, gen: u8) -> Option<Self> {
        if index > MAX_INDEX {
            return None;
        }
        Some(Self((index + 1) << GEN_BITS | gen as u32))
    }

    /// Unpack a raw name into `(index, generation)`.
    ///
    /// Returns `None` for the reserved encodings ([`RawName::NULL`] and
    /// [`RawName::DEAD`]).
    #[inline]
    #[must_use]
    pub const fn unpack(self) -> Option<(u32, u8)> {
        if self.is_null() || self.is_dead() {
            return None;
        }
        Some(((self.0 >> GEN_BITS) - 1, (self.0 & GEN_MASK) as u8))
    }

    /// Check if this is the null name.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == Self::NULL.0
    }

    /// Check if this is the dead-name sentinel.
    #[inline]
    #[must_use]
    pub const fn is_dead(self) -> bool {
        self.0 == Self::DEAD.0
    }

    /// Check if this name could refer to a live entry.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        !self.is_null() && !self.is_dead()
    }
}

impl fmt::Debug for RawName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "RawName::NULL")
        } else if self.is_dead() {
            write!(f, "RawName::DEAD")
        } else {
            write!(f, "RawName({:#x})", self.0)
        }
    }
}

impl fmt::Display for RawName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unpack() {
            Some((index, gen)) => write!(f, "{}.{}", index, gen),
            None if self.is_null() => write!(f, "null"),
            None => write!(f, "dead"),
        }
    }
}
