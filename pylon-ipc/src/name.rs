//! Internal name representation
//!
//! Inside the core a name is carried as two fields - slot index and
//! generation - and only packed into the single-integer
//! [`RawName`](pylon_abi::RawName) form at the kernel-call boundary.

use core::fmt;

use pylon_abi::{MAX_INDEX, RawName};

/// Generation counter for one slot.
///
/// Bumped every time a slot is returned to the free list, so a name
/// captured before a destroy never re-validates against the slot's
/// next occupant. Wraps after 256 reuses of the same index.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Generation(u8);

impl Generation {
    /// Generation of a slot that has never been recycled.
    pub const FIRST: Self = Self(0);

    /// Create from a raw generation value.
    #[inline]
    #[must_use]
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    /// Get the raw generation value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// The generation following this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Generation({})", self.0)
    }
}

/// An unpacked port name: slot index plus generation.
///
/// Ordered by index first, then generation; the sparse tree is keyed
/// by this ordering.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name {
    /// Slot index into the entry table, or tree key beyond it.
    pub index: u32,
    /// Generation the name was minted with.
    pub gen: Generation,
}

impl Name {
    /// The smallest representable name.
    pub const MIN: Self = Self {
        index: 0,
        gen: Generation::FIRST,
    };

    /// Create a name from its parts.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, gen: Generation) -> Self {
        Self { index, gen }
    }

    /// The smallest name with the given index, any generation.
    ///
    /// Used as a tree boundary key: every name with a lower index
    /// orders strictly below it.
    #[inline]
    #[must_use]
    pub const fn floor_of(index: u32) -> Self {
        Self {
            index,
            gen: Generation::FIRST,
        }
    }

    /// Unpack a raw name.
    ///
    /// Returns `None` for the reserved null and dead encodings.
    #[inline]
    #[must_use]
    pub fn from_raw(raw: RawName) -> Option<Self> {
        let (index, gen) = raw.unpack()?;
        Some(Self {
            index,
            gen: Generation::new(gen),
        })
    }

    /// Pack into the boundary representation.
    ///
    /// # Panics
    ///
    /// Panics if the index exceeds [`MAX_INDEX`]; the core never
    /// constructs such a name, so hitting this is a contract violation.
    #[inline]
    #[must_use]
    pub fn to_raw(self) -> RawName {
        match RawName::pack(self.index, self.gen.value()) {
            Some(raw) => raw,
            None => panic!("name index out of range"),
        }
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({}.{})", self.index, self.gen.value())
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.gen.value())
    }
}

/// Check that an index is representable in a packed name.
#[inline]
#[must_use]
pub const fn index_in_range(index: u32) -> bool {
    index <= MAX_INDEX
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_bump_wraps() {
        assert_eq!(Generation::FIRST.next().value(), 1);
        assert_eq!(Generation::new(0xff).next(), Generation::FIRST);
    }

    #[test]
    fn test_name_ordering_index_major() {
        let a = Name::new(1, Generation::new(0xff));
        let b = Name::new(2, Generation::FIRST);
        assert!(a < b);
        assert!(Name::new(2, Generation::new(1)) > b);
    }

    #[test]
    fn test_raw_roundtrip() {
        let name = Name::new(12, Generation::new(3));
        assert_eq!(Name::from_raw(name.to_raw()), Some(name));
        assert_eq!(Name::from_raw(RawName::NULL), None);
        assert_eq!(Name::from_raw(RawName::DEAD), None);
    }

    #[test]
    fn test_floor_of_orders_below_all_generations() {
        let boundary = Name::floor_of(4);
        assert!(Name::new(3, Generation::new(0xff)) < boundary);
        assert!(Name::new(4, Generation::new(1)) > boundary);
    }
}
