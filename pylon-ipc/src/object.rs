//! Port references and collaborator seams
//!
//! The naming core never touches port internals. Entries hold a
//! [`PortRef`] - an index into the kernel's port table - and all
//! interaction with the port layer goes through the [`PortOps`] and
//! [`NotifyDispatch`] traits, which the kernel implements and injects
//! into the rights engine at construction.

use pylon_abi::RawName;

use core::fmt;

use crate::space::SpaceId;

/// Port reference - kernel-internal index to the named port object.
///
/// This is an index into the kernel's port table, not a raw pointer.
/// Using indices keeps the naming core free of pointer provenance
/// concerns and lets the port layer validate every access.
///
/// # Null Reference
///
/// A `PortRef` of zero (`PortRef::NULL`) means no port is referenced.
/// An entry's port reference is null exactly when its right is `None`
/// or `DeadName`.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct PortRef(u32);

impl PortRef {
    /// Null reference (no port).
    pub const NULL: Self = Self(0);

    /// Create a port reference from a raw index.
    ///
    /// Index 0 is reserved for NULL. Valid port indices start at 1.
    #[inline]
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Get the raw index value.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Check if this is a null reference.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Check if this is a valid (non-null) reference.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "PortRef::NULL")
        } else {
            write!(f, "PortRef({})", self.0)
        }
    }
}

/// Dead-name request identifier.
///
/// Index into the companion dead-name-request table, which is owned by
/// the notification layer. The naming core records at most one pending
/// request per entry and hands the identifier back when the matching
/// notification fires.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
#[repr(transparent)]
pub struct RequestId(u32);

impl RequestId {
    /// No request registered.
    pub const NULL: Self = Self(0);

    /// Create from a raw index. Index 0 is reserved for NULL.
    #[inline]
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Get the raw index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Check if a request is registered.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Check if no request is registered.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "RequestId::NULL")
        } else {
            write!(f, "RequestId({})", self.0)
        }
    }
}

/// Port layer operations consumed by the rights engine.
///
/// An entry holds exactly one port reference while any right exists;
/// the engine calls [`reference`](PortOps::reference) and
/// [`release`](PortOps::release) as capabilities are duplicated and
/// consumed, and [`is_destroyed`](PortOps::is_destroyed) to detect
/// rights whose port has died underneath them.
pub trait PortOps {
    /// Take one reference on the port.
    fn reference(&self, port: PortRef);

    /// Drop one reference on the port.
    fn release(&self, port: PortRef);

    /// Check whether the port has been destroyed.
    fn is_destroyed(&self, port: PortRef) -> bool;
}

/// Notification delivery consumed by the rights engine.
///
/// Each method is invoked **at most once** per triggering transition;
/// the engine clears the registered request under the space lock before
/// delivering, so concurrent destruction races cannot double-fire.
pub trait NotifyDispatch {
    /// A name lost its send or receive right while the port was alive.
    fn port_deleted(&self, space: SpaceId, name: RawName);

    /// A name's right turned into a dead name.
    fn dead_name(&self, space: SpaceId, name: RawName);

    /// The port lost its last send right.
    ///
    /// Declared for the port layer, which owns make-send counts; the
    /// naming core never fires this itself.
    fn no_senders(&self, port: PortRef, mscount: u32);

    /// A send-once right was destroyed without being consumed by a
    /// message.
    fn send_once(&self, port: PortRef);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_ref_null() {
        assert!(PortRef::NULL.is_null());
        assert!(!PortRef::NULL.is_valid());
        assert!(PortRef::from_index(7).is_valid());
        assert_eq!(PortRef::from_index(7).index(), 7);
    }

    #[test]
    fn test_request_id_null() {
        assert!(RequestId::NULL.is_null());
        assert!(RequestId::from_index(3).is_valid());
    }
}
