//! Capability entries
//!
//! An [`Entry`] is one capability slot in a space: the right it holds,
//! the port it names, and the bookkeeping that ties the two together.
//! Entries live either in the dense entry table or in the sparse tree;
//! the representation is identical in both.

use core::fmt;

use pylon_abi::RightKind;

use crate::error::{IpcError, IpcResult};
use crate::name::Generation;
use crate::object::{PortRef, RequestId};

/// Bounded user-visible reference count.
///
/// Counts duplicates of a send or dead-name right held under one name.
/// Overflow and underflow are detectable error conditions
/// ([`IpcError::UserRefsOverflow`] / [`IpcError::UserRefsUnderflow`]),
/// never silent wraparound.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct UserRefs(u16);

impl UserRefs {
    /// Zero references.
    pub const ZERO: Self = Self(0);

    /// One reference.
    pub const ONE: Self = Self(1);

    /// Maximum representable count.
    pub const MAX: Self = Self(u16::MAX);

    /// Create from a raw count.
    #[inline]
    #[must_use]
    pub const fn new(count: u16) -> Self {
        Self(count)
    }

    /// Get the raw count.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Check if the count is zero.
    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Apply a signed delta with bounds checking.
    ///
    /// The arithmetic is done in 64 bits so deltas far outside the
    /// representable range are still classified correctly.
    pub fn checked_delta(self, delta: i32) -> IpcResult<Self> {
        let applied = i64::from(self.0) + i64::from(delta);
        if applied < 0 {
            Err(IpcError::UserRefsUnderflow)
        } else if applied > i64::from(u16::MAX) {
            Err(IpcError::UserRefsOverflow)
        } else {
            Ok(Self(applied as u16))
        }
    }
}

impl fmt::Debug for UserRefs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserRefs({})", self.0)
    }
}

/// The right held under one name.
///
/// Receive, send-once, and port-set rights are mutually exclusive; a
/// send right may coexist with a receive right on the same name, which
/// is modelled by the `send_refs` count inside [`Right::Receive`]
/// (zero means a pure receive right).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Right {
    /// No right: the entry is free.
    None,
    /// One or more send references. `refs` is at least 1.
    Send {
        /// User-visible duplicates of the send right.
        refs: UserRefs,
    },
    /// The receive right, with optionally coalesced send references.
    Receive {
        /// Send references sharing this name; zero for pure receive.
        send_refs: UserRefs,
    },
    /// A single send-once right.
    SendOnce,
    /// Port set membership container.
    PortSet,
    /// A dead name: the port behind the right was destroyed while
    /// `refs` user references were still outstanding.
    DeadName {
        /// Surviving user references, carried forward unchanged.
        refs: UserRefs,
    },
}

impl Right {
    /// Flat discriminant for introspection.
    #[must_use]
    pub const fn kind(&self) -> RightKind {
        match self {
            Self::None => RightKind::None,
            Self::Send { .. } => RightKind::Send,
            Self::Receive { .. } => RightKind::Receive,
            Self::SendOnce => RightKind::SendOnce,
            Self::PortSet => RightKind::PortSet,
            Self::DeadName { .. } => RightKind::DeadName,
        }
    }

    /// User-visible reference count as reported by introspection.
    ///
    /// Send and dead-name rights report their duplicate count, a
    /// coalesced receive reports its send references, and the
    /// single-holder rights report one.
    #[must_use]
    pub const fn user_refs(&self) -> UserRefs {
        match self {
            Self::None => UserRefs::ZERO,
            Self::Send { refs } | Self::DeadName { refs } => *refs,
            Self::Receive { send_refs } => *send_refs,
            Self::SendOnce | Self::PortSet => UserRefs::ONE,
        }
    }

    /// Check if the entry is free.
    #[inline]
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Check if the right includes any send references.
    #[inline]
    #[must_use]
    pub const fn has_send(&self) -> bool {
        match self {
            Self::Send { .. } => true,
            Self::Receive { send_refs } => !send_refs.is_zero(),
            _ => false,
        }
    }

    /// Check if the right includes the receive right.
    #[inline]
    #[must_use]
    pub const fn has_receive(&self) -> bool {
        matches!(self, Self::Receive { .. })
    }

    /// Check if the right keeps the port reverse-mapped.
    ///
    /// Send and receive rights are coalescing: a port has at most one
    /// such name per space, found through the reverse map. Send-once
    /// rights are not coalesced and dead names have no port.
    #[inline]
    #[must_use]
    pub const fn is_reverse_mapped(&self) -> bool {
        matches!(self, Self::Send { .. } | Self::Receive { .. })
    }
}

/// One capability slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Entry {
    /// The right held under the name.
    pub right: Right,
    /// Reference to the named port; null when `right` is `None` or
    /// `DeadName`. The entry holds exactly one port reference while
    /// any live right exists.
    pub object: PortRef,
    /// Generation the slot's current name was minted with.
    pub gen: Generation,
    /// Pending dead-name notification request, at most one per entry.
    pub request: RequestId,
    /// Set while a deferred-send record is outstanding for this entry.
    pub marequest: bool,
}

impl Entry {
    /// A free entry at the given generation.
    #[inline]
    #[must_use]
    pub const fn free(gen: Generation) -> Self {
        Self {
            right: Right::None,
            object: PortRef::NULL,
            gen,
            request: RequestId::NULL,
            marequest: false,
        }
    }

    /// Create a live entry holding `right` on `object`.
    #[inline]
    #[must_use]
    pub const fn new(right: Right, object: PortRef, gen: Generation) -> Self {
        Self {
            right,
            object,
            gen,
            request: RequestId::NULL,
            marequest: false,
        }
    }

    /// Check if the entry is free.
    #[inline]
    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.right.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_refs_delta_bounds() {
        let refs = UserRefs::new(10);
        assert_eq!(refs.checked_delta(5), Ok(UserRefs::new(15)));
        assert_eq!(refs.checked_delta(-10), Ok(UserRefs::ZERO));
        assert_eq!(refs.checked_delta(-11), Err(IpcError::UserRefsUnderflow));
        assert_eq!(
            UserRefs::ZERO.checked_delta(70_000),
            Err(IpcError::UserRefsOverflow)
        );
        assert_eq!(
            UserRefs::MAX.checked_delta(1),
            Err(IpcError::UserRefsOverflow)
        );
    }

    #[test]
    fn test_right_kinds() {
        assert_eq!(Right::None.kind(), RightKind::None);
        assert_eq!(
            Right::Send {
                refs: UserRefs::ONE
            }
            .kind(),
            RightKind::Send
        );
        assert_eq!(
            Right::Receive {
                send_refs: UserRefs::new(3)
            }
            .kind(),
            RightKind::Receive
        );
        assert_eq!(Right::SendOnce.kind(), RightKind::SendOnce);
        assert_eq!(
            Right::DeadName {
                refs: UserRefs::ONE
            }
            .kind(),
            RightKind::DeadName
        );
    }

    #[test]
    fn test_coalesced_receive_has_send() {
        let pure = Right::Receive {
            send_refs: UserRefs::ZERO,
        };
        let coalesced = Right::Receive {
            send_refs: UserRefs::new(2),
        };
        assert!(!pure.has_send());
        assert!(coalesced.has_send());
        assert!(pure.has_receive() && coalesced.has_receive());
    }

    #[test]
    fn test_free_entry_invariant() {
        let e = Entry::free(Generation::FIRST);
        assert!(e.is_free());
        assert!(e.object.is_null());
        assert!(e.right.user_refs().is_zero());
    }
}
