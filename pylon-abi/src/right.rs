//! Right kind discriminants
//!
//! The kind of right held under a name, as reported by introspection
//! calls. Inside the core a right also carries reference counts; this
//! crate only defines the flat discriminant shared across the boundary.

use core::fmt;

use crate::RawName;

/// The kind of right held under a port name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash)]
#[repr(u8)]
pub enum RightKind {
    /// No right (free entry).
    #[default]
    None = 0,
    /// Send right: may queue messages on the port.
    Send = 1,
    /// Receive right: may dequeue messages (at most one holder).
    ///
    /// A receive name may also carry coalesced send references; the
    /// reported kind is still `Receive`.
    Receive = 2,
    /// Send-once right: one message, then the right is consumed.
    SendOnce = 3,
    /// Port set membership container.
    PortSet = 4,
    /// Dead name: the port behind the right was destroyed.
    DeadName = 5,
}

impl RightKind {
    /// Get a short description of the right kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Send => "send",
            Self::Receive => "receive",
            Self::SendOnce => "send-once",
            Self::PortSet => "port-set",
            Self::DeadName => "dead-name",
        }
    }

    /// Try to convert from a raw u8 value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Send),
            2 => Some(Self::Receive),
            3 => Some(Self::SendOnce),
            4 => Some(Self::PortSet),
            5 => Some(Self::DeadName),
            _ => None,
        }
    }
}

impl fmt::Display for RightKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One record of the bulk introspection call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NameDump {
    /// The packed name.
    pub name: RawName,
    /// Kind of right held under the name.
    pub kind: RightKind,
    /// User-visible reference count (send and dead-name rights).
    pub refs: u16,
}
