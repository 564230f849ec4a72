//! Kernel-call return codes
//!
//! Defines the return codes surfaced by port name space calls. Negative
//! values indicate errors, zero indicates success.

/// Return codes for port name space kernel calls.
#[repr(i64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernReturn {
    /// Success.
    Ok = 0,

    /// Name is null, dead, or its generation does not match.
    InvalidName = -1,
    /// Name resolves to no entry.
    NotFound = -2,
    /// Entry's right is incompatible with the operation.
    InvalidRight = -3,
    /// User reference count would exceed its maximum.
    UrefsOverflow = -4,
    /// User reference count would drop below zero.
    UrefsUnderflow = -5,
    /// Destination name is already occupied.
    NameInUse = -6,
    /// Table growth or node allocation failed (transient).
    NoMemory = -7,
    /// The space has begun or finished teardown.
    SpaceInactive = -8,
    /// A deferred-send request is already pending for the name.
    AlreadyPending = -9,
    /// Invalid space handle.
    InvalidHandle = -10,
}

impl KernReturn {
    /// Convert to raw i64 for return.
    #[inline]
    pub const fn as_i64(self) -> i64 {
        self as i64
    }

    /// Check if this represents success.
    #[inline]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Check if this represents an error.
    #[inline]
    pub const fn is_err(self) -> bool {
        !self.is_ok()
    }

    /// Try to convert from a raw i64 value.
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            -1 => Some(Self::InvalidName),
            -2 => Some(Self::NotFound),
            -3 => Some(Self::InvalidRight),
            -4 => Some(Self::UrefsOverflow),
            -5 => Some(Self::UrefsUnderflow),
            -6 => Some(Self::NameInUse),
            -7 => Some(Self::NoMemory),
            -8 => Some(Self::SpaceInactive),
            -9 => Some(Self::AlreadyPending),
            -10 => Some(Self::InvalidHandle),
            _ => None,
        }
    }
}
