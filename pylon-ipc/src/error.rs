//! Name space error types
//!
//! This module defines the error types that can occur during port name
//! space operations such as copy-in, copy-out, reference deltas, and
//! name deallocation.

use core::fmt;

/// Errors that can occur during name space operations.
///
/// All operations return `Result<T, IpcError>`. An operation that fails
/// makes no visible change to the entry it targeted; callers never
/// observe torn states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[must_use = "name space errors must be handled"]
pub enum IpcError {
    /// The space has begun or finished teardown.
    ///
    /// Always checked before any other validation; never recoverable.
    /// The caller must abandon the call.
    SpaceInactive,

    /// The name is null, dead, or its generation does not match the
    /// entry currently occupying the index.
    ///
    /// A stale name held across a destroy-and-reuse cycle fails here
    /// rather than aliasing the new entry.
    InvalidName,

    /// The name resolves to no entry at all.
    ///
    /// Recoverable: the caller may treat the right as already gone.
    NameNotFound,

    /// The entry's right is incompatible with the requested operation.
    ///
    /// For example, copying-in a send right from a name that only
    /// holds a receive right.
    InvalidRight,

    /// A reference delta would push `user_refs` above its maximum.
    ///
    /// The operation aborts with no mutation.
    UserRefsOverflow,

    /// A reference delta would push `user_refs` below zero.
    ///
    /// The operation aborts with no mutation.
    UserRefsUnderflow,

    /// The destination name is already occupied.
    ///
    /// Returned by named copy-out and rename when the target name (or
    /// another generation of the same index) holds a live entry.
    NameInUse,

    /// Table growth or tree-node allocation failed.
    ///
    /// The only potentially transient error; the caller may retry
    /// after backoff.
    ResourceShortage,

    /// A deferred-send request is already pending for the name.
    AlreadyPending,
}

impl IpcError {
    /// Get a short description of the error.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SpaceInactive => "space is inactive",
            Self::InvalidName => "invalid or stale name",
            Self::NameNotFound => "name not found",
            Self::InvalidRight => "right incompatible with operation",
            Self::UserRefsOverflow => "user reference count overflow",
            Self::UserRefsUnderflow => "user reference count underflow",
            Self::NameInUse => "destination name is in use",
            Self::ResourceShortage => "resource shortage",
            Self::AlreadyPending => "deferred-send request already pending",
        }
    }

    /// Check whether the error is potentially transient.
    #[inline]
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::ResourceShortage)
    }
}

impl fmt::Display for IpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result type for name space operations.
pub type IpcResult<T> = Result<T, IpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_shortage_is_transient() {
        assert!(IpcError::ResourceShortage.is_transient());
        assert!(!IpcError::SpaceInactive.is_transient());
        assert!(!IpcError::UserRefsOverflow.is_transient());
    }
}
