//! Pylon port name space ABI
//!
//! Shared definitions for the boundary between the kernel's port naming
//! core and its callers. This crate is `no_std` and has no dependencies,
//! allowing it to be used in both the kernel and userspace.
//!
//! # Modules
//!
//! - [`name`] - Packed port name encoding (index + generation)
//! - [`error`] - Kernel-call return codes
//! - [`right`] - Right kind discriminants and introspection records

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod error;
pub mod name;
pub mod right;

// Re-export commonly used items
pub use error::KernReturn;
pub use name::{GEN_BITS, MAX_INDEX, RawName};
pub use right::{NameDump, RightKind};
