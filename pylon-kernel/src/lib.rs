//! Pylon kernel integration
//!
//! Hosts the naming core inside the kernel: a global registry mapping
//! task-visible handles to live spaces, and the raw kernel-call surface
//! that converts packed names and typed errors at the boundary.
//!
//! The port layer and notification dispatch are injected into
//! [`IpcCalls`] at construction; this crate does not implement them.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod calls;
pub mod registry;

pub use calls::IpcCalls;
pub use registry::{SpaceHandle, MAX_SPACES};

/// Initialise kernel-side naming state. Idempotent; call once at boot
/// before the first kernel call is dispatched.
pub fn init() {
    registry::init();
    log::info!("ipc naming initialised");
}
